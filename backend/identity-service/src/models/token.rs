use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// What a one-time token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    Activation,
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown token scope: {0}")]
pub struct UnknownScope(pub String);

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::PasswordReset => "password_reset",
        }
    }
}

impl FromStr for TokenScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(TokenScope::Activation),
            "password_reset" => Ok(TokenScope::PasswordReset),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly generated one-time token.
///
/// `plaintext` exists only in memory and is handed to the caller exactly once;
/// storage receives `hash` (hex SHA-256 of the plaintext).
#[derive(Clone)]
pub struct Token {
    pub plaintext: String,
    pub hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub scope: TokenScope,
}

impl Token {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("plaintext", &"[REDACTED]")
            .field("hash", &self.hash)
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_strings() {
        assert_eq!(TokenScope::Activation.as_str(), "activation");
        assert_eq!(
            "password_reset".parse::<TokenScope>().unwrap(),
            TokenScope::PasswordReset
        );
        assert!("login".parse::<TokenScope>().is_err());
    }

    #[test]
    fn test_debug_hides_plaintext() {
        let token = Token {
            plaintext: "123456".into(),
            hash: "abc".into(),
            user_id: Uuid::new_v4(),
            expires_at: Utc::now(),
            scope: TokenScope::Activation,
        };
        assert!(!format!("{:?}", token).contains("123456"));
    }
}
