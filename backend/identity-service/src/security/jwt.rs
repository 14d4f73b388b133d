/// Signed bearer credentials (access and refresh tokens)
///
/// HS512 with a shared secret. Each token carries the user id, role, a
/// server-generated unique id (`jti`), issue time, expiry, issuer and kind,
/// plus the login session it belongs to (`sid`).
use crate::models::Role;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

const JWT_ALGORITHM: Algorithm = Algorithm::HS512;

/// Minimum shared-secret length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims as they appear on the wire
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Subject (user ID)
    sub: Uuid,
    role: Role,
    /// Unique token id; for refresh tokens this is the session id
    jti: Uuid,
    iat: i64,
    exp: i64,
    iss: String,
    token_type: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<Uuid>,
}

/// Verified (or freshly issued) token contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub kind: TokenKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
    /// Login session; for refresh tokens this equals `id`.
    pub session_id: Option<Uuid>,
}

impl Payload {
    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self) -> std::time::Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// What to put into a new token.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub user_id: Uuid,
    pub role: Role,
    pub kind: TokenKind,
    pub ttl: Duration,
    /// Session an access token is bound to. Refresh tokens start their own.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is invalid: {0}")]
    Invalid(String),
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Issues and verifies signed bearer tokens.
pub trait TokenMaker: Send + Sync {
    fn generate_token(&self, request: &TokenRequest) -> Result<(String, Payload), TokenError>;
    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}

/// HMAC-SHA512 implementation of [`TokenMaker`].
pub struct JwtMaker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl fmt::Debug for JwtMaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtMaker")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtMaker {
    pub fn new(secret: &str, issuer: &str) -> Result<Self, TokenError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(TokenError::InvalidKey(format!(
                "secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        if issuer.trim().is_empty() {
            return Err(TokenError::InvalidKey("issuer must not be empty".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation
    }
}

impl TokenMaker for JwtMaker {
    fn generate_token(&self, request: &TokenRequest) -> Result<(String, Payload), TokenError> {
        // JWT timestamps have second precision; keep the payload consistent with the wire form.
        let issued_at = Utc::now().trunc_subsecs(0);
        let expires_at = issued_at + request.ttl;

        let id = Uuid::new_v4();
        let session_id = match request.kind {
            TokenKind::Refresh => Some(id),
            TokenKind::Access => request.session_id,
        };
        let payload = Payload {
            id,
            user_id: request.user_id,
            role: request.role,
            kind: request.kind,
            issued_at,
            expires_at,
            issuer: self.issuer.clone(),
            session_id,
        };

        let claims = Claims {
            sub: payload.user_id,
            role: payload.role,
            jti: payload.id,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: payload.issuer.clone(),
            token_type: payload.kind,
            sid: payload.session_id,
        };

        let token = encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation()).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            },
        )?;
        let claims = data.claims;

        let issued_at = DateTime::<Utc>::from_timestamp(claims.iat, 0)
            .ok_or_else(|| TokenError::Invalid("iat out of range".to_string()))?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Invalid("exp out of range".to_string()))?;

        Ok(Payload {
            id: claims.jti,
            user_id: claims.sub,
            role: claims.role,
            kind: claims.token_type,
            issued_at,
            expires_at,
            issuer: claims.iss,
            session_id: claims.sid,
        })
    }
}
