/// One-time token generation (numeric OTPs and opaque link tokens)
use crate::error::{IdentityError, Result};
use crate::models::{Token, TokenScope};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of OTP values: codes are `000000..=999999`.
const OTP_SPACE: u32 = 1_000_000;

/// Largest multiple of [`OTP_SPACE`] that fits in a `u32`; draws at or above it
/// are rejected so the remainder is uniform.
const OTP_REJECTION_BOUND: u32 = (u32::MAX / OTP_SPACE) * OTP_SPACE;

/// Random bytes behind an opaque token (256 bits).
const OPAQUE_TOKEN_BYTES: usize = 32;

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| IdentityError::Internal(format!("OS random source failed: {}", e)))
}

/// Generate a 6-digit numeric one-time code.
///
/// ## Security
///
/// - Source: operating-system CSPRNG
/// - Uniform over 10^6 values via rejection sampling
/// - Only the SHA-256 digest is meant to be persisted
pub fn generate_otp(user_id: Uuid, ttl: Duration, scope: TokenScope) -> Result<Token> {
    let code = loop {
        let mut buf = [0u8; 4];
        fill_random(&mut buf)?;
        let draw = u32::from_le_bytes(buf);
        if draw < OTP_REJECTION_BOUND {
            break draw % OTP_SPACE;
        }
    };

    Ok(build_token(format!("{:06}", code), user_id, ttl, scope))
}

/// Generate an opaque, URL-safe token for emailed links.
///
/// 32 random bytes, unpadded base64url (43 characters).
pub fn generate_token(user_id: Uuid, ttl: Duration, scope: TokenScope) -> Result<Token> {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    fill_random(&mut bytes)?;
    Ok(build_token(URL_SAFE_NO_PAD.encode(bytes), user_id, ttl, scope))
}

fn build_token(plaintext: String, user_id: Uuid, ttl: Duration, scope: TokenScope) -> Token {
    let hash = hash_token(&plaintext);
    Token {
        plaintext,
        hash,
        user_id,
        expires_at: Utc::now() + ttl,
        scope,
    }
}

/// Hash a token using SHA-256 (hex encoded)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_otp_is_six_digits() {
        let user_id = Uuid::new_v4();
        for _ in 0..200 {
            let token = generate_otp(user_id, Duration::seconds(90), TokenScope::Activation).unwrap();
            assert_eq!(token.plaintext.len(), 6);
            assert!(token.plaintext.chars().all(|c| c.is_ascii_digit()));
            assert_eq!(token.hash, hash_token(&token.plaintext));
            assert_eq!(token.user_id, user_id);
            assert_eq!(token.scope, TokenScope::Activation);
        }
    }

    #[test]
    fn test_rejection_bound() {
        assert_eq!(OTP_REJECTION_BOUND % OTP_SPACE, 0);
        assert!(u32::MAX - OTP_REJECTION_BOUND < OTP_SPACE);
    }

    #[test]
    fn test_opaque_token_shape() {
        let token =
            generate_token(Uuid::new_v4(), Duration::minutes(15), TokenScope::PasswordReset).unwrap();
        assert_eq!(token.plaintext.len(), 43);
        assert!(token
            .plaintext
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(token.expires_at > Utc::now());
    }

    #[test]
    fn test_opaque_tokens_are_unique() {
        let user_id = Uuid::new_v4();
        let tokens: HashSet<String> = (0..100)
            .map(|_| {
                generate_token(user_id, Duration::minutes(15), TokenScope::PasswordReset)
                    .unwrap()
                    .plaintext
            })
            .collect();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let digest = hash_token("123456");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_token("123456"));
        assert_ne!(digest, hash_token("123457"));
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
