/// Password hashing and verification using Argon2id
use crate::config::HashingSettings;
use crate::error::{IdentityError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Argon2id hasher with configurable cost.
///
/// Verification reads the cost parameters from the stored PHC string, so
/// digests produced under an older cost keep verifying after a change.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
    // Digest of a fixed throwaway password; verified against when no user exists
    // so that unknown-email logins cost the same as wrong-password logins.
    decoy: Arc<OnceCell<String>>,
}

impl CredentialHasher {
    pub fn new(settings: &HashingSettings) -> Result<Self> {
        let params = Params::new(
            settings.memory_kib,
            settings.iterations,
            settings.parallelism,
            None,
        )
        .map_err(|e| IdentityError::Internal(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self {
            params,
            decoy: Arc::new(OnceCell::new()),
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password using Argon2id
    ///
    /// ## Security
    ///
    /// - Algorithm: Argon2id, version 0x13
    /// - Salt: Random 16-byte salt generated per password
    /// - No pre-hash; input length is bounded at the request edge
    ///
    /// ## Returns
    ///
    /// PHC-formatted hash string safe for database storage
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| IdentityError::Internal(format!("Password hashing failed: {}", e)))?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against its hash
    ///
    /// ## Security
    ///
    /// Constant-time comparison inside `argon2`.
    ///
    /// ## Returns
    ///
    /// `Ok(true)` on match, `Ok(false)` on mismatch, `Err` for malformed digests
    /// or hasher failures.
    pub fn verify(&self, password_hash: &str, password: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| IdentityError::Internal(format!("Invalid password hash format: {}", e)))?;

        match self.argon2().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(_) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(IdentityError::Internal(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    }

    /// Burn the same work as a real verification; the outcome is discarded.
    pub fn verify_decoy(&self, password: &str) -> Result<()> {
        let decoy = self
            .decoy
            .get_or_try_init(|| self.hash("decoy-password-never-matches"))?;
        let _ = self.verify(decoy, password)?;
        Ok(())
    }

    /// Run [`CredentialHasher::hash`] on the blocking pool.
    pub async fn hash_blocking(&self, password: String) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password)).await?
    }

    /// Run [`CredentialHasher::verify`] on the blocking pool.
    pub async fn verify_blocking(&self, password_hash: String, password: String) -> Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password_hash, &password)).await?
    }

    pub async fn verify_decoy_blocking(&self, password: String) -> Result<()> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_decoy(&password)).await?
    }
}
