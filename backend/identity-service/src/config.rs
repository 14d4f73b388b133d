//! Configuration management for the identity service
//!
//! Loads settings from environment variables, with a `.env` file honoured in
//! debug builds.
//!
//! # Example
//!
//! ```no_run
//! use storefront_identity::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("JWT issuer: {}", settings.jwt.issuer);
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use db_pool::DbConfig;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::info;

pub const SERVICE_NAME: &str = "storefront-identity";

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DbConfig,
    pub redis: RedisSettings,
    pub jwt: JwtSettings,
    pub tokens: TokenSettings,
    pub hashing: HashingSettings,
    pub email: EmailSettings,
    pub worker: WorkerSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DbConfig::from_env(SERVICE_NAME).map_err(|e| anyhow!(e))?,
            redis: RedisSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            tokens: TokenSettings::from_env()?,
            hashing: HashingSettings::from_env()?,
            email: EmailSettings::from_env()?,
            worker: WorkerSettings::from_env()?,
        })
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("Invalid {}", key)),
        Err(_) => Ok(default),
    }
}

/// Redis cache and job queue settings
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_ms: u64,
}

impl RedisSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
            connect_timeout_secs: parse_or("REDIS_CONNECTION_TIMEOUT", 5)?,
            command_timeout_ms: parse_or("REDIS_COMMAND_TIMEOUT_MS", 2_000)?,
        })
    }

    pub fn connect_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.command_timeout_ms)
    }
}

/// Shared-secret JWT settings
#[derive(Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| SERVICE_NAME.to_string()),
        })
    }
}

/// Lifetimes of issued credentials, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSettings {
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub activation_ttl_secs: i64,
    pub password_reset_ttl_secs: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_ttl_secs: 30 * 60,
            refresh_ttl_secs: 24 * 60 * 60,
            activation_ttl_secs: 90,
            password_reset_ttl_secs: 15 * 60,
        }
    }
}

impl TokenSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            access_ttl_secs: parse_or("ACCESS_TOKEN_TTL_SECS", defaults.access_ttl_secs)?,
            refresh_ttl_secs: parse_or("REFRESH_TOKEN_TTL_SECS", defaults.refresh_ttl_secs)?,
            activation_ttl_secs: parse_or("ACTIVATION_CODE_TTL_SECS", defaults.activation_ttl_secs)?,
            password_reset_ttl_secs: parse_or(
                "PASSWORD_RESET_TTL_SECS",
                defaults.password_reset_ttl_secs,
            )?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let all = [
            ("ACCESS_TOKEN_TTL_SECS", self.access_ttl_secs),
            ("REFRESH_TOKEN_TTL_SECS", self.refresh_ttl_secs),
            ("ACTIVATION_CODE_TTL_SECS", self.activation_ttl_secs),
            ("PASSWORD_RESET_TTL_SECS", self.password_reset_ttl_secs),
        ];
        for (key, value) in all {
            if value <= 0 {
                return Err(anyhow!("{} must be positive", key));
            }
        }
        if self.refresh_ttl_secs <= self.access_ttl_secs {
            return Err(anyhow!(
                "REFRESH_TOKEN_TTL_SECS must exceed ACCESS_TOKEN_TTL_SECS"
            ));
        }
        Ok(())
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_ttl_secs)
    }

    pub fn activation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.activation_ttl_secs)
    }

    pub fn password_reset_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.password_reset_ttl_secs)
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingSettings {
    /// 64 MiB, 3 passes: roughly 100 ms per hash on current server hardware.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl HashingSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            memory_kib: parse_or("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or("ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or("ARGON2_PARALLELISM", defaults.parallelism)?,
        })
    }

    /// Minimal cost profile for local tooling and tests. Never use in production.
    pub fn low_cost() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// SMTP settings for the notification worker
#[derive(Clone)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
    pub password_reset_base_url: Option<String>,
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &self.smtp_password.as_ref().map(|_| "[REDACTED]"))
            .field("smtp_from", &self.smtp_from)
            .field("use_starttls", &self.use_starttls)
            .field("password_reset_base_url", &self.password_reset_base_url)
            .finish()
    }
}

impl EmailSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parse_or("SMTP_PORT", 1025)?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM")
                .unwrap_or_else(|_| "noreply@storefront.dev".to_string()),
            use_starttls: parse_or("SMTP_USE_STARTTLS", false)?,
            password_reset_base_url: env::var("EMAIL_PASSWORD_RESET_BASE_URL").ok(),
        })
    }
}

/// Background worker settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub queue_name: String,
    pub max_attempts: u32,
    pub purge_interval_secs: u64,
}

impl WorkerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            queue_name: env::var("EMAIL_QUEUE_NAME")
                .unwrap_or_else(|_| "identity:jobs:email".to_string()),
            max_attempts: parse_or("EMAIL_JOB_MAX_ATTEMPTS", 10)?,
            purge_interval_secs: parse_or("TOKEN_PURGE_INTERVAL_SECS", 3600)?,
        })
    }
}
