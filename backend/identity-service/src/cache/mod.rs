//! Key/value cache holding the live session markers.
//!
//! Every login session has an `access:<user_id>:<session_id>` and a
//! `refresh:<user_id>:<session_id>` entry. Both expire with the token they
//! describe.

pub mod keys;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;
pub use keys::{access_key, refresh_key};

#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
