/// Redis-backed cache
use super::Cache;
use crate::error::{IdentityError, Result};
use async_trait::async_trait;
use redis_utils::SharedConnectionManager;
use std::time::Duration;

#[derive(Clone)]
pub struct RedisCache {
    redis: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisCache {
    pub fn new(redis: SharedConnectionManager, command_timeout: Duration) -> Self {
        Self {
            redis,
            command_timeout,
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        // SET EX rejects 0
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.redis.lock().await.clone();
        redis_utils::with_deadline(self.command_timeout, async {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
        .map_err(IdentityError::from)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.lock().await.clone();
        redis_utils::with_deadline(self.command_timeout, async {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
        })
        .await
        .map_err(IdentityError::from)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.lock().await.clone();
        redis_utils::with_deadline(self.command_timeout, async {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await
        .map(|_| ())
        .map_err(IdentityError::from)
    }
}
