/// Redis list backed job queue
///
/// Producers `LPUSH` JSON envelopes onto the queue key. The worker claims the
/// oldest one with `LMOVE` onto `<queue>:processing` and removes it from there
/// once it is delivered, rescheduled or dead. Rescheduled jobs wait in the
/// `<queue>:retry` sorted set, scored by the epoch millisecond they become due.
/// Dead jobs go to `<queue>:dead`.
use super::{ClaimedJob, EmailJob, JobDispatcher, JobEnvelope, JobError, JobQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis_utils::SharedConnectionManager;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

// Promote due retries, then claim the oldest pending job.
const CLAIM_SCRIPT: &str = r#"
    local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
    for _, raw in ipairs(due) do
        redis.call('ZREM', KEYS[3], raw)
        redis.call('LPUSH', KEYS[1], raw)
    end
    return redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT')
"#;

// Newest in-flight first onto the claiming end, so the oldest is claimed first.
const RECOVER_SCRIPT: &str = r#"
    local moved = 0
    while redis.call('LMOVE', KEYS[1], KEYS[2], 'LEFT', 'RIGHT') do
        moved = moved + 1
    end
    return moved
"#;

#[derive(Clone)]
pub struct RedisJobQueue {
    redis: SharedConnectionManager,
    queue: String,
    processing_queue: String,
    retry_set: String,
    dead_letter_queue: String,
    command_timeout: Duration,
}

impl RedisJobQueue {
    pub fn new(redis: SharedConnectionManager, queue: &str, command_timeout: Duration) -> Self {
        Self {
            redis,
            queue: queue.to_string(),
            processing_queue: format!("{}:processing", queue),
            retry_set: format!("{}:retry", queue),
            dead_letter_queue: format!("{}:dead", queue),
            command_timeout,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Atomically remove `receipt` from the in-flight list and run `then`.
    async fn settle(&self, receipt: &str, then: redis::Cmd) -> Result<(), JobError> {
        let mut conn = self.redis.lock().await.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(&self.processing_queue)
            .arg(1)
            .arg(receipt)
            .ignore()
            .add_command(then)
            .ignore();

        redis_utils::with_deadline(self.command_timeout, pipe.query_async::<_, ()>(&mut conn))
            .await?;
        Ok(())
    }

    fn dead_letter_cmd(&self, payload: serde_json::Value) -> redis::Cmd {
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(&self.dead_letter_queue).arg(payload.to_string());
        cmd
    }
}

#[async_trait]
impl JobDispatcher for RedisJobQueue {
    async fn enqueue(&self, job: EmailJob) -> Result<(), JobError> {
        let envelope = JobEnvelope::new(job);
        let payload = serde_json::to_string(&envelope)?;

        let mut conn = self.redis.lock().await.clone();
        redis_utils::with_deadline(self.command_timeout, async {
            redis::cmd("LPUSH")
                .arg(&self.queue)
                .arg(payload)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;

        debug!(
            job_id = %envelope.id,
            job_type = envelope.job.job_type(),
            queue = %self.queue,
            "job enqueued"
        );
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn claim(&self) -> Result<Option<ClaimedJob>, JobError> {
        let mut conn = self.redis.lock().await.clone();
        let raw = redis_utils::with_deadline(
            self.command_timeout,
            redis::Script::new(CLAIM_SCRIPT)
                .key(&self.queue)
                .key(&self.processing_queue)
                .key(&self.retry_set)
                .arg(Utc::now().timestamp_millis())
                .invoke_async::<_, Option<String>>(&mut conn),
        )
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<JobEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(ClaimedJob {
                envelope,
                receipt: raw,
            })),
            Err(err) => {
                warn!(error = %err, queue = %self.queue, "parking malformed job");
                let payload = json!({
                    "raw": raw,
                    "reason": err.to_string(),
                    "failed_at": Utc::now(),
                });
                self.settle(&raw, self.dead_letter_cmd(payload)).await?;
                Err(JobError::Malformed(err))
            }
        }
    }

    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), JobError> {
        let mut conn = self.redis.lock().await.clone();
        redis_utils::with_deadline(self.command_timeout, async {
            redis::cmd("LREM")
                .arg(&self.processing_queue)
                .arg(1)
                .arg(&claimed.receipt)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn retry_later(
        &self,
        claimed: &ClaimedJob,
        not_before: DateTime<Utc>,
    ) -> Result<(), JobError> {
        let payload = serde_json::to_string(&claimed.envelope)?;
        let mut zadd = redis::cmd("ZADD");
        zadd.arg(&self.retry_set)
            .arg(not_before.timestamp_millis())
            .arg(payload);
        self.settle(&claimed.receipt, zadd).await
    }

    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> Result<(), JobError> {
        let payload = json!({
            "envelope": claimed.envelope,
            "reason": reason,
            "failed_at": Utc::now(),
        });
        self.settle(&claimed.receipt, self.dead_letter_cmd(payload))
            .await
    }

    async fn recover_in_flight(&self) -> Result<u64, JobError> {
        let mut conn = self.redis.lock().await.clone();
        let moved = redis_utils::with_deadline(
            self.command_timeout,
            redis::Script::new(RECOVER_SCRIPT)
                .key(&self.processing_queue)
                .key(&self.queue)
                .invoke_async::<_, u64>(&mut conn),
        )
        .await?;

        if moved > 0 {
            info!(moved, queue = %self.queue, "returned in-flight jobs to the queue");
        }
        Ok(moved)
    }
}
