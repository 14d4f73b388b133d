//! Background email jobs.
//!
//! Commands hand jobs to a [`JobDispatcher`] after their transaction commits.
//! Delivery is at-least-once: a claimed job stays on an in-flight list until
//! the worker acknowledges it, failed sends are scheduled for a later attempt
//! with exponential backoff, and jobs that keep failing are parked on a
//! dead-letter list. Jobs left in flight by a crashed worker are put back on
//! the queue when the next worker starts.

pub mod memory;
pub mod redis_queue;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryJobQueue;
pub use redis_queue::RedisJobQueue;
pub use worker::{spawn_email_worker, JobHandler, WorkerConfig};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EmailJob {
    #[serde(rename = "email:welcome")]
    Welcome {
        user_id: Uuid,
        email: String,
        first_name: String,
        code: String,
    },
    #[serde(rename = "email:verify")]
    ActivationCode {
        user_id: Uuid,
        email: String,
        first_name: String,
        code: String,
    },
    #[serde(rename = "email:password_reset")]
    PasswordReset {
        user_id: Uuid,
        email: String,
        first_name: String,
        token: String,
    },
}

impl EmailJob {
    pub fn job_type(&self) -> &'static str {
        match self {
            EmailJob::Welcome { .. } => "email:welcome",
            EmailJob::ActivationCode { .. } => "email:verify",
            EmailJob::PasswordReset { .. } => "email:password_reset",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            EmailJob::Welcome { user_id, .. }
            | EmailJob::ActivationCode { user_id, .. }
            | EmailJob::PasswordReset { user_id, .. } => *user_id,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            EmailJob::Welcome { email, .. }
            | EmailJob::ActivationCode { email, .. }
            | EmailJob::PasswordReset { email, .. } => email,
        }
    }
}

// Codes and reset tokens stay out of logs.
impl fmt::Debug for EmailJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailJob")
            .field("type", &self.job_type())
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}

/// A job as stored on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub job: EmailJob,
}

impl JobEnvelope {
    pub fn new(job: EmailJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            enqueued_at: Utc::now(),
            job,
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("queue error: {0}")]
    Queue(String),

    #[error("malformed job: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        JobError::Queue(err.to_string())
    }
}

/// Fire-and-forget submission used by the identity commands.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, job: EmailJob) -> Result<(), JobError>;
}

/// An envelope taken off the queue but not yet acknowledged.
///
/// `receipt` identifies the in-flight entry to the queue that issued it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub envelope: JobEnvelope,
    pub receipt: String,
}

/// Consumer side of a queue, driven by the worker.
///
/// Every claimed job ends in exactly one of `ack`, `retry_later` or
/// `dead_letter`; until then it survives a worker crash on the in-flight list.
#[async_trait]
pub trait JobQueue: JobDispatcher {
    /// Move the next due envelope onto the in-flight list, or `None` when
    /// nothing is due.
    async fn claim(&self) -> Result<Option<ClaimedJob>, JobError>;

    /// Drop a delivered job from the in-flight list.
    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), JobError>;

    /// Replace the in-flight entry with `claimed.envelope`, claimable again
    /// once `not_before` has passed.
    async fn retry_later(
        &self,
        claimed: &ClaimedJob,
        not_before: DateTime<Utc>,
    ) -> Result<(), JobError>;

    /// Park a job that will not be retried.
    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> Result<(), JobError>;

    /// Return every in-flight job to the queue. Only safe while no other
    /// worker consumes the same queue; returns how many were moved.
    async fn recover_in_flight(&self) -> Result<u64, JobError>;
}
