/// Email job worker
///
/// Claims envelopes one at a time and hands them to a [`JobHandler`]. A failed
/// attempt is rescheduled `base_backoff * 2^attempts` (capped at
/// `max_backoff`) into the future while the worker moves on to the next job;
/// once `max_attempts` is reached the envelope is moved to the dead-letter
/// list. On start the worker reclaims whatever a previous run left in flight.
use super::{EmailJob, JobError, JobQueue};
use crate::config::WorkerSettings;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn, Instrument};

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &EmailJob) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_attempts: 10,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Idle,
    Delivered,
    Retried,
    DeadLettered,
    Dropped,
}

pub fn spawn_email_worker(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
) -> JoinHandle<()> {
    info!(
        poll_interval_ms = %config.poll_interval.as_millis(),
        max_attempts = config.max_attempts,
        max_backoff_secs = config.max_backoff.as_secs(),
        "Starting email job worker"
    );

    tokio::spawn(async move {
        if let Err(err) = queue.recover_in_flight().await {
            error!(error = %err, "failed to recover in-flight email jobs");
        }

        loop {
            match process_next(queue.as_ref(), handler.as_ref(), &config).await {
                Ok(JobOutcome::Idle) => sleep(config.poll_interval).await,
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "email worker iteration failed");
                    sleep(config.poll_interval).await;
                }
            }
        }
    })
}

/// Take one envelope off the queue and run it to a terminal or retry state.
pub async fn process_next(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    config: &WorkerConfig,
) -> std::result::Result<JobOutcome, JobError> {
    let mut claimed = match queue.claim().await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => return Ok(JobOutcome::Idle),
        Err(JobError::Malformed(err)) => {
            warn!(error = %err, "dropping malformed job");
            return Ok(JobOutcome::Dropped);
        }
        Err(err) => return Err(err),
    };

    let span = tracing::info_span!(
        "email_job",
        job_id = %claimed.envelope.id,
        job_type = claimed.envelope.job.job_type(),
        attempts = claimed.envelope.attempts
    );

    async move {
        match handler.handle(&claimed.envelope.job).await {
            Ok(()) => {
                queue.ack(&claimed).await?;
                debug!("email job delivered");
                Ok(JobOutcome::Delivered)
            }
            Err(err) => {
                let envelope = &mut claimed.envelope;
                envelope.attempts = envelope.attempts.saturating_add(1);
                let attempts = envelope.attempts;
                warn!(error = %err, attempt = attempts, "email job failed");

                if attempts >= config.max_attempts {
                    queue.dead_letter(&claimed, &err.to_string()).await?;
                    error!(attempts, "email job moved to dead-letter list");
                    return Ok(JobOutcome::DeadLettered);
                }

                let backoff =
                    calculate_backoff(config.base_backoff, config.max_backoff, attempts - 1);
                let delay = chrono::Duration::from_std(backoff)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                queue.retry_later(&claimed, Utc::now() + delay).await?;
                debug!(backoff_ms = %backoff.as_millis(), "email job rescheduled");
                Ok(JobOutcome::Retried)
            }
        }
    }
    .instrument(span)
    .await
}

fn calculate_backoff(base: Duration, max: Duration, retry_count: u32) -> Duration {
    let shift = retry_count.min(16);
    base.saturating_mul(1_u32 << shift).min(max)
}
