/// In-process job queue
use super::{ClaimedJob, EmailJob, JobDispatcher, JobEnvelope, JobError, JobQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<JobEnvelope>,
    // claim order
    in_flight: Vec<(String, JobEnvelope)>,
    delayed: Vec<(DateTime<Utc>, JobEnvelope)>,
    dispatched: Vec<EmailJob>,
    dead: Vec<(JobEnvelope, String)>,
}

impl QueueState {
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .delayed
            .drain(..)
            .partition(|(not_before, _)| *not_before <= now);
        self.delayed = waiting;
        self.pending
            .extend(due.into_iter().map(|(_, envelope)| envelope));
    }
}

#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    failing: Arc<AtomicBool>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, `enqueue` fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every job accepted by `enqueue`, in order.
    pub fn dispatched(&self) -> Vec<EmailJob> {
        self.lock().dispatched.clone()
    }

    /// Jobs waiting to be claimed, due or not.
    pub fn pending_len(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.delayed.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Rescheduled jobs whose retry time has not come yet.
    pub fn delayed_len(&self) -> usize {
        let now = Utc::now();
        self.lock()
            .delayed
            .iter()
            .filter(|(not_before, _)| *not_before > now)
            .count()
    }

    pub fn dead_letters(&self) -> Vec<(JobEnvelope, String)> {
        self.lock().dead.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // poisoning carries no invariant here
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_in_flight(state: &mut QueueState, claimed: &ClaimedJob) -> Result<(), JobError> {
        let position = state
            .in_flight
            .iter()
            .position(|(receipt, _)| *receipt == claimed.receipt)
            .ok_or_else(|| JobError::Queue(format!("unknown receipt {}", claimed.receipt)))?;
        state.in_flight.remove(position);
        Ok(())
    }
}

#[async_trait]
impl JobDispatcher for MemoryJobQueue {
    async fn enqueue(&self, job: EmailJob) -> Result<(), JobError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(JobError::Queue("queue unavailable".to_string()));
        }
        let mut state = self.lock();
        state.dispatched.push(job.clone());
        state.pending.push_back(JobEnvelope::new(job));
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn claim(&self) -> Result<Option<ClaimedJob>, JobError> {
        let mut state = self.lock();
        state.promote_due(Utc::now());

        let Some(envelope) = state.pending.pop_front() else {
            return Ok(None);
        };
        let receipt = envelope.id.to_string();
        state.in_flight.push((receipt.clone(), envelope.clone()));
        Ok(Some(ClaimedJob { envelope, receipt }))
    }

    async fn ack(&self, claimed: &ClaimedJob) -> Result<(), JobError> {
        Self::take_in_flight(&mut self.lock(), claimed)
    }

    async fn retry_later(
        &self,
        claimed: &ClaimedJob,
        not_before: DateTime<Utc>,
    ) -> Result<(), JobError> {
        let mut state = self.lock();
        Self::take_in_flight(&mut state, claimed)?;
        state.delayed.push((not_before, claimed.envelope.clone()));
        Ok(())
    }

    async fn dead_letter(&self, claimed: &ClaimedJob, reason: &str) -> Result<(), JobError> {
        let mut state = self.lock();
        Self::take_in_flight(&mut state, claimed)?;
        state
            .dead
            .push((claimed.envelope.clone(), reason.to_string()));
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, JobError> {
        let mut state = self.lock();
        let recovered: Vec<_> = state.in_flight.drain(..).collect();

        let moved = recovered.len() as u64;
        for (_, envelope) in recovered.into_iter().rev() {
            state.pending.push_front(envelope);
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn job(email: &str) -> EmailJob {
        EmailJob::ActivationCode {
            user_id: Uuid::new_v4(),
            email: email.into(),
            first_name: "Ada".into(),
            code: "123456".into(),
        }
    }

    #[tokio::test]
    async fn test_claimed_job_stays_in_flight_until_ack() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job("ada@example.com")).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(queue.in_flight_len(), 1);
        assert_eq!(queue.pending_len(), 0);

        queue.ack(&claimed).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert!(queue.ack(&claimed).await.is_err());
    }

    #[tokio::test]
    async fn test_delayed_job_is_not_claimed_early() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job("ada@example.com")).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        queue
            .retry_later(&claimed, Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.delayed_len(), 1);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_recovered_jobs_keep_their_order() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job("first@example.com")).await.unwrap();
        queue.enqueue(job("second@example.com")).await.unwrap();
        queue.enqueue(job("third@example.com")).await.unwrap();

        queue.claim().await.unwrap().unwrap();
        queue.claim().await.unwrap().unwrap();
        assert_eq!(queue.recover_in_flight().await.unwrap(), 2);

        let mut order = Vec::new();
        while let Some(claimed) = queue.claim().await.unwrap() {
            order.push(claimed.envelope.job.recipient().to_string());
        }
        assert_eq!(
            order,
            ["first@example.com", "second@example.com", "third@example.com"]
        );
    }
}
