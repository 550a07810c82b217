use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;

use crate::domain::ReportId;

/// One unit of analysis work. Jobs carry the report id as their dedup key
/// and no payload beyond the delivery attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub report_id: ReportId,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// Durable job queue abstraction with at-least-once delivery semantics.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue an analysis job. Returns `false` when a job for the same
    /// report is already queued or being processed.
    async fn enqueue(&self, report_id: ReportId) -> Result<bool>;

    /// Pop the next ready job, if any.
    async fn dequeue(&self) -> Result<Option<Job>>;

    /// The job is settled; drop its dedup reservation.
    async fn ack(&self, job: &Job) -> Result<()>;

    /// Redeliver the job after a delay, with the attempt counter bumped.
    async fn nack(&self, job: &Job, delay: Duration) -> Result<()>;
}

/// In-process queue used by the CLI and tests.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Job>,
    delayed: Vec<(Instant, Job)>,
    reserved: HashSet<ReportId>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, report_id: ReportId) -> Result<bool> {
        let mut inner = self.lock();
        if !inner.reserved.insert(report_id) {
            trace!(report = %report_id, "duplicate enqueue ignored");
            return Ok(false);
        }
        inner.ready.push_back(Job {
            report_id,
            attempt: 1,
        });
        Ok(true)
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        let mut still_waiting = Vec::new();
        for (ready_at, job) in inner.delayed.drain(..) {
            if ready_at <= now {
                inner.ready.push_back(job);
            } else {
                still_waiting.push((ready_at, job));
            }
        }
        inner.delayed = still_waiting;
        Ok(inner.ready.pop_front())
    }

    async fn ack(&self, job: &Job) -> Result<()> {
        self.lock().reserved.remove(&job.report_id);
        Ok(())
    }

    async fn nack(&self, job: &Job, delay: Duration) -> Result<()> {
        let mut inner = self.lock();
        let redelivery = Job {
            report_id: job.report_id,
            attempt: job.attempt + 1,
        };
        if delay.is_zero() {
            inner.ready.push_back(redelivery);
        } else {
            inner.delayed.push((Instant::now() + delay, redelivery));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_dedups_on_report_id() {
        let queue = MemoryJobQueue::new();
        let id = ReportId::new();
        assert!(queue.enqueue(id).await.unwrap());
        assert!(!queue.enqueue(id).await.unwrap());

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.report_id, id);
        assert_eq!(job.attempt, 1);
        // Still reserved until acked.
        assert!(!queue.enqueue(id).await.unwrap());

        queue.ack(&job).await.unwrap();
        assert!(queue.enqueue(id).await.unwrap());
    }

    #[tokio::test]
    async fn nack_bumps_attempt_and_redelivers() {
        let queue = MemoryJobQueue::new();
        let id = ReportId::new();
        queue.enqueue(id).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();

        queue.nack(&job, Duration::ZERO).await.unwrap();
        let redelivered = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(redelivered.attempt, 2);
    }

    #[tokio::test]
    async fn delayed_redelivery_is_not_ready_immediately() {
        let queue = MemoryJobQueue::new();
        let id = ReportId::new();
        queue.enqueue(id).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();

        queue.nack(&job, Duration::from_secs(60)).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
    }
}
