//! Durable-in-store delayed job queue.
//!
//! Used by the reconciler (delayed payment polls) and the notification
//! sweeps. The queue is an at-least-once bus: consumers must be idempotent
//! on their message key. A failed job re-enqueues itself with a computed
//! delay; past `max_attempts` it is parked in a dead-letter state with
//! context rather than lost.

use common::ids::{JobId, PaymentRequestId};
use common::rng::Crng;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::store::Store;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobKind {
    /// Poll the provider for a payment request that hasn't resolved inline.
    ReconcilePayment { request_id: PaymentRequestId },
    /// Re-enter scheduled / deferred notifications that have come due.
    NotifySweep,
    /// Expire policies whose coverage has ended.
    PolicyExpirySweep,
}

impl JobKind {
    /// The idempotency key consumers dedupe on.
    pub fn message_key(&self) -> String {
        match self {
            Self::ReconcilePayment { request_id } =>
                format!("reconcile-{request_id}"),
            Self::NotifySweep => "notify-sweep".to_owned(),
            Self::PolicyExpirySweep => "policy-expiry-sweep".to_owned(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    /// Dead-lettered after exhausting `max_attempts`.
    Parked,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub attempt: u32,
    pub max_attempts: u32,
    pub run_at: TimestampMs,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: TimestampMs,
}

/// Handle for enqueueing and claiming jobs. Thin sugar over the store.
#[derive(Clone)]
pub struct JobQueue {
    store: std::sync::Arc<Store>,
}

impl JobQueue {
    pub fn new(store: std::sync::Arc<Store>) -> Self {
        Self { store }
    }

    pub fn enqueue(
        &self,
        rng: &mut impl Crng,
        kind: JobKind,
        run_at: TimestampMs,
        max_attempts: u32,
    ) -> Job {
        let job = Job {
            id: JobId::from_rng(rng),
            kind,
            attempt: 0,
            max_attempts,
            run_at,
            status: JobStatus::Queued,
            last_error: None,
            created_at: TimestampMs::now(),
        };
        self.store.must_transact(|state| {
            state.jobs.insert(job.id, job.clone());
            Ok(())
        });
        job
    }

    /// Atomically remove and return all queued jobs due at `now`, ordered by
    /// `run_at`. The caller owns processing them; re-enqueueing on failure
    /// is the caller's responsibility.
    pub fn take_due(&self, now: TimestampMs) -> Vec<Job> {
        self.store.must_transact(|state| {
            let mut due: Vec<Job> = state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued && j.run_at <= now)
                .cloned()
                .collect();
            due.sort_by_key(|j| (j.run_at, j.id));
            for job in &due {
                state.jobs.remove(&job.id);
            }
            Ok(due)
        })
    }

    /// Requeue a failed job with the next attempt count and delay, or park
    /// it if attempts are exhausted.
    pub fn retry_later(
        &self,
        mut job: Job,
        run_at: TimestampMs,
        error: impl ToString,
    ) -> Job {
        job.attempt += 1;
        job.last_error = Some(error.to_string());
        if job.attempt >= job.max_attempts {
            job.status = JobStatus::Parked;
        } else {
            job.run_at = run_at;
        }
        self.store.must_transact(|state| {
            state.jobs.insert(job.id, job.clone());
            Ok(())
        });
        job
    }

    /// The earliest `run_at` among queued jobs, for worker sleep pacing.
    pub fn next_due_at(&self) -> Option<TimestampMs> {
        self.store.read(|state| {
            state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued)
                .map(|j| j.run_at)
                .min()
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use common::rng::SmallRng;

    use super::*;

    #[test]
    fn due_jobs_come_out_in_run_at_order() {
        let store = Arc::new(Store::new());
        let queue = JobQueue::new(store);
        let mut rng = SmallRng::from_u64(1);
        let now = TimestampMs::now();

        let later = queue.enqueue(
            &mut rng,
            JobKind::NotifySweep,
            now.saturating_add(Duration::from_secs(60)),
            3,
        );
        let sooner = queue.enqueue(
            &mut rng,
            JobKind::PolicyExpirySweep,
            now,
            3,
        );
        assert_eq!(queue.next_due_at(), Some(now));

        // Only the due job is claimed, and claiming removes it.
        let due = queue.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, sooner.id);
        assert!(queue.take_due(now).is_empty());

        let due = queue.take_due(later.run_at);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, later.id);
    }

    #[test]
    fn retry_parks_after_max_attempts() {
        let store = Arc::new(Store::new());
        let queue = JobQueue::new(store.clone());
        let mut rng = SmallRng::from_u64(2);
        let now = TimestampMs::now();

        queue.enqueue(&mut rng, JobKind::NotifySweep, now, 2);
        let mut job = queue.take_due(now).remove(0);

        // First failure requeues...
        job = queue.retry_later(job, now, "boom");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 1);
        job = queue.take_due(now).remove(0);

        // ...second failure dead-letters with context.
        let parked = queue.retry_later(job, now, "boom again");
        assert_eq!(parked.status, JobStatus::Parked);
        assert_eq!(parked.last_error.as_deref(), Some("boom again"));
        assert!(queue.take_due(now).is_empty());
        store.read(|state| {
            assert!(state.jobs.contains_key(&parked.id));
        });
    }
}
