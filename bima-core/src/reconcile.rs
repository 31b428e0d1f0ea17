//! Reconciler: drives every non-terminal payment request to a terminal
//! state.
//!
//! A reconcile job is enqueued when a push goes out, delayed by the inline
//! polling timeout. Each firing queries the provider through the same
//! settlement path a callback takes; an unresolved request re-enqueues
//! with delay `initial_delay * 2^attempt`, and after `max_attempts` (or
//! past the request's `expires_at`) it is forced to TIMEOUT and the rider
//! is told manual review is underway.

use std::sync::Arc;
use std::time::Duration;

use common::backoff;
use common::shutdown::ShutdownChannel;
use common::time::TimestampMs;
use tracing::{debug, info, instrument, warn};

use crate::dispatch::EventDispatcher;
use crate::error::Error;
use crate::jobs::{Job, JobKind, JobQueue};
use crate::payments::manager::PaymentsManager;
use crate::payments::SettleOutcome;
use crate::store::Store;

/// Longest wait between provider polls regardless of attempt count.
const MAX_POLL_DELAY: Duration = Duration::from_secs(15 * 60);

/// How often the worker wakes to look for due jobs.
const WORKER_TICK: Duration = Duration::from_secs(5);

pub struct Reconciler {
    store: Arc<Store>,
    engine: Arc<PaymentsManager>,
    jobs: JobQueue,
    dispatcher: Arc<EventDispatcher>,
}

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        engine: Arc<PaymentsManager>,
        jobs: JobQueue,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            store,
            engine,
            jobs,
            dispatcher,
        }
    }

    /// The long-running worker: poll for due jobs until shutdown.
    pub async fn run(self, shutdown: ShutdownChannel) {
        info!("reconciler started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.recv() => break,
                () = tokio::time::sleep(WORKER_TICK) => {
                    let now = TimestampMs::now();
                    if let Err(e) = self.process_due(now).await {
                        warn!("reconciler pass failed: {e:#}");
                    }
                }
            }
        }
        info!("reconciler stopped");
    }

    /// One reconciliation pass: handle every due job, then expire stale
    /// requests that have no pending job. Returns how many jobs ran.
    #[instrument(skip_all, name = "(reconcile-pass)")]
    pub async fn process_due(&self, now: TimestampMs) -> Result<usize, Error> {
        let due = self.jobs.take_due(now);
        let count = due.len();
        for job in due {
            match job.kind.clone() {
                JobKind::ReconcilePayment { request_id } => {
                    self.reconcile_one(job, request_id, now).await;
                }
                // Other job kinds belong to other workers; requeue
                // untouched.
                _ => {
                    self.jobs.retry_later(job, now, "wrong worker");
                }
            }
        }
        self.expire_stale(now).await?;
        Ok(count)
    }

    async fn reconcile_one(
        &self,
        job: Job,
        request_id: common::ids::PaymentRequestId,
        now: TimestampMs,
    ) {
        let request = match self
            .store
            .read(|state| state.payment_request(request_id).cloned())
        {
            Ok(req) => req,
            Err(e) => {
                warn!("reconcile job for missing request: {e:#}");
                return;
            }
        };
        if request.is_terminal() {
            debug!(
                request = %request_id.short(),
                "request already terminal, dropping job",
            );
            return;
        }

        let exhausted = job.attempt + 1 >= job.max_attempts;
        let expired = now >= request.expires_at;

        match self.engine.refresh_payment_status(request_id).await {
            Ok((SettleOutcome::StillPending, _))
                if exhausted || expired =>
            {
                self.give_up(request_id).await;
            }
            Ok((SettleOutcome::StillPending, _)) => {
                self.requeue(job, now, "still pending");
            }
            Ok((outcome, events)) => {
                info!(
                    request = %request_id.short(),
                    ?outcome,
                    "reconciler resolved request",
                );
                self.dispatcher.dispatch(events).await;
            }
            Err(e) if e.is_retryable() && !exhausted && !expired => {
                self.requeue(job, now, format!("{e:#}"));
            }
            Err(e) => {
                warn!(
                    request = %request_id.short(),
                    "reconciler giving up: {e:#}",
                );
                self.give_up(request_id).await;
            }
        }
    }

    fn requeue(&self, job: Job, now: TimestampMs, reason: impl ToString) {
        // Delay grows as initial_delay * 2^attempt, bounded.
        let initial = self.engine.config().inline_poll_timeout;
        let exp = backoff::delay_for_attempt(initial, job.attempt + 2)
            .min(MAX_POLL_DELAY);
        let run_at = now.saturating_add(exp);
        let job = self.jobs.retry_later(job, run_at, reason);
        debug!(
            attempt = job.attempt,
            %run_at,
            "re-enqueued reconcile job",
        );
    }

    async fn give_up(&self, request_id: common::ids::PaymentRequestId) {
        match self.engine.force_timeout(request_id) {
            Ok((_, events)) => self.dispatcher.dispatch(events).await,
            Err(e) => warn!(
                request = %request_id.short(),
                "failed to force timeout: {e:#}",
            ),
        }
    }

    /// Requests past their absolute cutoff with no queued job (e.g. the
    /// push never got a checkout id) are forced terminal here.
    async fn expire_stale(&self, now: TimestampMs) -> Result<(), Error> {
        let stale: Vec<_> = self.store.read(|state| {
            state
                .non_terminal_requests()
                .into_iter()
                .filter(|r| now >= r.expires_at)
                .filter(|r| {
                    // Skip requests that still have a queued job; their
                    // job owns the decision.
                    !state.jobs.values().any(|j| {
                        j.status == crate::jobs::JobStatus::Queued
                            && j.kind
                                == JobKind::ReconcilePayment {
                                    request_id: r.id,
                                }
                    })
                })
                .map(|r| r.id)
                .collect()
        });
        for request_id in stale {
            info!(
                request = %request_id.short(),
                "expiring stale request",
            );
            self.give_up(request_id).await;
        }
        Ok(())
    }
}
