//! Batch scheduler: turns pending policies into active ones.
//!
//! Three fixed wall-clock runs per day (08:00, 14:00, 20:00 in the
//! deployment offset) plus on-demand manual runs. The `(batch_date,
//! schedule)` unique row is the only cluster-wide lock: a second concurrent
//! invocation of the same scheduled batch fails the insert and touches
//! nothing.
//!
//! Per-policy activation is failure-isolated: one bad policy lands in the
//! batch's failed list while the rest activate, and `retry_failed`
//! re-attempts just that subset with the same deterministic policy numbers.

use std::sync::{Arc, Mutex};

use chrono::{FixedOffset, NaiveDate, TimeZone};
use common::constants::BATCH_TIMES;
use common::enums::{BatchSchedule, BatchStatus, PolicyStatus};
use common::ids::{BatchId, PolicyId};
use common::money::Amount;
use common::rng::Crng;
use common::time::TimestampMs;
use tracing::{info, instrument, warn};

use crate::error::Error;
use crate::events::DomainEvent;
use crate::ledger;
use crate::models::batch::PolicyBatch;
use crate::store::{State, Store};

#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Deployment time zone as a fixed UTC offset in hours (Nairobi: +3;
    /// no DST).
    pub utc_offset_hours: i32,
    /// Platform share of earned premium, in basis points.
    pub platform_commission_bps: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 3,
            platform_commission_bps:
                common::constants::DEFAULT_PLATFORM_COMMISSION_BPS,
        }
    }
}

pub struct BatchProcessor {
    store: Arc<Store>,
    rng: Mutex<Box<dyn Crng + Send>>,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<Store>,
        rng: Box<dyn Crng + Send>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            rng: Mutex::new(rng),
            config,
        }
    }

    fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.config.utc_offset_hours * 3600)
            .expect("offset hours are sane")
    }

    /// The local calendar date `now` falls on.
    pub fn batch_date(&self, now: TimestampMs) -> NaiveDate {
        now.to_datetime().with_timezone(&self.offset()).date_naive()
    }

    /// The wall-clock timestamp of `schedule` on `date`; `None` for manual
    /// batches, which are scheduled "now" by definition.
    fn scheduled_time(
        &self,
        schedule: BatchSchedule,
        date: NaiveDate,
    ) -> Option<TimestampMs> {
        let (hour, minute) = match schedule {
            BatchSchedule::Batch1 => BATCH_TIMES[0],
            BatchSchedule::Batch2 => BATCH_TIMES[1],
            BatchSchedule::Batch3 => BATCH_TIMES[2],
            BatchSchedule::Manual => return None,
        };
        let local = date
            .and_hms_opt(hour, minute, 0)
            .expect("batch times are valid");
        let dt = self
            .offset()
            .from_local_datetime(&local)
            .single()
            .expect("fixed offsets have no ambiguous local times");
        Some(TimestampMs::from_datetime(dt.with_timezone(&chrono::Utc)))
    }

    /// The payment window this schedule covers, for the batch record. The
    /// claim set is every pending policy settled at or before the window
    /// end; the start is reporting metadata.
    fn window(
        &self,
        schedule: BatchSchedule,
        date: NaiveDate,
        now: TimestampMs,
    ) -> (TimestampMs, TimestampMs) {
        let midnight = {
            let local = date.and_hms_opt(0, 0, 0).expect("midnight exists");
            let dt = self
                .offset()
                .from_local_datetime(&local)
                .single()
                .expect("fixed offsets have no ambiguous local times");
            TimestampMs::from_datetime(dt.with_timezone(&chrono::Utc))
        };
        match schedule {
            BatchSchedule::Batch1 => (
                midnight,
                self.scheduled_time(schedule, date).expect("scheduled"),
            ),
            BatchSchedule::Batch2 => (
                self.scheduled_time(BatchSchedule::Batch1, date)
                    .expect("scheduled"),
                self.scheduled_time(schedule, date).expect("scheduled"),
            ),
            BatchSchedule::Batch3 => (
                self.scheduled_time(BatchSchedule::Batch2, date)
                    .expect("scheduled"),
                self.scheduled_time(schedule, date).expect("scheduled"),
            ),
            BatchSchedule::Manual => (TimestampMs::MIN, now),
        }
    }

    /// Run one batch: open the batch row, claim the window's pending
    /// policies, activate them one by one, and finalize the totals.
    #[instrument(skip_all, name = "(process-batch)", fields(?schedule))]
    pub fn process_batch(
        &self,
        schedule: BatchSchedule,
        now: TimestampMs,
    ) -> Result<(PolicyBatch, Vec<DomainEvent>), Error> {
        let date = self.batch_date(now);
        let scheduled_for =
            self.scheduled_time(schedule, date).unwrap_or(now);
        let (window_start, window_end) = self.window(schedule, date, now);

        let batch_id = {
            let mut rng = self.rng.lock().unwrap();
            BatchId::from_rng(&mut *rng)
        };

        // Step 1+2: open the batch row (the cluster lock) and claim the
        // window's pending policies, atomically.
        let (claimed, _) = self.store.transact(|state| {
            let batch = PolicyBatch {
                id: batch_id,
                schedule,
                batch_date: date,
                batch_number: PolicyBatch::batch_number(date, schedule),
                status: BatchStatus::Processing,
                scheduled_for,
                payment_window_start: window_start,
                payment_window_end: window_end,
                total_policies: 0,
                issued_count: 0,
                failed_count: 0,
                total_premium: Amount::ZERO,
                failed_policies: Vec::new(),
                started_at: now,
                completed_at: None,
            };
            state.insert_batch(batch)?;

            let claimable = state.pending_policies_settled_by(window_end);
            let mut claimed = Vec::with_capacity(claimable.len());
            for (policy, _) in &claimable {
                let policy = state.policy_mut(policy.id)?;
                policy.status = PolicyStatus::Processing;
                policy.batch_id = Some(batch_id);
                claimed.push(policy.id);
            }
            state.batch_mut(batch_id)?.total_policies =
                claimed.len() as u32;
            Ok(claimed)
        })?;

        info!(
            batch = %batch_id.short(),
            claimed = claimed.len(),
            "batch opened",
        );

        // Step 3: per-policy activation, failure-isolated.
        let events = self.activate_claimed(batch_id, &claimed, now)?;

        // Step 4: finalize.
        let (batch, _) = self.store.transact(|state| {
            let batch = state.batch_mut(batch_id)?;
            batch.status = if batch.failed_count == 0 {
                BatchStatus::Completed
            } else {
                BatchStatus::CompletedWithErrors
            };
            batch.completed_at = Some(TimestampMs::now());
            Ok(batch.clone())
        })?;

        info!(
            batch = %batch_id.short(),
            issued = batch.issued_count,
            failed = batch.failed_count,
            "batch finished",
        );
        Ok((batch, events))
    }

    /// Re-attempt activation for the subset of a batch's policies still in
    /// PROCESSING. Policy numbers are recomputed from the same ordering, so
    /// a retried policy gets the number it would have gotten originally.
    #[instrument(skip_all, name = "(retry-batch)")]
    pub fn retry_failed(
        &self,
        batch_id: BatchId,
    ) -> Result<(PolicyBatch, Vec<DomainEvent>), Error> {
        let now = TimestampMs::now();
        let claimed = self.store.read(|state| {
            claimed_policies_ordered(state, batch_id)
        });

        self.store.must_transact(|state| {
            let batch = state.batch_mut(batch_id)?;
            batch.status = BatchStatus::Processing;
            batch.failed_count = 0;
            batch.failed_policies.clear();
            Ok(())
        });

        let events = self.activate_claimed(batch_id, &claimed, now)?;

        let (batch, _) = self.store.transact(|state| {
            let batch = state.batch_mut(batch_id)?;
            batch.status = if batch.failed_count == 0 {
                BatchStatus::Completed
            } else {
                BatchStatus::CompletedWithErrors
            };
            batch.completed_at = Some(TimestampMs::now());
            Ok(batch.clone())
        })?;
        Ok((batch, events))
    }

    /// Activate each claimed policy in its own transaction. `claimed` must
    /// be in window order; the 1-based position is the policy's sequence
    /// number within the batch.
    fn activate_claimed(
        &self,
        batch_id: BatchId,
        claimed: &[PolicyId],
        now: TimestampMs,
    ) -> Result<Vec<DomainEvent>, Error> {
        let commission_bps = self.config.platform_commission_bps;
        let mut events = Vec::new();

        for (index, policy_id) in claimed.iter().copied().enumerate() {
            let sequence = (index + 1) as u32;
            let mut rng = self.rng.lock().unwrap();
            let result = self.store.transact(|state| {
                let batch = state.batch(batch_id)?.clone();
                let policy = state.policy_mut(policy_id)?;

                // Idempotency on retry: already-activated policies keep
                // their number and are simply counted.
                if policy.status == PolicyStatus::Active {
                    return Ok(None);
                }

                let policy_number = batch.policy_number(sequence);
                policy.activate(
                    policy_number.clone(),
                    batch_id,
                    batch.scheduled_for,
                    now,
                )?;
                let premium = policy.premium_amount;
                let rider_id = policy.rider_id;
                let transaction_id = policy.triggering_transaction_id;

                ledger::post_premium_earned(
                    state,
                    &mut *rng,
                    premium,
                    commission_bps,
                    transaction_id,
                    &policy_number,
                    now,
                )?;

                let batch = state.batch_mut(batch_id)?;
                batch.issued_count += 1;
                batch.total_premium = batch.total_premium + premium;

                state.emit(DomainEvent::PolicyActivated {
                    policy_id,
                    rider_id,
                });
                Ok(Some(()))
            });

            match result {
                Ok((_, mut committed)) => events.append(&mut committed),
                Err(e) => {
                    warn!(
                        policy = %policy_id.short(),
                        "policy activation failed: {e:#}",
                    );
                    self.store.must_transact(|state| {
                        let batch = state.batch_mut(batch_id)?;
                        batch.failed_count += 1;
                        batch
                            .failed_policies
                            .push((policy_id, format!("{e:#}")));
                        Ok(())
                    });
                }
            }
        }
        Ok(events)
    }
}

/// Every policy claimed by `batch_id`, in the batch's deterministic
/// ordering: ascending triggering-transaction settlement time, ties broken
/// by transaction id.
fn claimed_policies_ordered(
    state: &State,
    batch_id: BatchId,
) -> Vec<PolicyId> {
    let mut claimed: Vec<(TimestampMs, common::ids::TransactionId, PolicyId)> =
        state
            .policies
            .values()
            .filter(|p| p.batch_id == Some(batch_id))
            .filter_map(|p| {
                let tx =
                    state.transactions.get(&p.triggering_transaction_id)?;
                Some((tx.settled_at, tx.id, p.id))
            })
            .collect();
    claimed.sort();
    claimed.into_iter().map(|(_, _, id)| id).collect()
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;

    fn processor() -> BatchProcessor {
        BatchProcessor::new(
            Arc::new(Store::new()),
            Box::new(common::rng::SmallRng::from_u64(5)),
            BatchConfig::default(),
        )
    }

    fn ts(s: &str) -> TimestampMs {
        let dt = chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .with_timezone(&Utc);
        TimestampMs::from_datetime(dt)
    }

    #[test]
    fn batch_date_uses_local_offset() {
        let processor = processor();
        // 22:30 UTC on March 4 is 01:30 on March 5 in Nairobi.
        let now = ts("2026-03-04T22:30:00Z");
        assert_eq!(
            processor.batch_date(now),
            NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
        );
    }

    #[test]
    fn scheduled_time_is_local_wall_clock() {
        let processor = processor();
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        // 08:00 Nairobi == 05:00 UTC.
        assert_eq!(
            processor.scheduled_time(BatchSchedule::Batch1, date),
            Some(ts("2026-03-05T05:00:00Z")),
        );
        assert_eq!(
            processor.scheduled_time(BatchSchedule::Manual, date),
            None,
        );
    }

    #[test]
    fn windows_chain_across_the_day() {
        let processor = processor();
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let now = ts("2026-03-05T12:00:00Z");

        let (s1, e1) = processor.window(BatchSchedule::Batch1, date, now);
        let (s2, e2) = processor.window(BatchSchedule::Batch2, date, now);
        let (s3, e3) = processor.window(BatchSchedule::Batch3, date, now);
        assert_eq!(e1, s2);
        assert_eq!(e2, s3);
        assert!(s1 < e1 && s2 < e2 && s3 < e3);
    }
}
