//! `PolicyBatch`.

use chrono::NaiveDate;
use common::enums::{BatchSchedule, BatchStatus};
use common::ids::{BatchId, PolicyId};
use common::money::Amount;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

/// One scheduled (or manual) issuance run. `(batch_date, schedule)` is
/// unique, which is the cluster-wide lock preventing two concurrent runs of
/// the same scheduled batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyBatch {
    pub id: BatchId,
    pub schedule: BatchSchedule,
    pub batch_date: NaiveDate,
    /// Deterministic batch number, e.g. `B202603051`.
    pub batch_number: String,
    pub status: BatchStatus,
    /// The wall-clock time this batch was scheduled for; activated policies
    /// start coverage here.
    pub scheduled_for: TimestampMs,
    pub payment_window_start: TimestampMs,
    pub payment_window_end: TimestampMs,
    pub total_policies: u32,
    pub issued_count: u32,
    pub failed_count: u32,
    pub total_premium: Amount,
    /// `(policy, error)` pairs for the policies that failed activation.
    pub failed_policies: Vec<(PolicyId, String)>,
    pub started_at: TimestampMs,
    pub completed_at: Option<TimestampMs>,
}

impl PolicyBatch {
    /// `B{yyyymmdd}{schedule digit}`; `0` for manual batches.
    pub fn batch_number(date: NaiveDate, schedule: BatchSchedule) -> String {
        let digit = match schedule {
            BatchSchedule::Batch1 => 1,
            BatchSchedule::Batch2 => 2,
            BatchSchedule::Batch3 => 3,
            BatchSchedule::Manual => 0,
        };
        format!("B{}{digit}", date.format("%Y%m%d"))
    }

    /// The deterministic policy number for the `sequence`-th policy (1-based)
    /// activated under this batch.
    pub fn policy_number(&self, sequence: u32) -> String {
        format!("{}-{sequence:04}", self.batch_number)
    }
}
