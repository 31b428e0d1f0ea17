//! `Policy` and `RiderRefund`.

use std::time::Duration;

use common::constants::FREE_LOOK_DAYS;
use common::enums::{PolicyStatus, PolicyType, RefundStatus};
use common::ids::{BatchId, PolicyId, RefundId, RiderId, TransactionId};
use common::money::Amount;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Precondition};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub rider_id: RiderId,
    pub policy_type: PolicyType,
    pub status: PolicyStatus,
    /// Assigned at batch activation; unique when non-null.
    pub policy_number: Option<String>,
    pub triggering_transaction_id: TransactionId,
    pub batch_id: Option<BatchId>,
    pub premium_amount: Amount,
    pub coverage_start: Option<TimestampMs>,
    pub coverage_end: Option<TimestampMs>,
    /// Links the eleven-month policy back to the one-month policy it
    /// continues, and vice versa.
    pub previous_policy_id: Option<PolicyId>,
    pub next_policy_id: Option<PolicyId>,
    pub issued_at: Option<TimestampMs>,
    pub cancelled_at: Option<TimestampMs>,
    pub cancellation_reason: Option<String>,
    pub created_at: TimestampMs,
}

impl Policy {
    pub fn new_pending(
        id: PolicyId,
        rider_id: RiderId,
        policy_type: PolicyType,
        triggering_transaction_id: TransactionId,
        premium_amount: Amount,
        now: TimestampMs,
    ) -> Self {
        Self {
            id,
            rider_id,
            policy_type,
            status: PolicyStatus::PendingIssuance,
            policy_number: None,
            triggering_transaction_id,
            batch_id: None,
            premium_amount,
            coverage_start: None,
            coverage_end: None,
            previous_policy_id: None,
            next_policy_id: None,
            issued_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
        }
    }

    /// Activate this policy under a batch: assign the policy number and the
    /// coverage window starting at the batch's scheduled time.
    pub fn activate(
        &mut self,
        policy_number: String,
        batch_id: BatchId,
        coverage_start: TimestampMs,
        now: TimestampMs,
    ) -> Result<(), Error> {
        if self.status != PolicyStatus::Processing {
            return Err(Error::Validation(format!(
                "policy {}: cannot activate from status {}",
                self.id.short(),
                self.status,
            )));
        }
        let months = self.policy_type.coverage_months();
        self.policy_number = Some(policy_number);
        self.batch_id = Some(batch_id);
        self.coverage_start = Some(coverage_start);
        self.coverage_end = Some(coverage_start.add_months(months));
        self.issued_at = Some(now);
        self.status = PolicyStatus::Active;
        Ok(())
    }

    /// Whether the free-look cancellation window is still open at `now`.
    pub fn in_free_look(&self, now: TimestampMs) -> bool {
        match self.coverage_start {
            Some(start) => {
                let window = Duration::from_secs(
                    u64::from(FREE_LOOK_DAYS) * 86_400,
                );
                now <= start.saturating_add(window)
            }
            None => false,
        }
    }

    /// Validate a free-look cancellation at `now`.
    pub fn check_cancellable(&self, now: TimestampMs) -> Result<(), Error> {
        if !self.status.is_in_force() {
            return Err(Precondition::PolicyNotCancellable {
                status: self.status,
            }
            .into());
        }
        if !self.in_free_look(now) {
            return Err(Precondition::FreeLookExpired.into());
        }
        Ok(())
    }
}

/// A pending partial refund produced by a free-look cancellation. Actual
/// disbursement runs through the payout rails, which are out of scope; the
/// core creates the row and posts the journal entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiderRefund {
    pub id: RefundId,
    pub rider_id: RiderId,
    pub policy_id: PolicyId,
    pub refund_amount: Amount,
    pub reversal_fee: Amount,
    pub status: RefundStatus,
    pub reason: String,
    pub created_at: TimestampMs,
}
