//! `PaymentRequest` and `Transaction`.

use common::enums::{
    PaymentRequestStatus, PaymentType, TransactionStatus, TransactionType,
};
use common::ids::{
    PaymentRequestId, PolicyId, RiderId, TransactionId, WalletId,
};
use common::money::Amount;
use common::phone::PhoneNumber;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::error::{Conflict, Error};

/// An outbound push record. Created on initiation, driven to exactly one
/// terminal status by whichever of (provider callback, reconciler poll)
/// gets there first; the version CAS on this row is the gate that makes
/// the wallet credit at-most-once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: PaymentRequestId,
    pub rider_id: RiderId,
    pub payment_type: PaymentType,
    pub amount: Amount,
    pub phone: PhoneNumber,
    /// Caller-provided; unique. A repeated initiate with the same key
    /// returns this original request unchanged.
    pub idempotency_key: String,
    /// Shows up on the rider's mobile-money statement.
    pub account_reference: String,
    pub provider_checkout_id: Option<String>,
    pub provider_merchant_id: Option<String>,
    pub status: PaymentRequestStatus,
    /// 1 for deposits; 1..=30 for (multi-)daily payments.
    pub days_count: u16,
    pub expires_at: TimestampMs,
    pub callback_received_at: Option<TimestampMs>,
    /// The provider callback payload exactly as it arrived.
    pub raw_callback: Option<serde_json::Value>,
    /// Provider result description for terminal failures, preserved so a UI
    /// can show precise reasons ("insufficient funds", "user cancelled").
    pub failure_reason: Option<String>,
    pub version: u64,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl PaymentRequest {
    /// Validate and apply a status transition. Terminal statuses admit no
    /// further transitions; the store's CAS turns a lost race into
    /// [`Conflict::StaleVersion`] before this is ever reached.
    pub fn transition(
        &mut self,
        next: PaymentRequestStatus,
        now: TimestampMs,
    ) -> Result<(), Error> {
        use PaymentRequestStatus::*;
        let ok = match (self.status, next) {
            (Initiated, Sent) => true,
            (Initiated, Expired) => true,
            (Initiated, Completed | Failed | Cancelled | Timeout) => true,
            (Sent, Completed | Failed | Cancelled | Timeout) => true,
            _ => false,
        };
        if !ok {
            return Err(Error::Validation(format!(
                "payment request {}: illegal transition {} -> {next}",
                self.id.short(),
                self.status,
            )));
        }
        self.status = next;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// An immutable settled financial fact. Never updated once terminal except
/// via an explicit REVERSAL producing a new transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub rider_id: RiderId,
    pub wallet_id: WalletId,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Amount,
    /// Provider receipt number; globally unique when present.
    pub receipt_number: Option<String>,
    pub payment_request_id: Option<PaymentRequestId>,
    /// Weak reference to the policy this transaction triggered, when any.
    pub policy_id: Option<PolicyId>,
    pub metadata: serde_json::Value,
    pub settled_at: TimestampMs,
    pub created_at: TimestampMs,
}

impl Transaction {
    /// Reversals reference their original and negate its amount.
    pub fn reversal_of(
        &self,
        id: TransactionId,
        now: TimestampMs,
    ) -> Result<Transaction, Error> {
        if self.status != TransactionStatus::Completed {
            return Err(Error::Conflict(Conflict::UniqueViolation(
                "only completed transactions can be reversed",
            )));
        }
        Ok(Transaction {
            id,
            rider_id: self.rider_id,
            wallet_id: self.wallet_id,
            tx_type: TransactionType::Reversal,
            status: TransactionStatus::Completed,
            amount: Amount::ZERO - self.amount,
            receipt_number: None,
            payment_request_id: self.payment_request_id,
            policy_id: self.policy_id,
            metadata: serde_json::json!({ "reverses": self.id.to_string() }),
            settled_at: now,
            created_at: now,
        })
    }
}
