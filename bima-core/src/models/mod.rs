//! Persisted entity models.
//!
//! These are the rows of the relational schema. Mutation logic that must be
//! atomic lives in the component managers; the models carry their own local
//! invariant checks and status transition rules.

/// `PolicyBatch`.
pub mod batch;
/// `JournalEntry`, `JournalLine`, `GlAccount`.
pub mod ledger;
/// `Notification` and per-rider preferences.
pub mod notification;
/// `PaymentRequest` and `Transaction`.
pub mod payment;
/// `Policy` and `RiderRefund`.
pub mod policy;
/// `Rider`.
pub mod rider;
/// `Wallet`.
pub mod wallet;
