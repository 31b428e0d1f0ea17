//! Payment engine: outbound pushes and settled transactions.
//!
//! This module owns the state machine of every [`PaymentRequest`] and
//! guarantees idempotency and exactly-once wallet credit. The simpler row
//! types live in [`crate::models::payment`]; the state machine driver is
//! [`PaymentsManager`].
//!
//! [`PaymentRequest`]: crate::models::payment::PaymentRequest
//! [`PaymentsManager`]: manager::PaymentsManager

use common::enums::InitiateCode;
use common::ids::TransactionId;

use crate::error::{Conflict, Error, Precondition};
use crate::models::payment::PaymentRequest;

/// `PaymentsManager`.
pub mod manager;

/// The caller-facing result of a successful (or replayed) initiation.
#[derive(Clone, Debug)]
pub struct Initiated {
    pub request: PaymentRequest,
    /// `SUCCESS` for a fresh push, `DUPLICATE` for an idempotent replay.
    pub code: InitiateCode,
}

/// What a callback / status refresh did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SettleOutcome {
    /// First terminal result: the wallet was credited exactly once.
    Settled { transaction_id: TransactionId },
    /// First terminal result: the request failed, no credit.
    MarkedFailed,
    /// The request was already terminal; the payload was recorded (when
    /// provided) and nothing else happened.
    AlreadyTerminal,
    /// The provider still reports the payment as in flight.
    StillPending,
}

/// Map an initiation error to the structured outcome code surfaced to the
/// caller. The precise error stays in the error chain; this is the summary
/// a UI switches on.
pub fn initiate_code_for_error(err: &Error) -> InitiateCode {
    match err {
        Error::Validation(msg) if msg.contains("phone") =>
            InitiateCode::InvalidPhone,
        Error::Precondition(Precondition::TermsNotAccepted) =>
            InitiateCode::TermsNotAccepted,
        Error::Conflict(Conflict::DuplicateIdempotencyKey(_)) =>
            InitiateCode::Duplicate,
        Error::Transient(msg) if msg.contains("rate limited") =>
            InitiateCode::RateLimited,
        _ => InitiateCode::Error,
    }
}
