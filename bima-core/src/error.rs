//! The core error taxonomy.
//!
//! Errors are classified by what the caller should do with them, not by
//! where they arose: validation and precondition failures surface to the
//! caller unchanged, conflicts are retried locally within a small bound,
//! transient upstream failures are retried with backoff, permanent upstream
//! failures and internal errors are terminal.

use bima_api::error::ProviderError;
use common::enums::{BatchSchedule, PolicyStatus};
use common::ids::PaymentRequestId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied bad input. No retry.
    #[error("validation: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Idempotency collision, stale optimistic version, or unique
    /// constraint violation.
    #[error("conflict: {0}")]
    Conflict(#[from] Conflict),

    /// A business rule blocks the action.
    #[error("precondition failed: {0}")]
    Precondition(#[from] Precondition),

    /// Provider network / 5xx / rate-limit. Retry with backoff.
    #[error("transient upstream: {0}")]
    Transient(String),

    /// Provider rejection. No retry.
    #[error("permanent upstream: {0}")]
    Permanent(String),

    /// Bugs and exhaustion.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Conflict(Conflict::StaleVersion { .. })
        )
    }
}

#[derive(Debug, Error)]
pub enum Conflict {
    /// The idempotency key was seen before; the original request id is
    /// attached so callers can return the prior request unchanged.
    #[error("duplicate idempotency key (original request {0})")]
    DuplicateIdempotencyKey(PaymentRequestId),

    /// An optimistic-version CAS failed. Retryable locally.
    #[error("stale version on {entity} {id}")]
    StaleVersion { entity: &'static str, id: String },

    #[error("unique constraint violated: {0}")]
    UniqueViolation(&'static str),

    /// The `(batch_date, schedule)` row already exists; this scheduled batch
    /// has already run (or is running) somewhere in the cluster.
    #[error("batch {date} {schedule} already exists")]
    BatchAlreadyRun {
        date: chrono::NaiveDate,
        schedule: BatchSchedule,
    },
}

#[derive(Debug, Error)]
pub enum Precondition {
    #[error("rider KYC is not approved")]
    KycNotApproved,

    #[error("rider has not accepted terms")]
    TermsNotAccepted,

    #[error("deposit already made")]
    DepositAlreadyMade,

    #[error("deposit not yet completed")]
    DepositNotCompleted,

    #[error("rider already has a payment request in flight")]
    RequestInFlight,

    #[error("days_count {days_count} would exceed the 30-day cycle \
             ({paid_days} already paid)")]
    DailyLimitExceeded { days_count: u16, paid_days: u16 },

    #[error("policy is not cancellable in status {status}")]
    PolicyNotCancellable { status: PolicyStatus },

    #[error("free-look window has expired")]
    FreeLookExpired,

    #[error("wallet write retries exhausted")]
    WalletRetriesExhausted,
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use bima_api::error::ProviderErrorKind;

    use super::*;

    #[test]
    fn retryability() {
        let transient: Error =
            ProviderError::unavailable("503 from provider").into();
        assert!(transient.is_retryable());

        let permanent: Error = ProviderError::new(
            ProviderErrorKind::InvalidRecipient,
            "bad msisdn",
        )
        .into();
        assert!(!permanent.is_retryable());

        let stale = Error::Conflict(Conflict::StaleVersion {
            entity: "wallet",
            id: "w1".to_owned(),
        });
        assert!(stale.is_retryable());

        let validation = Error::Validation("bad phone".to_owned());
        assert!(!validation.is_retryable());
    }
}
