//! Canonical status enums shared across the service.
//!
//! Every enum here serializes as its UPPER_SNAKE_CASE string form, which is
//! also how the store persists it. Parsing is case-insensitive so records
//! written by older layers with lowercase statuses still load; writing always
//! produces the canonical form.

use serde_with::{DeserializeFromStr, SerializeDisplay};
use strum::{Display, EnumString, VariantArray};

macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[derive(SerializeDisplay, DeserializeFromStr)]
        #[derive(Display, EnumString, VariantArray)]
        #[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
        #[cfg_attr(
            any(test, feature = "test-utils"),
            derive(proptest_derive::Arbitrary)
        )]
        pub enum $name { $($(#[$vmeta])* $variant,)+ }
    };
}

// --- Riders --- //

status_enum! {
    /// KYC verification status. Deposits are gated on `Approved`.
    pub enum KycStatus {
        Pending,
        InReview,
        Approved,
        Rejected,
        Expired,
    }
}

status_enum! {
    pub enum RiderStatus {
        Active,
        Inactive,
        Suspended,
        Pending,
    }
}

// --- Wallets --- //

status_enum! {
    pub enum WalletStatus {
        Active,
        Frozen,
        Suspended,
        Lapsed,
    }
}

// --- Payments --- //

status_enum! {
    /// What an outbound push pays for.
    pub enum PaymentType {
        Deposit,
        DailyPayment,
    }
}

status_enum! {
    /// Status of an outbound push request.
    ///
    /// ```text
    /// INITIATED ─► SENT ─► COMPLETED   (terminal, triggers wallet credit)
    ///       │        │  ├► FAILED      (terminal)
    ///       │        │  ├► CANCELLED   (terminal, user rejected on phone)
    ///       │        └─► TIMEOUT       (terminal, no callback in time)
    ///       └──────────► EXPIRED       (terminal, provider never accepted)
    /// ```
    pub enum PaymentRequestStatus {
        Initiated,
        Sent,
        Completed,
        Failed,
        Cancelled,
        Timeout,
        Expired,
    }
}

impl PaymentRequestStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        use PaymentRequestStatus::*;
        match self {
            Initiated | Sent => false,
            Completed | Failed | Cancelled | Timeout | Expired => true,
        }
    }
}

status_enum! {
    pub enum TransactionType {
        Deposit,
        DailyPayment,
        Refund,
        Adjustment,
        Reversal,
    }
}

status_enum! {
    pub enum TransactionStatus {
        Pending,
        Processing,
        Completed,
        Failed,
        Cancelled,
        Reversed,
    }
}

// --- Policies --- //

status_enum! {
    pub enum PolicyType {
        OneMonth,
        ElevenMonth,
    }
}

impl PolicyType {
    /// Coverage duration in calendar months.
    pub fn coverage_months(self) -> u32 {
        match self {
            Self::OneMonth => 1,
            Self::ElevenMonth => 11,
        }
    }
}

status_enum! {
    pub enum PolicyStatus {
        PendingIssuance,
        Processing,
        Active,
        Expiring,
        Expired,
        Lapsed,
        Cancelled,
    }
}

impl PolicyStatus {
    /// Statuses which count towards the "at most one in-force policy of each
    /// type per rider" invariant.
    pub fn is_in_force(self) -> bool {
        matches!(self, Self::Active | Self::Expiring)
    }
}

status_enum! {
    /// Which of the three daily runs (or a manual trigger) a batch is.
    pub enum BatchSchedule {
        #[strum(serialize = "BATCH_1")]
        Batch1,
        #[strum(serialize = "BATCH_2")]
        Batch2,
        #[strum(serialize = "BATCH_3")]
        Batch3,
        Manual,
    }
}

status_enum! {
    pub enum BatchStatus {
        Pending,
        Processing,
        Completed,
        CompletedWithErrors,
        Failed,
        Cancelled,
    }
}

status_enum! {
    pub enum RefundStatus {
        Pending,
        Processing,
        Completed,
        Failed,
    }
}

// --- Ledger --- //

status_enum! {
    pub enum JournalStatus {
        Draft,
        Posted,
        Reversed,
    }
}

status_enum! {
    /// The side a GL account's balance normally carries.
    pub enum BalanceSide {
        Debit,
        Credit,
    }
}

// --- Notifications --- //

status_enum! {
    pub enum Channel {
        Sms,
        Whatsapp,
        Email,
        Push,
    }
}

status_enum! {
    pub enum NotificationStatus {
        Pending,
        Queued,
        Sent,
        Delivered,
        Failed,
        Expired,
    }
}

status_enum! {
    pub enum NotifyPriority {
        Urgent,
        High,
        Normal,
        Low,
    }
}

status_enum! {
    /// Business events that notify riders.
    pub enum NotifyEvent {
        PaymentReceived,
        DepositConfirmed,
        DailyCycleCompleted,
        PolicyIssued,
        PolicyCancelled,
        RefundProcessed,
        PaymentFailed,
        PaymentReminder,
        ManualReviewRequired,
    }
}

// --- Payment initiation outcome codes --- //

status_enum! {
    /// Structured outcome code returned from payment initiation. This is the
    /// user-visible summary; the precise error lives in the error chain.
    pub enum InitiateCode {
        Success,
        Duplicate,
        InvalidPhone,
        TermsNotAccepted,
        RateLimited,
        Error,
    }
}
