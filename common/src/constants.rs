//! Application-level constants.
//!
//! Money constants are the production values; there is no reduced
//! "development" constant set.

use std::time::Duration;

use crate::money::Amount;

/// The one-off deposit that funds the initial one-month policy: KES 1048.
pub const DEPOSIT_AMOUNT: Amount = Amount::from_minor(104_800);

/// The recurring daily payment: KES 87.
pub const DAILY_AMOUNT: Amount = Amount::from_minor(8_700);

/// Number of daily payments required to qualify for the eleven-month policy.
pub const DAYS_REQUIRED: u16 = 30;

/// Total annual premium (deposit + 30 daily payments): KES 3658.
pub const ANNUAL_TOTAL: Amount =
    Amount::from_minor(DEPOSIT_AMOUNT.minor() + DAILY_AMOUNT.minor() * 30);

/// Free-look cancellation window, measured from `coverage_start`.
pub const FREE_LOOK_DAYS: u32 = 30;

/// Fraction of the refunded premium retained as platform income on free-look
/// cancellation, in basis points (10%).
pub const REVERSAL_FEE_BPS: u32 = 1_000;

/// Default platform share of earned premium, in basis points (20%). The
/// remainder accrues to the underwriter. Overridable via config.
pub const DEFAULT_PLATFORM_COMMISSION_BPS: u32 = 2_000;

/// Wall-clock `(hour, minute)` of the three daily issuance batches, in the
/// deployment time zone.
pub const BATCH_TIMES: [(u32, u32); 3] = [(8, 0), (14, 0), (20, 0)];

/// Default per-rider quiet hours `(start, end)` as `(hour, minute)` pairs.
/// The window spans midnight.
pub const DEFAULT_QUIET_HOURS: ((u32, u32), (u32, u32)) = ((22, 0), (6, 0));

/// How long an outbound push may wait for a provider callback before the
/// reconciler takes over.
pub const INLINE_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Absolute cutoff for a payment request; after this the reconciler may
/// force TIMEOUT.
pub const PAYMENT_REQUEST_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Reconciler gives up (and flags manual review) after this many polls.
pub const RECONCILER_MAX_ATTEMPTS: u32 = 6;

/// Bounded retries for optimistic-version conflicts on wallet writes.
pub const WALLET_CAS_RETRIES: usize = 3;

/// Default per-provider send retries for notifications.
pub const NOTIFY_MAX_RETRIES: u32 = 3;

/// Default base delay for notification send retries.
pub const NOTIFY_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How long a provider stays marked unhealthy after exhausting its retries.
pub const PROVIDER_HEALTH_TTL: Duration = Duration::from_secs(60);

/// Notifications older than this transition to EXPIRED without further
/// attempts.
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default size of bounded channels.
pub const DEFAULT_CHANNEL_SIZE: usize = 256;
