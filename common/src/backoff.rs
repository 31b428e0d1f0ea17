//! Exponential backoff.

use std::cmp::min;
use std::time::Duration;

const INITIAL_WAIT_MS: u64 = 250;
const MAXIMUM_WAIT_MS: u64 = 32_000;
const EXP_BASE: u64 = 2;

/// Get an iterator of [`Duration`]s which can be passed into e.g.
/// [`tokio::time::sleep`] to observe time-based exponential backoff.
///
/// ```
/// # use common::backoff;
/// # async fn backoff_example() {
/// let mut backoff_durations = backoff::get_backoff_iter();
/// for _ in 0..10 {
///     tokio::time::sleep(backoff_durations.next().unwrap()).await;
/// }
/// # }
/// ```
pub fn get_backoff_iter() -> impl Iterator<Item = Duration> {
    iter_with_initial(Duration::from_millis(INITIAL_WAIT_MS))
}

/// [`get_backoff_iter`] with a custom initial wait, still capped at the
/// module-level maximum.
pub fn iter_with_initial(initial: Duration) -> impl Iterator<Item = Duration> {
    let initial_ms = initial.as_millis() as u64;
    (0u32..).map(move |index| {
        let factor = EXP_BASE.saturating_pow(index);
        let wait_ms = initial_ms.saturating_mul(factor);
        let bounded_wait_ms = min(wait_ms, MAXIMUM_WAIT_MS);
        Duration::from_millis(bounded_wait_ms)
    })
}

/// The delay before retry number `attempt` (1-indexed): `base × 2^(attempt −
/// 1)`, uncapped. Used where a component's config bounds the attempt count
/// rather than the delay.
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
