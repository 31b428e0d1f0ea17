//! The `common` crate contains types and functionality shared between the
//! bima service crates: ids, money, time, phone numbers, canonical status
//! enums, and small async utilities.

// Ignore this issue with `proptest_derive::Arbitrary`.
#![allow(clippy::arc_with_non_send_sync)]

/// Exponential backoff.
pub mod backoff;
/// Application-level constants.
pub mod constants;
/// Canonical status enums, stored as UPPER_SNAKE_CASE strings.
pub mod enums;
/// `DeployEnv`.
pub mod env;
/// Hex utils.
pub mod hex;
/// Opaque 128-bit entity ids.
pub mod ids;
/// Minor-unit money amounts.
pub mod money;
/// E.164 phone numbers.
pub mod phone;
/// Random number generation.
pub mod rng;
/// A channel for sending shutdown signals.
pub mod shutdown;
/// `BimaTask` named task wrapper.
pub mod task;
/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
/// Timestamps and calendar arithmetic.
pub mod time;
