//! The `bima-api` crate defines the capability contracts the bima core
//! consumes from the outside world - the mobile-money gateway, the SMS /
//! WhatsApp / email providers, and object storage - together with their wire
//! models, a shared REST client, and in-memory fakes for tests.
//!
//! The core only ever sees the traits in [`traits`]; which vendor sits behind
//! each trait is a composition-root decision.

/// Email provider client.
pub mod email;
/// Provider error type and retryability categories.
pub mod error;
/// Wire models for all providers.
pub mod models;
/// Mobile money (STK push) provider client.
pub mod mpesa;
/// Shared REST client with timeouts.
pub mod rest;
/// SMS provider clients.
pub mod sms;
/// Object storage client.
pub mod storage;
/// In-memory provider fakes for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
/// Capability traits consumed by the core.
pub mod traits;
/// WhatsApp provider client.
pub mod whatsapp;
