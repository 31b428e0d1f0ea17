//! Capability traits consumed by the core.
//!
//! Each trait is the full surface the core needs from one class of external
//! provider. Production impls live in this crate's vendor modules; in-memory
//! fakes live in [`test_utils`](crate::test_utils).

use async_trait::async_trait;
use common::phone::PhoneNumber;

use crate::error::ProviderError;
use crate::models::{
    BulkSendOutcome, EmailMessage, EmailSendOk, PaymentResult, PushRequest,
    PushResponse, SmsBalance, SmsSendOk,
};

/// The mobile-money service: initiate a push on the rider's handset and
/// query the status of a previous push.
#[async_trait]
pub trait MobileMoneyApi: Send + Sync + 'static {
    async fn initiate_push(
        &self,
        req: &PushRequest,
    ) -> Result<PushResponse, ProviderError>;

    async fn query_status(
        &self,
        checkout_id: &str,
    ) -> Result<PaymentResult, ProviderError>;
}

/// An SMS vendor. Two independent implementations with identical shape sit
/// behind the orchestrator's primary / fallback pair.
#[async_trait]
pub trait SmsApi: Send + Sync + 'static {
    /// A short stable name for logs and metrics, e.g. "atalking".
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError>;

    async fn send_bulk(
        &self,
        messages: &[(PhoneNumber, String)],
    ) -> Result<BulkSendOutcome, ProviderError>;

    async fn get_balance(&self) -> Result<SmsBalance, ProviderError>;

    /// A cheap provider-side health probe. Implementations should answer
    /// quickly; the orchestrator caches the result.
    async fn is_healthy(&self) -> bool;
}

#[async_trait]
pub trait WhatsAppApi: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn send_text(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError>;

    /// Send a document by URL with a caption, e.g. a policy certificate.
    async fn send_document(
        &self,
        to: &PhoneNumber,
        url: &str,
        filename: &str,
        caption: &str,
    ) -> Result<SmsSendOk, ProviderError>;

    async fn is_healthy(&self) -> bool;
}

#[async_trait]
pub trait EmailApi: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        message: &EmailMessage,
    ) -> Result<EmailSendOk, ProviderError>;

    async fn is_healthy(&self) -> bool;
}

/// Object storage for generated artifacts (policy certificates) and KYC
/// documents.
#[async_trait]
pub trait ObjectStorageApi: Send + Sync + 'static {
    /// Store `bytes` under `key`, overwriting. Returns the stored key.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError>;

    /// A pre-signed GET url valid for `ttl_secs`.
    async fn signed_url(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> Result<String, ProviderError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError>;
}
