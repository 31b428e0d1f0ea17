//! In-memory provider fakes for tests.
//!
//! Every fake records the calls it receives and can be scripted to fail in
//! the ways the real vendors fail, so core tests can exercise retry,
//! failover, and reconciliation paths without any network.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::money::Amount;
use common::phone::PhoneNumber;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::models::{
    BulkSendOutcome, EmailMessage, EmailSendOk, PaymentResult, PushRequest,
    PushResponse, SmsBalance, SmsSendOk,
};
use crate::traits::{
    EmailApi, MobileMoneyApi, ObjectStorageApi, SmsApi, WhatsAppApi,
};

// --- Mobile money fake --- //

/// A scriptable in-memory mobile-money provider.
///
/// - `initiate_push` hands out sequential checkout ids (`CO-1`, `CO-2`, ..)
///   and records the request.
/// - `query_status` pops from a per-checkout script of [`PaymentResult`]s;
///   when a script runs dry its last entry repeats.
#[derive(Clone, Default)]
pub struct FakeMobileMoney {
    inner: Arc<Mutex<FakeMobileMoneyInner>>,
    counter: Arc<AtomicU64>,
}

#[derive(Default)]
struct FakeMobileMoneyInner {
    pushes: Vec<(PushRequest, String)>,
    scripts: HashMap<String, VecDeque<PaymentResult>>,
    fail_pushes: u32,
}

impl FakeMobileMoney {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `initiate_push` calls fail with a transient error.
    pub fn fail_next_pushes(&self, n: u32) {
        self.inner.lock().unwrap().fail_pushes = n;
    }

    /// Script the sequence of `query_status` results for a checkout id.
    pub fn script_status(
        &self,
        checkout_id: &str,
        results: impl IntoIterator<Item = PaymentResult>,
    ) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(checkout_id.to_owned(), results.into_iter().collect());
    }

    pub fn push_count(&self) -> usize {
        self.inner.lock().unwrap().pushes.len()
    }

    pub fn last_checkout_id(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .pushes
            .last()
            .map(|(_, id)| id.clone())
    }
}

#[async_trait]
impl MobileMoneyApi for FakeMobileMoney {
    async fn initiate_push(
        &self,
        req: &PushRequest,
    ) -> Result<PushResponse, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_pushes > 0 {
            inner.fail_pushes -= 1;
            return Err(ProviderError::unavailable("scripted push failure"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let checkout_id = format!("CO-{n}");
        inner.pushes.push((req.clone(), checkout_id.clone()));
        Ok(PushResponse {
            checkout_id,
            merchant_id: format!("MR-{n}"),
            response_code: 0,
            response_description: "Success. Request accepted".to_owned(),
        })
    }

    async fn query_status(
        &self,
        checkout_id: &str,
    ) -> Result<PaymentResult, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let script = inner.scripts.get_mut(checkout_id).ok_or_else(|| {
            ProviderError::rejected("unknown checkout id")
        })?;
        let result = if script.len() > 1 {
            script.pop_front().expect("len > 1")
        } else {
            script.front().cloned().unwrap_or(PaymentResult::Pending)
        };
        Ok(result)
    }
}

// --- SMS fake --- //

/// How a [`FakeSms`] behaves on send.
#[derive(Copy, Clone, Debug)]
pub enum SmsBehavior {
    Ok,
    /// Fail every send with the given error kind.
    AlwaysErr(ProviderErrorKind),
    /// Fail the first `n` sends with a transient error, then succeed.
    FailTimes(u32),
}

#[derive(Clone)]
pub struct FakeSms {
    name: &'static str,
    inner: Arc<Mutex<FakeSmsInner>>,
}

struct FakeSmsInner {
    behavior: SmsBehavior,
    sent: Vec<(PhoneNumber, String)>,
    attempts: u32,
    healthy: bool,
}

impl FakeSms {
    pub fn new(name: &'static str, behavior: SmsBehavior) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(FakeSmsInner {
                behavior,
                sent: Vec::new(),
                attempts: 0,
                healthy: true,
            })),
        }
    }

    pub fn ok(name: &'static str) -> Self {
        Self::new(name, SmsBehavior::Ok)
    }

    pub fn set_behavior(&self, behavior: SmsBehavior) {
        self.inner.lock().unwrap().behavior = behavior;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.lock().unwrap().healthy = healthy;
    }

    /// Total send attempts, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    /// Successfully sent messages.
    pub fn sent(&self) -> Vec<(PhoneNumber, String)> {
        self.inner.lock().unwrap().sent.clone()
    }

    fn try_send(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        let attempt = inner.attempts;
        match inner.behavior {
            SmsBehavior::Ok => (),
            SmsBehavior::AlwaysErr(kind) => {
                return Err(ProviderError::new(kind, "scripted failure"));
            }
            SmsBehavior::FailTimes(n) =>
                if attempt <= n {
                    return Err(ProviderError::unavailable(
                        "scripted transient failure",
                    ));
                },
        }
        inner.sent.push((to.clone(), message.to_owned()));
        Ok(SmsSendOk {
            message_id: format!("{}-{}", self.name, attempt),
            cost: Some(Amount::from_minor(80)),
        })
    }
}

#[async_trait]
impl SmsApi for FakeSms {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        self.try_send(to, message)
    }

    async fn send_bulk(
        &self,
        messages: &[(PhoneNumber, String)],
    ) -> Result<BulkSendOutcome, ProviderError> {
        let results = messages
            .iter()
            .map(|(to, body)| (to.clone(), self.try_send(to, body)))
            .collect();
        Ok(BulkSendOutcome { results })
    }

    async fn get_balance(&self) -> Result<SmsBalance, ProviderError> {
        Ok(SmsBalance {
            balance: Amount::from_kes(1_000),
            currency: "KES".to_owned(),
        })
    }

    async fn is_healthy(&self) -> bool {
        self.inner.lock().unwrap().healthy
    }
}

// --- WhatsApp fake --- //

#[derive(Clone)]
pub struct FakeWhatsApp {
    inner: Arc<Mutex<FakeWhatsAppInner>>,
}

#[derive(Default)]
struct FakeWhatsAppInner {
    texts: Vec<(PhoneNumber, String)>,
    documents: Vec<(PhoneNumber, String, String)>,
    fail_sends: u32,
}

impl FakeWhatsApp {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeWhatsAppInner::default())),
        }
    }

    pub fn fail_next_sends(&self, n: u32) {
        self.inner.lock().unwrap().fail_sends = n;
    }

    pub fn texts(&self) -> Vec<(PhoneNumber, String)> {
        self.inner.lock().unwrap().texts.clone()
    }

    /// `(to, url, filename)` of delivered documents.
    pub fn documents(&self) -> Vec<(PhoneNumber, String, String)> {
        self.inner.lock().unwrap().documents.clone()
    }

    fn check_fail(
        inner: &mut FakeWhatsAppInner,
    ) -> Result<(), ProviderError> {
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(ProviderError::unavailable("scripted failure"));
        }
        Ok(())
    }
}

impl Default for FakeWhatsApp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WhatsAppApi for FakeWhatsApp {
    fn name(&self) -> &'static str {
        "fake-whatsapp"
    }

    async fn send_text(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_fail(&mut inner)?;
        inner.texts.push((to.clone(), message.to_owned()));
        Ok(SmsSendOk {
            message_id: format!("wa-{}", inner.texts.len()),
            cost: None,
        })
    }

    async fn send_document(
        &self,
        to: &PhoneNumber,
        url: &str,
        filename: &str,
        _caption: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_fail(&mut inner)?;
        inner
            .documents
            .push((to.clone(), url.to_owned(), filename.to_owned()));
        Ok(SmsSendOk {
            message_id: format!("wa-doc-{}", inner.documents.len()),
            cost: None,
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

// --- Email fake --- //

#[derive(Clone, Default)]
pub struct FakeEmail {
    inner: Arc<Mutex<Vec<EmailMessage>>>,
}

impl FakeEmail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.inner.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailApi for FakeEmail {
    fn name(&self) -> &'static str {
        "fake-email"
    }

    async fn send(
        &self,
        message: &EmailMessage,
    ) -> Result<EmailSendOk, ProviderError> {
        let mut sent = self.inner.lock().unwrap();
        sent.push(message.clone());
        Ok(EmailSendOk {
            message_id: format!("em-{}", sent.len()),
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

// --- Object storage fake --- //

#[derive(Clone, Default)]
pub struct MemObjectStore {
    objects: Arc<Mutex<HashMap<String, (Vec<u8>, String)>>>,
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStorageApi for MemObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_owned(), (bytes, content_type.to_owned()));
        Ok(key.to_owned())
    }

    async fn signed_url(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> Result<String, ProviderError> {
        if !self.contains(key) {
            return Err(ProviderError::rejected("no such object"));
        }
        Ok(format!("https://storage.test/{key}?ttl={ttl_secs}&sig=test"))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| ProviderError::rejected("no such object"))
    }
}
