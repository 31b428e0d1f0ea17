//! Full-stack test harness: the core wired up against in-memory providers.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use std::sync::Arc;

use bima_api::test_utils::{
    FakeEmail, FakeMobileMoney, FakeSms, FakeWhatsApp, MemObjectStore,
};
use bima_api::traits::{EmailApi, SmsApi, WhatsAppApi};
use bima_core::batch::{BatchConfig, BatchProcessor};
use bima_core::certificates::CertificateDispatcher;
use bima_core::dispatch::EventDispatcher;
use bima_core::events::EventsBus;
use bima_core::issuance::IssuancePlanner;
use bima_core::jobs::JobQueue;
use bima_core::models::batch::PolicyBatch;
use bima_core::notify::{NotifyConfig, NotifyOrchestrator};
use bima_core::payments::manager::{PaymentsConfig, PaymentsManager};
use bima_core::payments::SettleOutcome;
use bima_core::policy::PolicyService;
use bima_core::reconcile::Reconciler;
use bima_core::store::Store;
use bima_core::testing;
use common::enums::BatchSchedule;
use common::ids::{RiderId, WalletId};
use common::rng::SmallRng;
use common::time::TimestampMs;
use serde_json::json;

pub struct Harness {
    pub store: Arc<Store>,
    pub gateway: FakeMobileMoney,
    pub sms_primary: FakeSms,
    pub sms_secondary: FakeSms,
    pub whatsapp: FakeWhatsApp,
    pub email: FakeEmail,
    pub storage: MemObjectStore,
    pub payments: Arc<PaymentsManager>,
    pub batch: BatchProcessor,
    pub policy: PolicyService,
    pub orchestrator: Arc<NotifyOrchestrator>,
    pub dispatcher: Arc<EventDispatcher>,
    pub jobs: JobQueue,
    pub reconciler: Reconciler,
    pub bus: EventsBus,
}

impl Harness {
    pub fn new() -> Self {
        logger::init_for_testing();

        let store = Arc::new(Store::new());
        let gateway = FakeMobileMoney::new();
        let sms_primary = FakeSms::ok("primary");
        let sms_secondary = FakeSms::ok("secondary");
        let whatsapp = FakeWhatsApp::new();
        let email = FakeEmail::new();
        let storage = MemObjectStore::new();
        let bus = EventsBus::new();

        let payments = Arc::new(PaymentsManager::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Box::new(SmallRng::from_u64(1)),
            PaymentsConfig::default(),
        ));

        let orchestrator = Arc::new(NotifyOrchestrator::new(
            store.clone(),
            Box::new(SmallRng::from_u64(2)),
            Arc::new(sms_primary.clone()) as Arc<dyn SmsApi>,
            Some(Arc::new(sms_secondary.clone()) as Arc<dyn SmsApi>),
            Some(Arc::new(whatsapp.clone()) as Arc<dyn WhatsAppApi>),
            Some(Arc::new(email.clone()) as Arc<dyn EmailApi>),
            NotifyConfig::default(),
        ));

        let planner = IssuancePlanner::new(
            store.clone(),
            Box::new(SmallRng::from_u64(3)),
        );
        let certificates = Arc::new(CertificateDispatcher::new(
            store.clone(),
            Arc::new(storage.clone()),
            Some(Arc::new(whatsapp.clone()) as Arc<dyn WhatsAppApi>),
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            store.clone(),
            planner,
            orchestrator.clone(),
            certificates,
            bus.clone(),
        ));

        let batch = BatchProcessor::new(
            store.clone(),
            Box::new(SmallRng::from_u64(4)),
            BatchConfig::default(),
        );
        let policy = PolicyService::new(
            store.clone(),
            Box::new(SmallRng::from_u64(5)),
        );

        let jobs = JobQueue::new(store.clone());
        let reconciler = Reconciler::new(
            store.clone(),
            payments.clone(),
            jobs.clone(),
            dispatcher.clone(),
        );

        Self {
            store,
            gateway,
            sms_primary,
            sms_secondary,
            whatsapp,
            email,
            storage,
            payments,
            batch,
            policy,
            orchestrator,
            dispatcher,
            jobs,
            reconciler,
            bus,
        }
    }

    pub fn seed_rider(&self, i: u8) -> (RiderId, WalletId) {
        testing::seed_rider(&self.store, i)
    }

    /// Deliver a provider callback and fan out the committed events.
    pub async fn callback(
        &self,
        payload: serde_json::Value,
    ) -> SettleOutcome {
        let (outcome, events) = self
            .payments
            .handle_callback(payload)
            .await
            .expect("callback handling failed");
        self.dispatcher.dispatch(events).await;
        outcome
    }

    /// Run a batch and fan out the committed events.
    pub async fn run_batch(
        &self,
        schedule: BatchSchedule,
        now: TimestampMs,
    ) -> PolicyBatch {
        let (batch, events) = self
            .batch
            .process_batch(schedule, now)
            .expect("batch run failed");
        self.dispatcher.dispatch(events).await;
        batch
    }

    /// Initiate and settle one deposit for `rider_id`, start to finish.
    pub async fn complete_deposit(
        &self,
        rider_id: RiderId,
        key: &str,
        receipt: &str,
    ) {
        self.payments
            .initiate_deposit(rider_id, "0712345001", key)
            .await
            .expect("deposit initiation failed");
        let checkout_id = self
            .gateway
            .last_checkout_id()
            .expect("push was recorded");
        let outcome =
            self.callback(success_callback(&checkout_id, receipt)).await;
        assert!(matches!(outcome, SettleOutcome::Settled { .. }));
    }
}

pub fn success_callback(
    checkout_id: &str,
    receipt: &str,
) -> serde_json::Value {
    json!({
        "checkout_id": checkout_id,
        "result_code": 0,
        "result_description": "The service request is processed successfully.",
        "receipt_number": receipt,
    })
}
