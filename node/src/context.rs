//! Composition root: builds the object graph from config.

use std::sync::Arc;

use anyhow::ensure;
use bima_api::email::EmailClient;
use bima_api::mpesa::MpesaClient;
use bima_api::sms::{AtalkingClient, OnfonClient};
use bima_api::storage::StorageClient;
use bima_api::traits::{EmailApi, SmsApi, WhatsAppApi};
use bima_api::whatsapp::WhatsAppClient;
use bima_core::batch::BatchProcessor;
use bima_core::certificates::CertificateDispatcher;
use bima_core::dispatch::EventDispatcher;
use bima_core::events::EventsBus;
use bima_core::issuance::IssuancePlanner;
use bima_core::jobs::JobQueue;
use bima_core::notify::NotifyOrchestrator;
use bima_core::payments::manager::PaymentsManager;
use bima_core::policy::PolicyService;
use bima_core::reconcile::Reconciler;
use bima_core::store::Store;
use common::rng::SysRng;

use crate::config::{NodeConfig, SmsVendor};

pub struct NodeContext {
    pub config: NodeConfig,
    pub store: Arc<Store>,
    pub payments: Arc<PaymentsManager>,
    pub batch_processor: Arc<BatchProcessor>,
    pub policy_service: Arc<PolicyService>,
    pub orchestrator: Arc<NotifyOrchestrator>,
    pub dispatcher: Arc<EventDispatcher>,
    pub reconciler: Reconciler,
    pub events_bus: EventsBus,
}

impl NodeContext {
    pub fn init(config: NodeConfig) -> anyhow::Result<Self> {
        let store = Arc::new(Store::new());
        let events_bus = EventsBus::new();

        let gateway = Arc::new(MpesaClient::new(config.mpesa.clone()));
        let storage =
            Arc::new(StorageClient::new(config.storage.clone()));

        let sms_primary = build_sms(&config, config.sms_primary)?;
        let sms_secondary = config
            .sms_fallback
            .map(|vendor| build_sms(&config, vendor))
            .transpose()?;
        ensure!(
            sms_secondary
                .as_ref()
                .map_or(true, |s| s.name() != sms_primary.name()),
            "SMS_FALLBACK_PROVIDER must differ from SMS_PRIMARY_PROVIDER",
        );

        let whatsapp: Option<Arc<dyn WhatsAppApi>> = config
            .whatsapp
            .clone()
            .map(|c| Arc::new(WhatsAppClient::new(c)) as Arc<dyn WhatsAppApi>);
        let email: Option<Arc<dyn EmailApi>> = config
            .email
            .clone()
            .map(|c| Arc::new(EmailClient::new(c)) as Arc<dyn EmailApi>);

        let payments = Arc::new(PaymentsManager::new(
            store.clone(),
            gateway,
            Box::new(SysRng::new()),
            config.payments.clone(),
        ));

        let orchestrator = Arc::new(NotifyOrchestrator::new(
            store.clone(),
            Box::new(SysRng::new()),
            sms_primary,
            sms_secondary,
            whatsapp.clone(),
            email,
            config.notify.clone(),
        ));

        let planner = IssuancePlanner::new(
            store.clone(),
            Box::new(SysRng::new()),
        );
        let certificates = Arc::new(CertificateDispatcher::new(
            store.clone(),
            storage,
            whatsapp,
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            store.clone(),
            planner,
            orchestrator.clone(),
            certificates,
            events_bus.clone(),
        ));

        let batch_processor = Arc::new(BatchProcessor::new(
            store.clone(),
            Box::new(SysRng::new()),
            config.batch.clone(),
        ));
        let policy_service = Arc::new(PolicyService::new(
            store.clone(),
            Box::new(SysRng::new()),
        ));

        let jobs = JobQueue::new(store.clone());
        let reconciler = Reconciler::new(
            store.clone(),
            payments.clone(),
            jobs,
            dispatcher.clone(),
        );

        Ok(Self {
            config,
            store,
            payments,
            batch_processor,
            policy_service,
            orchestrator,
            dispatcher,
            reconciler,
            events_bus,
        })
    }
}

fn build_sms(
    config: &NodeConfig,
    vendor: SmsVendor,
) -> anyhow::Result<Arc<dyn SmsApi>> {
    match vendor {
        SmsVendor::Atalking => {
            let vendor_config = config.atalking.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "sms provider 'atalking' selected but ATALKING_* \
                     config is missing"
                )
            })?;
            Ok(Arc::new(AtalkingClient::new(vendor_config)))
        }
        SmsVendor::Onfon => {
            let vendor_config = config.onfon.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "sms provider 'onfon' selected but ONFON_* config \
                     is missing"
                )
            })?;
            Ok(Arc::new(OnfonClient::new(vendor_config)))
        }
    }
}
