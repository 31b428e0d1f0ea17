//! Certificate generation and delivery for freshly activated policies.
//!
//! For every `POLICY_ACTIVATED` event: render the certificate artifact,
//! store it under a deterministic key, obtain a signed download url, and
//! push the document over WhatsApp. The SMS containing the link is sent by
//! the notification orchestrator regardless, so a WhatsApp failure only
//! loses the attachment, never the notification.

use std::sync::Arc;

use bima_api::traits::{ObjectStorageApi, WhatsAppApi};
use chrono::Datelike;
use common::ids::PolicyId;
use tracing::{info, instrument, warn};

use crate::error::Error;
use crate::models::policy::Policy;
use crate::models::rider::Rider;
use crate::store::Store;

/// Signed urls stay valid for a week; riders re-request from the app after
/// that.
const SIGNED_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Where a generated certificate ended up.
#[derive(Clone, Debug)]
pub struct CertificateDelivery {
    pub storage_key: String,
    pub signed_url: String,
    pub whatsapp_delivered: bool,
}

pub struct CertificateDispatcher {
    store: Arc<Store>,
    storage: Arc<dyn ObjectStorageApi>,
    whatsapp: Option<Arc<dyn WhatsAppApi>>,
}

impl CertificateDispatcher {
    pub fn new(
        store: Arc<Store>,
        storage: Arc<dyn ObjectStorageApi>,
        whatsapp: Option<Arc<dyn WhatsAppApi>>,
    ) -> Self {
        Self {
            store,
            storage,
            whatsapp,
        }
    }

    /// Generate, store, and deliver the certificate for one activated
    /// policy.
    #[instrument(skip_all, name = "(certificate)")]
    pub async fn dispatch(
        &self,
        policy_id: PolicyId,
    ) -> Result<CertificateDelivery, Error> {
        let (policy, rider) = self.store.read(|state| {
            let policy = state.policy(policy_id)?.clone();
            let rider = state.rider(policy.rider_id)?.clone();
            Ok::<_, Error>((policy, rider))
        })?;

        let policy_number =
            policy.policy_number.clone().ok_or_else(|| {
                Error::Validation(format!(
                    "policy {} has no policy number",
                    policy_id.short(),
                ))
            })?;

        let html = render_certificate(&policy, &rider);
        let year = policy
            .coverage_start
            .expect("active policies have coverage")
            .to_datetime()
            .year();
        let key = format!("certificates/{year}/{policy_number}.html");

        self.storage
            .put(&key, html.into_bytes(), "text/html; charset=utf-8")
            .await?;
        let signed_url =
            self.storage.signed_url(&key, SIGNED_URL_TTL_SECS).await?;

        let whatsapp_delivered = match &self.whatsapp {
            Some(provider) => {
                let filename = format!("{policy_number}.html");
                let caption =
                    format!("Your Bima certificate {policy_number}");
                match provider
                    .send_document(
                        &rider.phone,
                        &signed_url,
                        &filename,
                        &caption,
                    )
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(
                            policy = %policy_id.short(),
                            "whatsapp document delivery failed: {e}",
                        );
                        false
                    }
                }
            }
            None => false,
        };

        info!(
            policy = %policy_id.short(),
            key = %key,
            whatsapp_delivered,
            "certificate dispatched",
        );
        Ok(CertificateDelivery {
            storage_key: key,
            signed_url,
            whatsapp_delivered,
        })
    }
}

/// The certificate artifact. Underwriter branding and the legal schedule
/// are templated by ops; this carries the facts.
fn render_certificate(policy: &Policy, rider: &Rider) -> String {
    let policy_number =
        policy.policy_number.as_deref().unwrap_or("UNASSIGNED");
    let start = policy
        .coverage_start
        .map(|t| t.to_string())
        .unwrap_or_default();
    let end = policy
        .coverage_end
        .map(|t| t.to_string())
        .unwrap_or_default();
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\">\
         <title>Certificate {policy_number}</title></head>\n<body>\n\
         <h1>Certificate of Insurance</h1>\n\
         <p>Policy number: <strong>{policy_number}</strong></p>\n\
         <p>Insured phone: ..{phone_tail}</p>\n\
         <p>Cover: {policy_type}</p>\n\
         <p>Premium: KES {premium}</p>\n\
         <p>Coverage: {start} to {end}</p>\n\
         </body>\n</html>\n",
        phone_tail = rider.phone.tail(),
        policy_type = policy.policy_type,
        premium = policy.premium_amount,
    )
}
