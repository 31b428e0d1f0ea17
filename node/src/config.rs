//! Env-derived configuration.
//!
//! Recognized variables (see `.env.example` in ops):
//!
//! - `DEPLOY_ENVIRONMENT`: dev / staging / prod.
//! - `MPESA_BASE_URL`, `MPESA_CONSUMER_KEY`, `MPESA_CONSUMER_SECRET`,
//!   `MPESA_SHORT_CODE`, `MPESA_PASSKEY`, `MPESA_CALLBACK_URL`.
//! - `SMS_PRIMARY_PROVIDER` / `SMS_FALLBACK_PROVIDER`: `atalking` or
//!   `onfon`.
//! - `ATALKING_BASE_URL`, `ATALKING_USERNAME`, `ATALKING_API_KEY`,
//!   `ATALKING_SENDER_ID`.
//! - `ONFON_BASE_URL`, `ONFON_API_KEY`, `ONFON_CLIENT_ID`,
//!   `ONFON_SENDER_ID`.
//! - `WHATSAPP_BASE_URL`, `WHATSAPP_PHONE_NUMBER_ID`,
//!   `WHATSAPP_ACCESS_TOKEN` (optional; channel disabled when unset).
//! - `EMAIL_BASE_URL`, `EMAIL_SERVER_TOKEN`, `EMAIL_FROM_ADDRESS`
//!   (optional).
//! - `STORAGE_BASE_URL`, `STORAGE_API_TOKEN`.
//! - `SMS_MAX_RETRIES`, `SMS_RETRY_DELAY_MS`, `SMS_FAILOVER_ENABLED`.
//! - `BATCH_UTC_OFFSET_HOURS` (default 3), `PLATFORM_COMMISSION_BPS`.

use std::env;
use std::time::Duration;

use anyhow::Context;
use bima_api::email::EmailConfig;
use bima_api::mpesa::MpesaConfig;
use bima_api::sms::{AtalkingConfig, OnfonConfig};
use bima_api::storage::StorageConfig;
use bima_api::whatsapp::WhatsAppConfig;
use bima_core::batch::BatchConfig;
use bima_core::notify::NotifyConfig;
use bima_core::payments::manager::PaymentsConfig;
use common::env::DeployEnv;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SmsVendor {
    Atalking,
    Onfon,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub deploy_env: DeployEnv,
    pub mpesa: MpesaConfig,
    pub sms_primary: SmsVendor,
    pub sms_fallback: Option<SmsVendor>,
    pub atalking: Option<AtalkingConfig>,
    pub onfon: Option<OnfonConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub email: Option<EmailConfig>,
    pub storage: StorageConfig,
    pub payments: PaymentsConfig,
    pub notify: NotifyConfig,
    pub batch: BatchConfig,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let deploy_env = DeployEnv::from_env()?;

        let mpesa = MpesaConfig {
            base_url: require("MPESA_BASE_URL")?,
            consumer_key: require("MPESA_CONSUMER_KEY")?,
            consumer_secret: require("MPESA_CONSUMER_SECRET")?,
            short_code: require("MPESA_SHORT_CODE")?,
            passkey: require("MPESA_PASSKEY")?,
            callback_url: require("MPESA_CALLBACK_URL")?,
        };

        let sms_primary = parse_vendor(&require("SMS_PRIMARY_PROVIDER")?)?;
        let sms_fallback = optional("SMS_FALLBACK_PROVIDER")
            .map(|v| parse_vendor(&v))
            .transpose()?;

        let atalking = optional("ATALKING_API_KEY").map(|api_key| {
            anyhow::Ok(AtalkingConfig {
                base_url: optional("ATALKING_BASE_URL").unwrap_or_else(
                    || "https://api.africastalking.com".to_owned(),
                ),
                username: require("ATALKING_USERNAME")?,
                api_key,
                sender_id: require("ATALKING_SENDER_ID")?,
            })
        });
        let atalking = atalking.transpose()?;

        let onfon = optional("ONFON_API_KEY").map(|api_key| {
            anyhow::Ok(OnfonConfig {
                base_url: optional("ONFON_BASE_URL").unwrap_or_else(
                    || "https://api.onfonmedia.co.ke".to_owned(),
                ),
                api_key,
                client_id: require("ONFON_CLIENT_ID")?,
                sender_id: require("ONFON_SENDER_ID")?,
            })
        });
        let onfon = onfon.transpose()?;

        let whatsapp =
            optional("WHATSAPP_ACCESS_TOKEN").map(|access_token| {
                anyhow::Ok(WhatsAppConfig {
                    base_url: optional("WHATSAPP_BASE_URL")
                        .unwrap_or_else(|| {
                            "https://graph.facebook.com/v19.0".to_owned()
                        }),
                    phone_number_id: require("WHATSAPP_PHONE_NUMBER_ID")?,
                    access_token,
                })
            });
        let whatsapp = whatsapp.transpose()?;

        let email = optional("EMAIL_SERVER_TOKEN").map(|server_token| {
            anyhow::Ok(EmailConfig {
                base_url: optional("EMAIL_BASE_URL").unwrap_or_else(
                    || "https://api.postmarkapp.com".to_owned(),
                ),
                server_token,
                from_address: require("EMAIL_FROM_ADDRESS")?,
            })
        });
        let email = email.transpose()?;

        let storage = StorageConfig {
            base_url: require("STORAGE_BASE_URL")?,
            api_token: require("STORAGE_API_TOKEN")?,
        };

        let mut notify = NotifyConfig::default();
        if let Some(max_retries) = parse_optional("SMS_MAX_RETRIES")? {
            notify.max_retries = max_retries;
        }
        if let Some(delay_ms) = parse_optional("SMS_RETRY_DELAY_MS")? {
            notify.retry_delay = Duration::from_millis(delay_ms);
        }
        if let Some(enabled) = parse_optional("SMS_FAILOVER_ENABLED")? {
            notify.failover_enabled = enabled;
        }

        let mut batch = BatchConfig::default();
        if let Some(offset) = parse_optional("BATCH_UTC_OFFSET_HOURS")? {
            batch.utc_offset_hours = offset;
        }
        if let Some(bps) = parse_optional("PLATFORM_COMMISSION_BPS")? {
            batch.platform_commission_bps = bps;
        }
        notify.utc_offset_hours = batch.utc_offset_hours;

        Ok(Self {
            deploy_env,
            mpesa,
            sms_primary,
            sms_fallback,
            atalking,
            onfon,
            whatsapp,
            email,
            storage,
            payments: PaymentsConfig::default(),
            notify,
            batch,
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} was not set"))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_optional<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional(name)
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("{name} was not parseable"))
        })
        .transpose()
}

fn parse_vendor(value: &str) -> anyhow::Result<SmsVendor> {
    match value.to_ascii_lowercase().as_str() {
        "atalking" | "africastalking" => Ok(SmsVendor::Atalking),
        "onfon" => Ok(SmsVendor::Onfon),
        other => anyhow::bail!(
            "Unrecognized sms provider '{other}': \
             must be in ['atalking', 'onfon']"
        ),
    }
}
