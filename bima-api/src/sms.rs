//! SMS provider clients.
//!
//! Two independent vendors with identical capability shape sit behind the
//! notification orchestrator's primary / fallback pair: Africa's Talking
//! style ([`AtalkingClient`]) and Onfon style ([`OnfonClient`]).

use async_trait::async_trait;
use common::money::Amount;
use common::phone::PhoneNumber;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::instrument;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::models::{BulkSendOutcome, SmsBalance, SmsSendOk};
use crate::rest::RestClient;
use crate::traits::SmsApi;

// --- Africa's Talking style vendor --- //

#[derive(Clone, Debug)]
pub struct AtalkingConfig {
    pub base_url: String,
    pub username: String,
    pub api_key: String,
    pub sender_id: String,
}

pub struct AtalkingClient {
    rest: RestClient,
    config: AtalkingConfig,
}

#[derive(Deserialize)]
struct AtalkingResponse {
    #[serde(rename = "SMSMessageData")]
    data: AtalkingMessageData,
}

#[derive(Deserialize)]
struct AtalkingMessageData {
    #[serde(rename = "Recipients")]
    recipients: Vec<AtalkingRecipient>,
}

#[derive(Deserialize)]
struct AtalkingRecipient {
    #[serde(rename = "number")]
    number: String,
    #[serde(rename = "status")]
    status: String,
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "cost")]
    cost: String,
}

impl AtalkingClient {
    pub fn new(config: AtalkingConfig) -> Self {
        Self {
            rest: RestClient::new("node", "atalking"),
            config,
        }
    }

    async fn send_inner(
        &self,
        recipients: &str,
        message: &str,
    ) -> Result<AtalkingResponse, ProviderError> {
        let url = format!("{}/version1/messaging", self.config.base_url);
        let params = [
            ("username", self.config.username.as_str()),
            ("to", recipients),
            ("message", message),
            ("from", self.config.sender_id.as_str()),
        ];
        let builder = self
            .rest
            .inner()
            .post(&url)
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json")
            .form(&params);
        self.rest.send(builder).await
    }

    fn recipient_to_ok(
        r: &AtalkingRecipient,
    ) -> Result<SmsSendOk, ProviderError> {
        match r.status.as_str() {
            "Success" => Ok(SmsSendOk {
                message_id: r.message_id.clone(),
                cost: parse_vendor_cost(&r.cost),
            }),
            "InvalidPhoneNumber" => Err(ProviderError::new(
                ProviderErrorKind::InvalidRecipient,
                format!("invalid phone ..{}", phone_tail(&r.number)),
            )),
            "UserInBlacklist" => Err(ProviderError::new(
                ProviderErrorKind::Blacklisted,
                "recipient in blacklist",
            )),
            "InvalidSenderId" => Err(ProviderError::new(
                ProviderErrorKind::InvalidSender,
                "sender id rejected",
            )),
            other => Err(ProviderError::rejected(format!(
                "send rejected: {other}"
            ))),
        }
    }
}

#[async_trait]
impl SmsApi for AtalkingClient {
    fn name(&self) -> &'static str {
        "atalking"
    }

    #[instrument(skip_all, name = "(atalking-send)")]
    async fn send(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        let resp = self.send_inner(to.as_str(), message).await?;
        let recipient = resp.data.recipients.first().ok_or_else(|| {
            ProviderError::rejected("response contained no recipients")
        })?;
        Self::recipient_to_ok(recipient)
    }

    #[instrument(skip_all, name = "(atalking-send-bulk)")]
    async fn send_bulk(
        &self,
        messages: &[(PhoneNumber, String)],
    ) -> Result<BulkSendOutcome, ProviderError> {
        // The vendor bulk API requires a single shared message body; bulk
        // callers always pass identical bodies, so sample the first.
        let body = match messages.first() {
            Some((_, body)) => body,
            None => return Ok(BulkSendOutcome { results: vec![] }),
        };
        let recipients = messages
            .iter()
            .map(|(p, _)| p.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let resp = self.send_inner(&recipients, body).await?;

        let results = messages
            .iter()
            .map(|(phone, _)| {
                let outcome = resp
                    .data
                    .recipients
                    .iter()
                    .find(|r| r.number == phone.as_str())
                    .map(Self::recipient_to_ok)
                    .unwrap_or_else(|| {
                        Err(ProviderError::rejected("missing from response"))
                    });
                (phone.clone(), outcome)
            })
            .collect();
        Ok(BulkSendOutcome { results })
    }

    async fn get_balance(&self) -> Result<SmsBalance, ProviderError> {
        #[derive(Deserialize)]
        struct UserResponse {
            #[serde(rename = "UserData")]
            user_data: UserData,
        }
        #[derive(Deserialize)]
        struct UserData {
            balance: String,
        }

        let url = format!(
            "{}/version1/user?username={}",
            self.config.base_url, self.config.username,
        );
        let builder = self
            .rest
            .inner()
            .get(&url)
            .header("apiKey", &self.config.api_key)
            .header("Accept", "application/json");
        let resp: UserResponse = self.rest.send(builder).await?;
        let balance = parse_vendor_cost(&resp.user_data.balance)
            .unwrap_or(Amount::ZERO);
        Ok(SmsBalance {
            balance,
            currency: "KES".to_owned(),
        })
    }

    async fn is_healthy(&self) -> bool {
        self.get_balance().await.is_ok()
    }
}

// --- Onfon style vendor --- //

#[derive(Clone, Debug)]
pub struct OnfonConfig {
    pub base_url: String,
    pub api_key: String,
    pub client_id: String,
    pub sender_id: String,
}

pub struct OnfonClient {
    rest: RestClient,
    config: OnfonConfig,
}

#[derive(Deserialize)]
struct OnfonResponse {
    #[serde(rename = "ErrorCode")]
    error_code: i64,
    #[serde(rename = "ErrorDescription")]
    error_description: Option<String>,
    #[serde(rename = "Data")]
    data: Option<Vec<OnfonMessageData>>,
}

#[derive(Deserialize)]
struct OnfonMessageData {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "MobileNumber")]
    mobile_number: String,
}

impl OnfonClient {
    pub fn new(config: OnfonConfig) -> Self {
        Self {
            rest: RestClient::new("node", "onfon"),
            config,
        }
    }

    fn classify_error(code: i64, description: &str) -> ProviderError {
        let kind = match code {
            // Vendor codes for bad MSISDNs and blocked recipients.
            -2 | 10 => ProviderErrorKind::InvalidRecipient,
            11 => ProviderErrorKind::Blacklisted,
            -4 => ProviderErrorKind::InvalidSender,
            -1 => ProviderErrorKind::AuthFailed,
            _ => ProviderErrorKind::Rejected,
        };
        ProviderError::new(kind, format!("vendor error {code}: {description}"))
    }

    async fn send_inner(
        &self,
        messages: &[(PhoneNumber, String)],
    ) -> Result<OnfonResponse, ProviderError> {
        let url = format!("{}/v1/sms/SendBulkSMS", self.config.base_url);
        let message_params = messages
            .iter()
            .map(|(phone, body)| {
                serde_json::json!({
                    "Number": phone.as_str(),
                    "Text": body,
                })
            })
            .collect::<Vec<_>>();
        let body = serde_json::json!({
            "SenderId": self.config.sender_id,
            "ApiKey": self.config.api_key,
            "ClientId": self.config.client_id,
            "MessageParameters": message_params,
        });
        self.rest.post_json(&url, None, &body).await
    }
}

#[async_trait]
impl SmsApi for OnfonClient {
    fn name(&self) -> &'static str {
        "onfon"
    }

    #[instrument(skip_all, name = "(onfon-send)")]
    async fn send(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        let messages = [(to.clone(), message.to_owned())];
        let resp = self.send_inner(&messages).await?;
        if resp.error_code != 0 {
            return Err(Self::classify_error(
                resp.error_code,
                resp.error_description.as_deref().unwrap_or_default(),
            ));
        }
        let data = resp
            .data
            .as_deref()
            .and_then(|d| d.first())
            .ok_or_else(|| {
                ProviderError::rejected("response contained no message data")
            })?;
        Ok(SmsSendOk {
            message_id: data.message_id.clone(),
            cost: None,
        })
    }

    #[instrument(skip_all, name = "(onfon-send-bulk)")]
    async fn send_bulk(
        &self,
        messages: &[(PhoneNumber, String)],
    ) -> Result<BulkSendOutcome, ProviderError> {
        if messages.is_empty() {
            return Ok(BulkSendOutcome { results: vec![] });
        }
        let resp = self.send_inner(messages).await?;
        if resp.error_code != 0 {
            return Err(Self::classify_error(
                resp.error_code,
                resp.error_description.as_deref().unwrap_or_default(),
            ));
        }
        let data = resp.data.unwrap_or_default();
        let results = messages
            .iter()
            .map(|(phone, _)| {
                let outcome = data
                    .iter()
                    .find(|d| d.mobile_number == phone.as_str())
                    .map(|d| {
                        Ok(SmsSendOk {
                            message_id: d.message_id.clone(),
                            cost: None,
                        })
                    })
                    .unwrap_or_else(|| {
                        Err(ProviderError::rejected("missing from response"))
                    });
                (phone.clone(), outcome)
            })
            .collect();
        Ok(BulkSendOutcome { results })
    }

    async fn get_balance(&self) -> Result<SmsBalance, ProviderError> {
        #[derive(Deserialize)]
        struct BalanceResponse {
            #[serde(rename = "Data")]
            data: Vec<BalanceData>,
        }
        #[derive(Deserialize)]
        struct BalanceData {
            #[serde(rename = "Credits")]
            credits: f64,
        }

        let url = format!(
            "{}/v1/Balance?ApiKey={}&ClientId={}",
            self.config.base_url, self.config.api_key, self.config.client_id,
        );
        let resp: BalanceResponse = self.rest.get_json(&url, None).await?;
        let credits = resp.data.first().map(|d| d.credits).unwrap_or(0.0);
        // Credits are whole sms units, not money; expose as whole amounts.
        Ok(SmsBalance {
            balance: Amount::from_kes(credits as i64),
            currency: "credits".to_owned(),
        })
    }

    async fn is_healthy(&self) -> bool {
        self.get_balance().await.is_ok()
    }
}

// --- Small helpers --- //

/// Vendor cost strings look like "KES 0.8000".
fn parse_vendor_cost(s: &str) -> Option<Amount> {
    let numeric = s.trim_start_matches(|c: char| !c.is_ascii_digit());
    let dec = numeric.parse::<Decimal>().ok()?;
    Amount::try_from_kes_decimal(dec.round_dp(2)).ok()
}

fn phone_tail(number: &str) -> &str {
    let len = number.len();
    &number[len.saturating_sub(4)..]
}
