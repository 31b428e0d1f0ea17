//! Mobile money (STK push) provider client.
//!
//! Speaks the Daraja-style REST API: OAuth client-credentials token, an STK
//! push endpoint, and an STK push query endpoint. The access token is cached
//! until shortly before it expires.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::models::{PaymentResult, PushRequest, PushResponse};
use crate::rest::RestClient;
use crate::traits::MobileMoneyApi;

/// Renew the cached token this long before its stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
}

pub struct MpesaClient {
    rest: RestClient,
    config: MpesaConfig,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            rest: RestClient::new("node", "mpesa"),
            config,
            cached_token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        if let Some((token, expires_at)) =
            self.cached_token.lock().unwrap().clone()
        {
            if Instant::now() < expires_at {
                return Ok(token);
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: String,
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url,
        );
        let builder = self
            .rest
            .inner()
            .get(&url)
            .basic_auth(
                &self.config.consumer_key,
                Some(&self.config.consumer_secret),
            );
        let resp: TokenResponse = self.rest.send(builder).await?;

        let expires_in = resp
            .expires_in
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));
        let expires_at =
            Instant::now() + expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN);

        let mut locked = self.cached_token.lock().unwrap();
        *locked = Some((resp.access_token.clone(), expires_at));
        debug!("refreshed mpesa access token");
        Ok(resp.access_token)
    }

    /// `base64(shortcode + passkey + timestamp)`, per the provider docs.
    fn password(&self, timestamp: &str) -> String {
        let raw = format!(
            "{}{}{timestamp}",
            self.config.short_code, self.config.passkey,
        );
        base64::engine::general_purpose::STANDARD.encode(raw)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'static str,
    amount: String,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    response_code: String,
    response_description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryResponse {
    result_code: String,
    result_desc: String,
    receipt_number: Option<String>,
}

#[async_trait]
impl MobileMoneyApi for MpesaClient {
    #[instrument(skip_all, name = "(mpesa-push)")]
    async fn initiate_push(
        &self,
        req: &PushRequest,
    ) -> Result<PushResponse, ProviderError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

        // The push API takes whole shillings; amounts are always
        // whole-shilling constants.
        let amount_kes = req.amount.kes().trunc().to_string();
        // E.164 without the leading '+'.
        let msisdn = &req.phone.as_str()[1..];

        let body = StkPushBody {
            business_short_code: &self.config.short_code,
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: amount_kes,
            party_a: msisdn,
            party_b: &self.config.short_code,
            phone_number: msisdn,
            callback_url: &self.config.callback_url,
            account_reference: &req.account_reference,
            transaction_desc: &req.description,
        };

        let url = format!(
            "{}/mpesa/stkpush/v1/processrequest",
            self.config.base_url,
        );
        let resp: StkPushResponse =
            self.rest.post_json(&url, Some(&token), &body).await?;

        Ok(PushResponse {
            checkout_id: resp.checkout_request_id,
            merchant_id: resp.merchant_request_id,
            response_code: resp.response_code.parse().unwrap_or(-1),
            response_description: resp.response_description,
        })
    }

    #[instrument(skip_all, name = "(mpesa-query)")]
    async fn query_status(
        &self,
        checkout_id: &str,
    ) -> Result<PaymentResult, ProviderError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

        let body = serde_json::json!({
            "BusinessShortCode": self.config.short_code,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_id,
        });

        let url = format!(
            "{}/mpesa/stkpushquery/v1/query",
            self.config.base_url,
        );
        let resp: StkQueryResponse =
            self.rest.post_json(&url, Some(&token), &body).await?;

        let result_code = resp.result_code.parse::<i64>().unwrap_or(-1);
        Ok(PaymentResult::from_code(
            result_code,
            &resp.result_desc,
            resp.receipt_number,
        ))
    }
}
