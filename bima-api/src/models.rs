//! Wire models for all providers.
//!
//! Mobile-money callback payloads arrive as arbitrary provider JSON;
//! [`PaymentCallback::from_json`] is the adapter that extracts the fields the
//! core needs while the raw value is stored verbatim on the payment request.

use common::money::Amount;
use common::phone::PhoneNumber;
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

// --- Mobile money --- //

/// Provider result code for a successful push.
pub const MM_RESULT_SUCCESS: i64 = 0;
/// Provider result code for "user cancelled on handset".
pub const MM_RESULT_USER_CANCELLED: i64 = 1032;
/// Provider result code for "request timed out on handset / unreachable".
pub const MM_RESULT_HANDSET_TIMEOUT: i64 = 1037;
/// Provider result code for "insufficient funds".
pub const MM_RESULT_INSUFFICIENT_FUNDS: i64 = 1;
/// Provider result code for "transaction still processing".
pub const MM_RESULT_PENDING: i64 = 500_001;

/// Request to initiate an STK push on the rider's handset.
#[derive(Clone, Debug, Serialize)]
pub struct PushRequest {
    pub phone: PhoneNumber,
    pub amount: Amount,
    /// Shows up on the rider's statement; also our correlation handle.
    pub account_reference: String,
    pub description: String,
}

/// The provider's synchronous answer to a push request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PushResponse {
    pub checkout_id: String,
    pub merchant_id: String,
    pub response_code: i64,
    pub response_description: String,
}

impl PushResponse {
    pub fn accepted(&self) -> bool {
        self.response_code == MM_RESULT_SUCCESS
    }
}

/// The outcome of a status query or a parsed callback.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PaymentResult {
    /// Settled; `receipt` is the provider's globally-unique receipt number.
    Success { receipt: String },
    /// The rider rejected the push on their handset.
    Cancelled,
    /// Terminal failure, e.g. insufficient funds.
    Failed { code: i64, description: String },
    /// Not yet resolved; ask again later.
    Pending,
}

impl PaymentResult {
    pub fn from_code(
        result_code: i64,
        result_description: &str,
        receipt_number: Option<String>,
    ) -> Self {
        match result_code {
            MM_RESULT_SUCCESS => match receipt_number {
                Some(receipt) => Self::Success { receipt },
                // A "success" without a receipt can't be settled; treat it
                // as still pending so the reconciler asks again.
                None => Self::Pending,
            },
            MM_RESULT_USER_CANCELLED => Self::Cancelled,
            MM_RESULT_PENDING => Self::Pending,
            code => Self::Failed {
                code,
                description: result_description.to_owned(),
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A parsed provider callback.
#[derive(Clone, Debug)]
pub struct PaymentCallback {
    pub checkout_id: String,
    pub result: PaymentResult,
    /// The payload exactly as it arrived, persisted for audit.
    pub raw: serde_json::Value,
}

impl PaymentCallback {
    /// Parse a callback payload. Accepts both the flat shape
    /// `{checkout_id, result_code, result_description, receipt_number?}`
    /// and the nested `{Body: {stkCallback: {...}}}` shape the provider
    /// sends in production.
    pub fn from_json(raw: serde_json::Value) -> anyhow::Result<Self> {
        let body = raw
            .pointer("/Body/stkCallback")
            .unwrap_or(&raw);

        let checkout_id = body
            .get("CheckoutRequestID")
            .or_else(|| body.get("checkout_id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("callback missing checkout id"))?
            .to_owned();

        let result_code = body
            .get("ResultCode")
            .or_else(|| body.get("result_code"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("callback missing result code"))?;

        let result_description = body
            .get("ResultDesc")
            .or_else(|| body.get("result_description"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();

        let receipt_number = body
            .get("ReceiptNumber")
            .or_else(|| body.get("receipt_number"))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            // Production payloads bury the receipt in callback metadata.
            .or_else(|| receipt_from_metadata(body));

        let result = PaymentResult::from_code(
            result_code,
            &result_description,
            receipt_number,
        );

        Ok(Self {
            checkout_id,
            result,
            raw,
        })
    }
}

fn receipt_from_metadata(body: &serde_json::Value) -> Option<String> {
    let items = body.pointer("/CallbackMetadata/Item")?.as_array()?;
    items.iter().find_map(|item| {
        let name = item.get("Name")?.as_str()?;
        if name == "MpesaReceiptNumber" {
            item.get("Value")?.as_str().map(str::to_owned)
        } else {
            None
        }
    })
}

// --- SMS --- //

#[derive(Clone, Debug)]
pub struct SmsSendOk {
    pub message_id: String,
    /// Cost in minor units, when the provider reports it.
    pub cost: Option<Amount>,
}

#[derive(Clone, Debug)]
pub struct SmsBalance {
    pub balance: Amount,
    pub currency: String,
}

/// Per-recipient outcome of a bulk send.
#[derive(Clone, Debug)]
pub struct BulkSendOutcome {
    pub results: Vec<(PhoneNumber, Result<SmsSendOk, crate::error::ProviderError>)>,
}

impl BulkSendOutcome {
    pub fn total_failed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }

    pub fn total_sent(&self) -> usize {
        self.results.len() - self.total_failed()
    }
}

/// Terminal states a provider delivery callback can report.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Failed,
    Bounced,
    Complained,
    Opened,
    Clicked,
}

/// A delivery report received on a provider webhook, already normalized by
/// the (out-of-scope) HTTP layer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeliveryReport {
    pub message_id: String,
    pub state: DeliveryState,
    pub reason: Option<String>,
    /// "hard" or "soft", for bounces.
    pub bounce_type: Option<String>,
    pub timestamp: TimestampMs,
}

impl DeliveryReport {
    /// Whether this report should suppress future sends to the recipient on
    /// this channel.
    pub fn is_suppressing(&self) -> bool {
        match self.state {
            DeliveryState::Complained => true,
            DeliveryState::Bounced =>
                self.bounce_type.as_deref() == Some("hard"),
            _ => false,
        }
    }
}

// --- Email --- //

#[derive(Clone, Debug, Serialize)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    pub preview_text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmailSendOk {
    pub message_id: String,
}
