//! WhatsApp provider client, speaking the Cloud-API message shape.

use async_trait::async_trait;
use common::phone::PhoneNumber;
use serde::Deserialize;
use tracing::instrument;

use crate::error::ProviderError;
use crate::models::SmsSendOk;
use crate::rest::RestClient;
use crate::traits::WhatsAppApi;

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub base_url: String,
    pub phone_number_id: String,
    pub access_token: String,
}

pub struct WhatsAppClient {
    rest: RestClient,
    config: WhatsAppConfig,
}

#[derive(Deserialize)]
struct SendResponse {
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            rest: RestClient::new("node", "whatsapp"),
            config,
        }
    }

    async fn post_message(
        &self,
        body: serde_json::Value,
    ) -> Result<SmsSendOk, ProviderError> {
        let url = format!(
            "{}/{}/messages",
            self.config.base_url, self.config.phone_number_id,
        );
        let resp: SendResponse = self
            .rest
            .post_json(&url, Some(&self.config.access_token), &body)
            .await?;
        let message = resp.messages.into_iter().next().ok_or_else(|| {
            ProviderError::rejected("response contained no messages")
        })?;
        Ok(SmsSendOk {
            message_id: message.id,
            cost: None,
        })
    }
}

#[async_trait]
impl WhatsAppApi for WhatsAppClient {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    #[instrument(skip_all, name = "(whatsapp-text)")]
    async fn send_text(
        &self,
        to: &PhoneNumber,
        message: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        self.post_message(serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to.as_str(),
            "type": "text",
            "text": { "body": message },
        }))
        .await
    }

    #[instrument(skip_all, name = "(whatsapp-document)")]
    async fn send_document(
        &self,
        to: &PhoneNumber,
        url: &str,
        filename: &str,
        caption: &str,
    ) -> Result<SmsSendOk, ProviderError> {
        self.post_message(serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to.as_str(),
            "type": "document",
            "document": {
                "link": url,
                "filename": filename,
                "caption": caption,
            },
        }))
        .await
    }

    async fn is_healthy(&self) -> bool {
        // The Cloud API has no cheap ping; probe the phone-number resource.
        let url =
            format!("{}/{}", self.config.base_url, self.config.phone_number_id);
        self.rest
            .get_json::<serde_json::Value>(
                &url,
                Some(&self.config.access_token),
            )
            .await
            .is_ok()
    }
}
