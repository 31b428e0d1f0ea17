//! Email provider client, speaking a Postmark-style transactional API.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::models::{EmailMessage, EmailSendOk};
use crate::rest::RestClient;
use crate::traits::EmailApi;

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub base_url: String,
    pub server_token: String,
    pub from_address: String,
}

pub struct EmailClient {
    rest: RestClient,
    config: EmailConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendResponse {
    error_code: i64,
    message: Option<String>,
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
}

impl EmailClient {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            rest: RestClient::new("node", "email"),
            config,
        }
    }
}

#[async_trait]
impl EmailApi for EmailClient {
    fn name(&self) -> &'static str {
        "email"
    }

    #[instrument(skip_all, name = "(email-send)")]
    async fn send(
        &self,
        message: &EmailMessage,
    ) -> Result<EmailSendOk, ProviderError> {
        let url = format!("{}/email", self.config.base_url);
        let body = serde_json::json!({
            "From": self.config.from_address,
            "To": message.recipient,
            "Subject": message.subject,
            "TextBody": message.text,
            "HtmlBody": message.html,
            "MessageStream": "outbound",
        });

        let builder = self
            .rest
            .inner()
            .post(&url)
            .header("X-Postmark-Server-Token", &self.config.server_token)
            .json(&body);
        let resp: SendResponse = self.rest.send(builder).await?;

        if resp.error_code != 0 {
            let message = resp.message.unwrap_or_default();
            let kind = match resp.error_code {
                // Inactive or invalid recipient address.
                300 | 406 => ProviderErrorKind::InvalidRecipient,
                10 | 401 => ProviderErrorKind::AuthFailed,
                _ => ProviderErrorKind::Rejected,
            };
            return Err(ProviderError::new(
                kind,
                format!("vendor error {}: {message}", resp.error_code),
            ));
        }

        let message_id = resp.message_id.ok_or_else(|| {
            ProviderError::rejected("response missing message id")
        })?;
        Ok(EmailSendOk { message_id })
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/server", self.config.base_url);
        let builder = self
            .rest
            .inner()
            .get(&url)
            .header("X-Postmark-Server-Token", &self.config.server_token);
        self.rest.send::<serde_json::Value>(builder).await.is_ok()
    }
}
