//! Object storage client.
//!
//! Talks to the internal storage service, which fronts the actual bucket and
//! issues pre-signed download urls. Keys are opaque slash-separated paths,
//! e.g. `certificates/2026/03/POL-xxxx.pdf`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;

use crate::error::ProviderError;
use crate::rest::RestClient;
use crate::traits::ObjectStorageApi;

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub base_url: String,
    pub api_token: String,
}

pub struct StorageClient {
    rest: RestClient,
    config: StorageConfig,
}

impl StorageClient {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            rest: RestClient::new("node", "storage"),
            config,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/v1/objects/{key}", self.config.base_url)
    }
}

#[async_trait]
impl ObjectStorageApi for StorageClient {
    #[instrument(skip_all, name = "(storage-put)")]
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct PutResponse {
            key: String,
        }

        let builder = self
            .rest
            .inner()
            .put(self.object_url(key))
            .bearer_auth(&self.config.api_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        let resp: PutResponse = self.rest.send(builder).await?;
        Ok(resp.key)
    }

    #[instrument(skip_all, name = "(storage-sign)")]
    async fn signed_url(
        &self,
        key: &str,
        ttl_secs: u64,
    ) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct SignResponse {
            url: String,
        }

        let url = format!("{}/sign?ttl={ttl_secs}", self.object_url(key));
        let resp: SignResponse = self
            .rest
            .get_json(&url, Some(&self.config.api_token))
            .await?;
        Ok(resp.url)
    }

    #[instrument(skip_all, name = "(storage-get)")]
    async fn get(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .rest
            .inner()
            .get(self.object_url(key))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                crate::error::status_error_kind(status),
                format!("storage: HTTP {status}"),
            ));
        }
        let bytes = response.bytes().await.map_err(ProviderError::from)?;
        Ok(bytes.to_vec())
    }
}
