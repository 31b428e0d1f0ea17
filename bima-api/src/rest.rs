//! Shared REST client with timeouts.

use std::borrow::Cow;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{status_error_kind, ProviderError};

pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A thin [`reqwest::Client`] wrapper shared by the vendor clients.
///
/// The `from` and `to` fields succinctly specify the calling component and
/// the provider this client talks to, e.g. `from`="node", `to`="mpesa".
/// Both are logged so requests from this client can be differentiated from
/// those made by other clients in the same process.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    from: Cow<'static, str>,
    to: &'static str,
}

impl RestClient {
    pub fn new(
        from: impl Into<Cow<'static, str>>,
        to: &'static str,
    ) -> Self {
        let from = from.into();
        let client = reqwest::Client::builder()
            .user_agent(from.as_ref().to_owned())
            .timeout(API_REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest Client");
        Self { client, from, to }
    }

    /// Construct a [`RestClient`] from a preconfigured [`reqwest::Client`].
    pub fn from_inner(
        client: reqwest::Client,
        from: impl Into<Cow<'static, str>>,
        to: &'static str,
    ) -> Self {
        Self {
            client,
            from: from.into(),
            to,
        }
    }

    #[inline]
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST a JSON body with a bearer token, expecting a JSON response.
    pub async fn post_json<Req, Resp>(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Req,
    ) -> Result<Resp, ProviderError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut builder = self.client.post(url).json(body);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        self.send(builder).await
    }

    /// GET a JSON response with a bearer token.
    pub async fn get_json<Resp>(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<Resp, ProviderError>
    where
        Resp: DeserializeOwned,
    {
        let mut builder = self.client.get(url);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        self.send(builder).await
    }

    /// Send a fully-built request and deserialize the JSON response,
    /// classifying transport and status failures into [`ProviderError`].
    pub async fn send<Resp>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Resp, ProviderError>
    where
        Resp: DeserializeOwned,
    {
        let response = builder.send().await.map_err(ProviderError::from)?;
        let status = response.status();
        debug!(
            from = %self.from,
            to = %self.to,
            status = %status,
            "provider response",
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                status_error_kind(status),
                format!("{}: HTTP {status}: {body}", self.to),
            ));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| ProviderError::rejected(format!(
                "{}: bad response body: {e:#}",
                self.to,
            )))
    }
}
