//! HTTP client for Stable Diffusion UI style engines.

use super::ImageBackend;
use super::types::{ActiveModelConfig, ModelCatalog, ProgressEvent, RenderRequest, RenderTicket};
use crate::error::{BackendError, Result, check_status};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default engine base URL.
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:9000";

/// Default request timeout. Renders can block a single request for minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Client for the image engine's HTTP API.
///
/// # Example
///
/// ```rust,ignore
/// use easel::image::EngineClient;
///
/// let client = EngineClient::builder()
///     .base_url("http://gpu-box:9000")
///     .basic_auth("dXNlcjpwYXNz")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct EngineClient {
    http_client: reqwest::Client,
    base_url: Arc<str>,
    basic_auth: Option<Arc<str>>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("base_url", &self.base_url)
            .field("basic_auth", &self.basic_auth.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl EngineClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> EngineClientBuilder {
        EngineClientBuilder::default()
    }

    /// Base URL every path is appended to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a server path (or an absolute URL) against the base URL.
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.basic_auth {
            Some(cred) => builder.header(AUTHORIZATION, format!("Basic {cred}")),
            None => builder,
        }
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        trace!(%url, "GET");
        let response = self.authorize(self.http_client.get(&url)).send().await?;
        check_status(response).await
    }

    /// Decode a poll body holding zero or more concatenated JSON objects.
    ///
    /// # Errors
    ///
    /// Returns an error if any value in the body is malformed.
    pub fn decode_events(body: &[u8]) -> Result<Vec<ProgressEvent>> {
        serde_json::Deserializer::from_slice(body)
            .into_iter::<ProgressEvent>()
            .map(|ev| ev.map_err(BackendError::from))
            .collect()
    }
}

#[async_trait]
impl ImageBackend for EngineClient {
    async fn submit_render(&self, request: &RenderRequest) -> Result<RenderTicket> {
        let url = self.url("/render");
        debug!(
            prompt = %request.prompt,
            steps = request.num_inference_steps,
            model = %request.use_stable_diffusion_model,
            "Submitting render"
        );
        let response = self
            .authorize(self.http_client.post(&url))
            .json(request)
            .send()
            .await?;
        let ticket: RenderTicket = check_status(response).await?.json().await?;
        debug!(task = ticket.task, stream = %ticket.stream, "Render accepted");
        Ok(ticket)
    }

    async fn poll_stream(&self, stream: &str) -> Result<Vec<ProgressEvent>> {
        let url = self.url(stream);
        let response = self.authorize(self.http_client.get(&url)).send().await?;
        if response.status() == StatusCode::TOO_EARLY {
            trace!(%url, "Stream not ready");
            return Ok(Vec::new());
        }
        let body = check_status(response).await?.bytes().await?;
        Self::decode_events(&body)
    }

    async fn fetch_image_bytes(&self, path: &str) -> Result<Bytes> {
        Ok(self.get(path).await?.bytes().await?)
    }

    async fn cancel_render(&self, task: i64) -> Result<()> {
        debug!(task, "Cancelling render");
        self.get(&format!("/image/stop?task={task}")).await?;
        Ok(())
    }

    async fn fetch_model_catalog(&self) -> Result<ModelCatalog> {
        Ok(self.get("/get/models").await?.json().await?)
    }

    async fn fetch_active_model_config(&self) -> Result<ActiveModelConfig> {
        Ok(self.get("/get/app_config").await?.json().await?)
    }
}

/// Builder for [`EngineClient`].
#[derive(Debug, Default)]
pub struct EngineClientBuilder {
    base_url: Option<String>,
    basic_auth: Option<String>,
    timeout_secs: Option<u64>,
}

impl EngineClientBuilder {
    /// Set the engine base URL.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set a pre-encoded Basic auth credential (`base64(user:pass)`).
    ///
    /// Empty strings are ignored.
    #[must_use]
    pub fn basic_auth(mut self, credential: impl Into<String>) -> Self {
        let credential = credential.into();
        self.basic_auth = (!credential.is_empty()).then_some(credential);
        self
    }

    /// Set the request timeout in seconds. Defaults to ten minutes.
    #[must_use]
    pub const fn timeout_secs(mut self, timeout: u64) -> Self {
        self.timeout_secs = Some(timeout);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse, the credential is not
    /// a valid header value, or the HTTP client fails to build.
    pub fn build(self) -> Result<EngineClient> {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string());
        url::Url::parse(&base_url).map_err(|e| BackendError::InvalidUrl(format!("{base_url}: {e}")))?;

        if let Some(cred) = &self.basic_auth {
            HeaderValue::from_str(&format!("Basic {cred}"))
                .map_err(|_| BackendError::InvalidUrl("basic auth credential is not a valid header".into()))?;
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()?;

        Ok(EngineClient {
            http_client,
            base_url: base_url.trim_end_matches('/').into(),
            basic_auth: self.basic_auth.map(Into::into),
        })
    }
}
