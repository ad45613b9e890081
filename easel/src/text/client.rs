//! HTTP client for the text backends.

use super::types::{
    HordeAccepted, HordeRequest, HordeStatus, KoboldRequest, KoboldResponse, OpenAiRequest,
    OpenAiResponse, TOGETHER_MODEL, TextChoice, TogetherResponse,
};
use super::{TextBackend, TextMode};
use crate::error::{BackendError, Result, check_status};
use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay between Kobold Horde status checks.
pub const HORDE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Client for a single configured text backend.
///
/// # Example
///
/// ```rust,ignore
/// use easel::text::{TextBackend, TextClient, TextMode};
///
/// let chat = TextClient::builder()
///     .url("http://localhost:5000/api/v1/generate")
///     .mode(TextMode::Kobold)
///     .build()?;
/// let answer = chat.generate("Hello").await?;
/// ```
#[derive(Clone)]
pub struct TextClient {
    http_client: reqwest::Client,
    url: Arc<str>,
    mode: TextMode,
    auth: Option<Arc<str>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for TextClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextClient")
            .field("url", &self.url)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl TextClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> TextClientBuilder {
        TextClientBuilder::default()
    }

    /// Configured wire mode.
    #[must_use]
    pub const fn mode(&self) -> TextMode {
        self.mode
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let Some(auth) = &self.auth else {
            return builder;
        };
        match self.mode {
            TextMode::OpenAi => builder.header(AUTHORIZATION, format!("Bearer {auth}")),
            TextMode::KoboldHorde => builder.header("apikey", auth.as_ref()),
            _ => builder.header(AUTHORIZATION, format!("Basic {auth}")),
        }
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R>
    where
        B: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .authorize(self.http_client.post(url))
            .json(body)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn get_json<R: serde::de::DeserializeOwned>(&self, url: &str) -> Result<R> {
        let response = self.authorize(self.http_client.get(url)).send().await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn generate_kobold(&self, prompt: &str) -> Result<String> {
        let res: KoboldResponse = self.post_json(&self.url, &KoboldRequest::new(prompt)).await?;
        first_text(res.results)
    }

    async fn generate_openai(&self, prompt: &str) -> Result<String> {
        let res: OpenAiResponse = self.post_json(&self.url, &OpenAiRequest::new(prompt)).await?;
        first_text(res.choices)
    }

    async fn generate_together(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}?model={TOGETHER_MODEL}&prompt={}&top_p=1.0&top_k=40&temperature=1.0&max_tokens=256&repetition_penalty=1.0&stop=",
            self.url,
            escape(prompt)
        );
        let res: TogetherResponse = self.get_json(&url).await?;
        first_text(res.output.choices)
    }

    async fn generate_simple(&self, prompt: &str) -> Result<String> {
        let url = format!("{}{}", self.url, escape(prompt));
        let response = self.authorize(self.http_client.get(&url)).send().await?;
        Ok(check_status(response).await?.text().await?)
    }

    async fn generate_horde(&self, prompt: &str) -> Result<String> {
        let accepted: HordeAccepted = self
            .post_json(
                &format!("{}/v2/generate/async", self.url),
                &HordeRequest::new(prompt),
            )
            .await?;
        let id = accepted.id;
        debug!(%id, "Horde job queued");

        loop {
            let status: HordeStatus = self
                .get_json(&format!("{}/v2/generate/check/{id}", self.url))
                .await?;

            if !status.is_possible {
                warn!(%id, "Horde job cannot be served, cancelling");
                let response = self
                    .authorize(
                        self.http_client
                            .delete(format!("{}/v2/generate/status/{id}", self.url)),
                    )
                    .send()
                    .await?;
                check_status(response).await?;
                return Err(BackendError::EmptyResponse);
            }

            if status.done {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let done: HordeStatus = self
            .get_json(&format!("{}/v2/generate/status/{id}", self.url))
            .await?;
        first_text(done.generations)
    }
}

fn escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn first_text(choices: Vec<TextChoice>) -> Result<String> {
    choices
        .into_iter()
        .next()
        .map(|c| c.text)
        .ok_or(BackendError::EmptyResponse)
}

#[async_trait]
impl TextBackend for TextClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(mode = %self.mode, "Generating text");
        match self.mode {
            TextMode::Kobold => self.generate_kobold(prompt).await,
            TextMode::OpenAi => self.generate_openai(prompt).await,
            TextMode::Together => self.generate_together(prompt).await,
            TextMode::KoboldHorde => self.generate_horde(prompt).await,
            TextMode::Simple => self.generate_simple(prompt).await,
        }
    }
}

/// Builder for [`TextClient`].
#[derive(Debug, Default)]
pub struct TextClientBuilder {
    url: Option<String>,
    mode: TextMode,
    auth: Option<String>,
    timeout_secs: Option<u64>,
    poll_interval: Option<Duration>,
}

impl TextClientBuilder {
    /// Set the backend URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the wire mode.
    #[must_use]
    pub const fn mode(mut self, mode: TextMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the credential. How it is sent depends on the mode.
    #[must_use]
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        let auth = auth.into();
        self.auth = (!auth.is_empty()).then_some(auth);
        self
    }

    /// Set the request timeout in seconds. Defaults to ten minutes.
    #[must_use]
    pub const fn timeout_secs(mut self, timeout: u64) -> Self {
        self.timeout_secs = Some(timeout);
        self
    }

    /// Override the horde status polling interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL was set or the HTTP client fails to build.
    pub fn build(self) -> Result<TextClient> {
        let url = self
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BackendError::InvalidUrl("text backend URL is empty".into()))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                self.timeout_secs
                    .unwrap_or(crate::image::DEFAULT_TIMEOUT_SECS),
            ))
            .build()?;

        Ok(TextClient {
            http_client,
            url: url.into(),
            mode: self.mode,
            auth: self.auth.map(Into::into),
            poll_interval: self.poll_interval.unwrap_or(HORDE_POLL_INTERVAL),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(url: String, mode: TextMode, auth: &str) -> TextClient {
        TextClient::builder()
            .url(url)
            .mode(mode)
            .auth(auth)
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_escape_matches_query_encoding() {
        assert_eq!(escape("a cat & dog?"), "a+cat+%26+dog%3F");
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(TextClient::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_kobold_mode() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/generate")
                    .header("authorization", "Basic Zm9vOmJhcg==")
                    .json_body(json!({"prompt": "hi", "temperature": 0.7, "top_p": 1.0}));
                then.status(200).json_body(json!({"results": [{"text": " there"}]}));
            })
            .await;

        let out = client(server.url("/api/v1/generate"), TextMode::Kobold, "Zm9vOmJhcg==")
            .generate("hi")
            .await
            .unwrap();
        assert_eq!(out, " there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_mode_uses_bearer() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model":"text-davinci-003","max_tokens":256}"#);
                then.status(200).json_body(json!({"choices": [{"text": "ok"}]}));
            })
            .await;

        let out = client(server.url("/v1/completions"), TextMode::OpenAi, "sk-test")
            .generate("q")
            .await
            .unwrap();
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn test_empty_results_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/gen");
                then.status(200).json_body(json!({"results": []}));
            })
            .await;

        let err = client(server.url("/gen"), TextMode::Kobold, "")
            .generate("hi")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_together_mode_query() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/inference")
                    .query_param("model", TOGETHER_MODEL)
                    .query_param("prompt", "a cat")
                    .query_param("max_tokens", "256");
                then.status(200)
                    .json_body(json!({"output": {"choices": [{"text": "meow"}]}}));
            })
            .await;

        let out = client(server.url("/inference"), TextMode::Together, "")
            .generate("a cat")
            .await
            .unwrap();
        assert_eq!(out, "meow");
    }

    #[tokio::test]
    async fn test_simple_mode_returns_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ask/hello+world");
                then.status(200).body("plain answer");
            })
            .await;

        let out = client(server.url("/ask/"), TextMode::Simple, "")
            .generate("hello world")
            .await
            .unwrap();
        assert_eq!(out, "plain answer");
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/gen");
                then.status(503);
            })
            .await;

        let err = client(server.url("/gen"), TextMode::Kobold, "")
            .generate("hi")
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_horde_polls_until_done() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/generate/async")
                    .header("apikey", "horde-key");
                then.status(202).json_body(json!({"id": "abc"}));
            })
            .await;
        let check = server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/generate/check/abc");
                then.status(200).json_body(json!({"done": true, "is_possible": true}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/generate/status/abc");
                then.status(200)
                    .json_body(json!({"done": true, "generations": [{"text": "story"}]}));
            })
            .await;

        let out = client(server.base_url(), TextMode::KoboldHorde, "horde-key")
            .generate("once")
            .await
            .unwrap();
        assert_eq!(out, "story");
        submit.assert_async().await;
        check.assert_async().await;
    }

    #[tokio::test]
    async fn test_horde_impossible_job_is_cancelled() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/generate/async");
                then.status(202).json_body(json!({"id": "xyz"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/generate/check/xyz");
                then.status(200).json_body(json!({"done": false, "is_possible": false}));
            })
            .await;
        let cancel = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v2/generate/status/xyz");
                then.status(200).json_body(json!({}));
            })
            .await;

        let err = client(server.base_url(), TextMode::KoboldHorde, "")
            .generate("once")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        cancel.assert_async().await;
    }
}
