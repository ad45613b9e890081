//! Scripted in-memory backends.
//!
//! Each `poll_stream` call pops the next scripted batch, so a test can lay
//! out an entire render ahead of time and then inspect which calls were made.

use crate::error::{BackendError, Result};
use crate::image::{
    ActiveModelConfig, ImageBackend, ModelCatalog, ProgressEvent, RenderRequest, RenderTicket,
};
use crate::text::TextBackend;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// A call observed by [`ScriptedImageBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// `submit_render` with the submitted prompt.
    Submit(String),
    /// `poll_stream` on a stream path.
    Poll(String),
    /// `fetch_image_bytes` for a path.
    FetchImage(String),
    /// `cancel_render` for a task id.
    Cancel(i64),
    /// `fetch_model_catalog`.
    Catalog,
    /// `fetch_active_model_config`.
    ActiveConfig,
}

#[derive(Debug, Default)]
struct Script {
    ticket: Option<RenderTicket>,
    submit_error: Option<String>,
    polls: VecDeque<Result<Vec<ProgressEvent>>>,
    images: HashMap<String, Bytes>,
    catalog: ModelCatalog,
    active: ActiveModelConfig,
    calls: Vec<BackendCall>,
    submitted: Vec<RenderRequest>,
}

/// [`ImageBackend`] driven by a prepared script.
#[derive(Debug, Default)]
pub struct ScriptedImageBackend {
    script: Mutex<Script>,
    submit_gate: Option<Arc<Notify>>,
}

impl ScriptedImageBackend {
    /// Create an empty script. Submissions return task 1 on `/image/stream/1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the ticket returned by `submit_render`.
    #[must_use]
    pub fn with_ticket(self, stream: impl Into<String>, task: i64) -> Self {
        self.lock().ticket = Some(RenderTicket {
            stream: stream.into(),
            task,
        });
        self
    }

    /// Make `submit_render` fail with an engine error.
    #[must_use]
    pub fn fail_submit(self, reason: impl Into<String>) -> Self {
        self.lock().submit_error = Some(reason.into());
        self
    }

    /// Queue a batch of events for the next poll.
    #[must_use]
    pub fn push_poll(self, events: Vec<ProgressEvent>) -> Self {
        self.lock().polls.push_back(Ok(events));
        self
    }

    /// Queue a poll that fails with an engine error.
    #[must_use]
    pub fn push_poll_error(self, reason: impl Into<String>) -> Self {
        self.lock().polls.push_back(Err(BackendError::engine(reason)));
        self
    }

    /// Queue a poll answered with an HTTP error `status`.
    #[must_use]
    pub fn push_poll_status(self, status: u16) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        self.lock().polls.push_back(Err(BackendError::Status {
            status,
            body: String::new(),
        }));
        self
    }

    /// Hold every `submit_render` after it is recorded until `gate` is
    /// notified.
    #[must_use]
    pub fn with_submit_gate(mut self, gate: Arc<Notify>) -> Self {
        self.submit_gate = Some(gate);
        self
    }

    /// Serve `bytes` for `path`.
    #[must_use]
    pub fn with_image(self, path: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.lock().images.insert(path.into(), bytes.into());
        self
    }

    /// Set the model catalog.
    #[must_use]
    pub fn with_catalog(self, catalog: ModelCatalog) -> Self {
        self.lock().catalog = catalog;
        self
    }

    /// Set the active model config.
    #[must_use]
    pub fn with_active_config(self, active: ActiveModelConfig) -> Self {
        self.lock().active = active;
        self
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Every submitted request, in order.
    #[must_use]
    pub fn submitted(&self) -> Vec<RenderRequest> {
        self.lock().submitted.clone()
    }

    /// Number of polls still queued.
    #[must_use]
    pub fn remaining_polls(&self) -> usize {
        self.lock().polls.len()
    }
}

#[async_trait]
impl ImageBackend for ScriptedImageBackend {
    async fn submit_render(&self, request: &RenderRequest) -> Result<RenderTicket> {
        let outcome = {
            let mut script = self.lock();
            script.calls.push(BackendCall::Submit(request.prompt.clone()));
            script.submitted.push(request.clone());
            match &script.submit_error {
                Some(reason) => Err(BackendError::engine(reason.clone())),
                None => Ok(script.ticket.clone().unwrap_or_else(|| RenderTicket {
                    stream: "/image/stream/1".to_string(),
                    task: 1,
                })),
            }
        };
        if let Some(gate) = &self.submit_gate {
            gate.notified().await;
        }
        outcome
    }

    async fn poll_stream(&self, stream: &str) -> Result<Vec<ProgressEvent>> {
        let mut script = self.lock();
        script.calls.push(BackendCall::Poll(stream.to_string()));
        script
            .polls
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::engine("poll script exhausted")))
    }

    async fn fetch_image_bytes(&self, path: &str) -> Result<Bytes> {
        let mut script = self.lock();
        script.calls.push(BackendCall::FetchImage(path.to_string()));
        script
            .images
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::engine(format!("no image at {path}")))
    }

    async fn cancel_render(&self, task: i64) -> Result<()> {
        self.lock().calls.push(BackendCall::Cancel(task));
        Ok(())
    }

    async fn fetch_model_catalog(&self) -> Result<ModelCatalog> {
        let mut script = self.lock();
        script.calls.push(BackendCall::Catalog);
        Ok(script.catalog.clone())
    }

    async fn fetch_active_model_config(&self) -> Result<ActiveModelConfig> {
        let mut script = self.lock();
        script.calls.push(BackendCall::ActiveConfig);
        Ok(script.active.clone())
    }
}

/// [`TextBackend`] answering every prompt with a fixed reply.
#[derive(Debug, Default)]
pub struct ScriptedTextBackend {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedTextBackend {
    /// Answer every prompt with `reply`.
    #[must_use]
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Mutex::default(),
        }
    }

    /// Fail every prompt with [`BackendError::EmptyResponse`].
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TextBackend for ScriptedTextBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());
        self.reply.clone().ok_or(BackendError::EmptyResponse)
    }
}
