//! Image engine client.
//!
//! The engine accepts a render job, hands back a stream path and a task id,
//! and then answers each poll of that path with zero or more progress events.

mod client;
mod types;

pub use client::{DEFAULT_ENGINE_URL, DEFAULT_TIMEOUT_SECS, EngineClient, EngineClientBuilder};
pub use types::{
    ActiveModelConfig, ActiveModels, ModelCatalog, ModelOptions, OutputEntry, ProgressEvent,
    RenderRequest, RenderTicket, STATUS_SUCCEEDED, decode_data_url, encode_data_url,
};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Operations the bot needs from an image engine.
///
/// Implementations perform no retries; every call maps to exactly one request.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Submit a render job.
    async fn submit_render(&self, request: &RenderRequest) -> Result<RenderTicket>;

    /// Read the progress events currently available on `stream`.
    ///
    /// An empty vector means the engine had nothing new yet.
    async fn poll_stream(&self, stream: &str) -> Result<Vec<ProgressEvent>>;

    /// Download an image the engine serves at `path`.
    async fn fetch_image_bytes(&self, path: &str) -> Result<Bytes>;

    /// Ask the engine to stop task `task`.
    async fn cancel_render(&self, task: i64) -> Result<()>;

    /// List the models the engine can load.
    async fn fetch_model_catalog(&self) -> Result<ModelCatalog>;

    /// Read the models the engine has currently selected.
    async fn fetch_active_model_config(&self) -> Result<ActiveModelConfig>;
}
