//! Easel - clients for generation backends.
//!
//! This crate wraps the HTTP surfaces the easel bot talks to:
//!
//! - **Image engine** ([`image`]) - a Stable Diffusion UI style server that
//!   accepts render jobs and streams progress events back.
//! - **Text backends** ([`text`]) - Kobold, `OpenAI` completions, Together,
//!   Kobold Horde and plain GET endpoints.
//!
//! Both are exposed as object-safe async traits so callers can swap in the
//! scripted implementation from [`mock`] under test.
//!
//! # Example
//!
//! ```rust,ignore
//! use easel::image::{EngineClient, ImageBackend, RenderRequest};
//!
//! let engine = EngineClient::builder()
//!     .base_url("http://localhost:9000")
//!     .build()?;
//!
//! let ticket = engine.submit_render(&RenderRequest::new("a cat")).await?;
//! let events = engine.poll_stream(&ticket.stream).await?;
//! ```

pub mod error;
pub mod image;
pub mod mock;
pub mod text;

pub use error::{BackendError, Result};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{BackendError, Result};
    pub use crate::image::{
        ActiveModelConfig, EngineClient, EngineClientBuilder, ImageBackend, ModelCatalog,
        OutputEntry, ProgressEvent, RenderRequest, RenderTicket,
    };
    pub use crate::mock::{ScriptedImageBackend, ScriptedTextBackend};
    pub use crate::text::{TextBackend, TextClient, TextClientBuilder, TextMode};
}
