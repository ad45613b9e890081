//! Render orchestration.
//!
//! A render submits one job to the image engine, then polls its progress
//! stream and keeps a status card in the chat up to date until the engine
//! reports success or failure. [`selection`] decides which event of a poll
//! batch is acted on, [`publisher`] turns frames into card edits, and
//! [`orchestrator`] drives the loop.

pub mod img2img;
pub mod orchestrator;
pub mod publisher;
pub mod selection;

pub use orchestrator::{RenderJob, RenderSummary, run_render};
pub use publisher::FramePublisher;
pub use selection::{Selection, select_events};

use crate::error::{CommandError, CommandResult};
use crate::settings::ChannelSettings;
use easel::image::ImageBackend;
use tracing::info;

/// Cancel the render running in `settings` on behalf of `requester`.
///
/// Only the user who started a render may stop it. Returns the cancelled
/// task id.
///
/// # Errors
///
/// [`CommandError::RenderNotInProgress`] when nothing runs or the engine has
/// not assigned a task yet, [`CommandError::RenderNotRequestedByYou`] for
/// other users, and the backend error if the cancel request fails.
pub async fn stop_render(
    settings: &ChannelSettings,
    backend: &dyn ImageBackend,
    requester: &str,
) -> CommandResult<i64> {
    if !settings.is_rendering() {
        return Err(CommandError::RenderNotInProgress);
    }
    let task = settings.with_render_info(|info| match info {
        Some(info) if info.task != 0 => {
            if info.requested_by == requester {
                Ok(info.task)
            } else {
                Err(CommandError::RenderNotRequestedByYou)
            }
        }
        _ => Err(CommandError::RenderNotInProgress),
    })?;

    backend.cancel_render(task).await?;
    info!(channel = settings.channel_id(), task, "render stopped");
    Ok(task)
}
