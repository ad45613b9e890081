//! Running one render from submission to the final frame.

use super::img2img;
use super::publisher::FramePublisher;
use super::selection::select_events;
use crate::config::BotConfig;
use crate::error::CommandResult;
use crate::heartbeat::TypingStop;
use crate::messaging::{IncomingMessage, MessagingGateway, reply_or_send};
use crate::settings::RenderGuard;
use crate::util;
use easel::BackendError;
use easel::image::{ImageBackend, decode_data_url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Pause between polls that produced nothing to publish.
pub const POLL_BACKOFF: Duration = Duration::from_millis(500);

/// Longest prompt a render command may set, in bytes.
pub const MAX_PROMPT_LEN: usize = 512;

/// Exclusive seed bound; seeds are 31-bit.
const SEED_BOUND: u32 = 1 << 31;

/// Everything a render needs. The guard already carries the requester's
/// render info and is released when the render ends.
pub struct RenderJob<'a> {
    /// Render lock of the target channel.
    pub guard: RenderGuard,
    /// Image engine.
    pub backend: &'a dyn ImageBackend,
    /// Gateway the command came from.
    pub gateway: &'a dyn MessagingGateway,
    /// Configuration snapshot.
    pub config: &'a BotConfig,
    /// Message that triggered the render.
    pub message: &'a IncomingMessage,
    /// Command arguments; a non-empty value replaces the prompt.
    pub args: &'a str,
    /// Stopped when the first frame arrives.
    pub typing: &'a TypingStop,
}

impl std::fmt::Debug for RenderJob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderJob")
            .field("channel", &self.message.channel_id)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// What a finished render did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    /// Engine task id.
    pub task: i64,
    /// Frames published.
    pub frames: u32,
    /// Last step reached.
    pub current_step: u32,
    /// Final total step count.
    pub total_steps: u32,
}

/// Run a render to completion.
///
/// # Errors
///
/// Returns the backend error when submission, polling or the render itself
/// fails, and the gateway error when the status message cannot be posted.
/// The render lock is released on every path.
#[instrument(skip_all, fields(channel = %job.message.channel_id, requester = %job.message.author.id))]
pub async fn run_render(job: RenderJob<'_>) -> CommandResult<RenderSummary> {
    let RenderJob {
        guard,
        backend,
        gateway,
        config,
        message,
        args,
        typing,
    } = job;
    let settings = Arc::clone(guard.settings());

    if !args.is_empty() && config.is_changeable("prompt") {
        let prompt = util::truncate_text(args, MAX_PROMPT_LEN);
        settings.update_params(|p| p.prompt = prompt);
    }

    let seed = fastrand::u32(0..SEED_BOUND);
    let init_image = img2img::load_init_image(gateway, config, &settings, message).await;
    let params = settings.params();
    let mut request = params.to_request(seed, config.engine.stream_image_progress);
    if let Some((data_url, strength)) = init_image {
        request = request.with_init_image(data_url, strength);
    }
    let has_init_image = request.has_init_image();

    let ticket = backend.submit_render(&request).await?;
    guard.assign_task(ticket.task);
    info!(task = ticket.task, seed, img2img = has_init_image, "render submitted");

    let status = match reply_or_send(gateway, &message.reference(), "**Loading...**").await {
        Ok(status) => status,
        Err(e) => {
            if let Err(cancel) = backend.cancel_render(ticket.task).await {
                warn!(task = ticket.task, error = %cancel, "failed to cancel orphaned render");
            }
            return Err(e.into());
        }
    };

    let mut publisher =
        FramePublisher::new(gateway, config, &settings, status, &params, has_init_image);
    let mut current = 0;
    let mut total = params.inference_steps;
    let mut frames = 0;
    let mut done_shown = false;

    while current < total {
        let batch = match backend.poll_stream(&ticket.stream).await {
            Ok(batch) => batch,
            Err(e) => {
                publisher.publish_error(&e.to_string()).await;
                return Err(e.into());
            }
        };

        let selection = select_events(&batch, current, total, config.frames.count_frameless);
        current = selection.current_step;
        total = selection.total_steps;

        if let Some(reason) = selection.failure {
            warn!(task = ticket.task, %reason, "engine reported failure");
            publisher.publish_error(&reason).await;
            return Err(BackendError::engine(reason).into());
        }

        for &(step, of) in &selection.frameless_ticks {
            if let Err(e) = publisher.publish_tick(step, of).await {
                debug!(step, error = %e, "failed to publish progress tick");
            }
        }

        let Some(event) = selection.frame else {
            if !selection.advanced() {
                debug!(step = current, "nothing new in poll batch");
            }
            tokio::time::sleep(POLL_BACKOFF).await;
            continue;
        };

        let Some(output) = event.first_output() else {
            match publisher.publish_tick(current, total).await {
                Ok(()) => done_shown = current >= total,
                Err(e) => debug!(step = current, error = %e, "failed to publish progress tick"),
            }
            continue;
        };

        if typing.stop() {
            debug!(step = current, "first frame, typing indicator stopped");
        }

        let fetched = match (output.inline_data(), output.server_path()) {
            (Some(data), _) => decode_data_url(data),
            (None, Some(path)) => backend.fetch_image_bytes(path).await,
            (None, None) => continue,
        };
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(step = current, error = %e, "failed to get frame");
                publisher.report(&format!("Failed to get image: {e}")).await;
                continue;
            }
        };

        if let Err(e) = publisher.publish_frame(bytes, current, total).await {
            warn!(step = current, error = %e, "failed to publish frame");
            publisher.report(&format!("Failed to upload image: {e}")).await;
            continue;
        }
        frames += 1;
        done_shown = current >= total;
    }

    if !done_shown {
        if let Err(e) = publisher.publish_tick(current, total).await {
            warn!(task = ticket.task, error = %e, "failed to publish final card");
        }
    }

    info!(task = ticket.task, frames, total, "render finished");
    Ok(RenderSummary {
        task: ticket.task,
        frames,
        current_step: current,
        total_steps: total,
    })
}
