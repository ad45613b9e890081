//! Turning frames into status card updates.

use crate::config::BotConfig;
use crate::error::ChannelResult;
use crate::messaging::{MessageRef, MessagingGateway, StatusCard};
use crate::settings::{ChannelSettings, RenderParams};
use crate::util::{self, format_float};
use bytes::Bytes;
use std::fmt::Write as _;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Title of every status card.
pub const CARD_TITLE: &str = "Stable Diffusion";

/// Footer for `step` of `total`.
#[must_use]
pub fn footer(step: u32, total: u32) -> String {
    if step >= total {
        "Done!".to_string()
    } else {
        format!("Step {step} of {total}")
    }
}

/// Card body listing the active generation parameters.
#[must_use]
pub fn describe(params: &RenderParams, has_init_image: bool) -> String {
    let mut desc = format!("**Prompt:** {}", params.prompt);
    if !params.negative_prompt.is_empty() {
        let _ = write!(desc, "\n**Negative Prompt:** {}", params.negative_prompt);
    }
    let _ = write!(
        desc,
        "\n**Width:** {}\n**Height**: {}\n**Inference Steps:** {}\n**Guidance Scale:** {}\n**Sampler:** {}\n**Model:** {}",
        params.width,
        params.height,
        params.inference_steps,
        format_float(params.guidance_scale),
        params.sampler,
        params.model,
    );
    if !params.vae.is_empty() {
        let _ = write!(desc, "\n**VAE:** {}", params.vae);
    }
    if !params.hypernetwork.is_empty() {
        let _ = write!(desc, "\n**HyperNetwork:** {}", params.hypernetwork);
    }
    if !params.upscaler.is_empty() {
        let _ = write!(
            desc,
            "\n**Upscaler:** {}x {}",
            params.upscale_amount, params.upscaler
        );
    }
    if has_init_image {
        let _ = write!(
            desc,
            "\n**Img2Img Prompt Strength:** {}",
            format_float(params.prompt_strength)
        );
    }
    desc
}

/// Keeps one status message up to date for the duration of a render.
pub struct FramePublisher<'a> {
    gateway: &'a dyn MessagingGateway,
    config: &'a BotConfig,
    settings: &'a ChannelSettings,
    status: MessageRef,
    description: String,
    last_upload: Option<MessageRef>,
}

impl std::fmt::Debug for FramePublisher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePublisher")
            .field("status", &self.status)
            .field("last_upload", &self.last_upload)
            .finish_non_exhaustive()
    }
}

impl<'a> FramePublisher<'a> {
    /// Publisher editing `status`, describing `params`.
    #[must_use]
    pub fn new(
        gateway: &'a dyn MessagingGateway,
        config: &'a BotConfig,
        settings: &'a ChannelSettings,
        status: MessageRef,
        params: &RenderParams,
        has_init_image: bool,
    ) -> Self {
        Self {
            gateway,
            config,
            settings,
            status,
            description: describe(params, has_init_image),
            last_upload: None,
        }
    }

    /// The status message being edited.
    #[must_use]
    pub const fn status(&self) -> &MessageRef {
        &self.status
    }

    fn card(&self, footer: String, image_url: Option<String>) -> StatusCard {
        StatusCard {
            title: CARD_TITLE.to_string(),
            description: self.description.clone(),
            footer,
            image_url: image_url.filter(|u| !u.is_empty()),
            timestamp: SystemTime::now(),
        }
    }

    fn last_frame_url(&self) -> Option<String> {
        self.settings
            .with_render_info(|info| info.map(|i| i.last_frame_url.clone()))
    }

    fn set_last_frame_url(&self, url: &str) {
        self.settings.with_render_info(|info| {
            if let Some(info) = info {
                info.last_frame_url = url.to_string();
            }
        });
    }

    /// Make `bytes` addressable and show them as step `step` of `total`.
    ///
    /// With a frame server configured, in-progress bytes are buffered for it.
    /// The final frame and every frame without a server are uploaded to the
    /// dump channel (or the status message's channel), since the buffer is
    /// gone once the render ends. The previous upload is deleted only once
    /// the card points at the new one.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the upload or the edit fails.
    pub async fn publish_frame(&mut self, bytes: Bytes, step: u32, total: u32) -> ChannelResult<()> {
        let last = step >= total;
        let ext = if last { "png" } else { "jpg" };

        if self.config.frames.serves_frames() && !last {
            let content_type = util::sniff_image_type(&bytes);
            let url = format!(
                "{}/{}/{}.{ext}",
                self.config.frames.frame_url.trim_end_matches('/'),
                self.status.channel_id,
                util::timestamp_nanos()
            );
            self.settings.with_render_info(|info| {
                if let Some(info) = info {
                    info.frame_data = Some(bytes);
                    info.frame_content_type = Some(content_type);
                    info.last_frame_url.clone_from(&url);
                }
            });
            return self
                .gateway
                .edit_status_card(&self.status, &self.card(footer(step, total), Some(url)))
                .await;
        }

        let channel = if self.config.image_dump_channel_id.is_empty() {
            self.status.channel_id.as_str()
        } else {
            self.config.image_dump_channel_id.as_str()
        };
        let filename = format!("stable-diffusion_{}.{ext}", util::timestamp_nanos());
        let uploaded = self.gateway.upload_file(channel, &filename, bytes).await?;

        let card = self.card(footer(step, total), Some(uploaded.url.clone()));
        if let Err(e) = self.gateway.edit_status_card(&self.status, &card).await {
            if let Err(cleanup) = self.gateway.delete_message(&uploaded.message).await {
                debug!(error = %cleanup, "failed to delete unused frame");
            }
            return Err(e);
        }
        self.set_last_frame_url(&uploaded.url);

        if let Some(previous) = self.last_upload.replace(uploaded.message) {
            if let Err(e) = self.gateway.delete_message(&previous).await {
                debug!(error = %e, "failed to delete previous frame");
            }
        }
        Ok(())
    }

    /// Update the step counter, keeping the last image.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when the edit fails.
    pub async fn publish_tick(&self, step: u32, total: u32) -> ChannelResult<()> {
        let card = self.card(footer(step, total), self.last_frame_url());
        self.gateway.edit_status_card(&self.status, &card).await
    }

    /// Show the failure placeholder with `reason` in the footer.
    pub async fn publish_error(&self, reason: &str) {
        let card = self.card(
            format!("Error: {reason}"),
            Some(self.config.frames.error_frame_url.clone()),
        );
        if let Err(e) = self.gateway.edit_status_card(&self.status, &card).await {
            warn!(error = %e, "failed to publish error frame");
        }
    }

    /// Replace the card with an inline error line.
    pub async fn report(&self, text: &str) {
        if let Err(e) = self.gateway.edit_message(&self.status, text).await {
            warn!(error = %e, "failed to report render problem");
        }
    }
}
