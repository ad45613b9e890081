//! Loading an attached image as the init image of a render.

use crate::config::BotConfig;
use crate::messaging::{IncomingMessage, MessagingGateway, reply_or_send};
use crate::settings::ChannelSettings;
use easel::image::encode_data_url;
use tracing::{debug, warn};

/// Highest prompt strength the engine accepts.
pub const MAX_PROMPT_STRENGTH: f64 = 0.999_999;

/// Clamp a prompt strength into `[0, MAX_PROMPT_STRENGTH]`.
#[must_use]
pub fn clamp_strength(value: f64) -> f64 {
    value.clamp(0.0, MAX_PROMPT_STRENGTH)
}

async fn notify(gateway: &dyn MessagingGateway, message: &IncomingMessage, text: &str) {
    if let Err(e) = reply_or_send(gateway, &message.reference(), text).await {
        warn!(error = %e, "failed to send img2img notice");
    }
}

/// Turn the message's image attachment into an init image.
///
/// Returns the `data:` URL and the prompt strength to use, or `None` when the
/// render should run without an init image. Every failure is reported to the
/// user once; none of them abort the render.
pub async fn load_init_image(
    gateway: &dyn MessagingGateway,
    config: &BotConfig,
    settings: &ChannelSettings,
    message: &IncomingMessage,
) -> Option<(String, f64)> {
    let attachment = message.image_attachment()?;

    if !config.is_changeable("img2img") {
        notify(
            gateway,
            message,
            "**Error:** changing the Img2Img image is disabled",
        )
        .await;
        return None;
    }

    let bytes = match gateway.fetch_attachment(attachment).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(attachment = %attachment.id, error = %e, "img2img download failed");
            notify(
                gateway,
                message,
                "**Error:** Failed to download image for Img2Img!",
            )
            .await;
            return None;
        }
    };

    let caption = attachment.caption.trim();
    if !caption.is_empty() && config.is_changeable("promptstrength") {
        match caption.parse::<f64>() {
            Ok(value) => {
                let strength = clamp_strength(value);
                settings.update_params(|p| p.prompt_strength = strength);
            }
            Err(_) => {
                notify(gateway, message, "**Error:** Invalid Img2Img prompt strength!").await;
                return None;
            }
        }
    }

    let data_url = encode_data_url(&attachment.content_type, &bytes);
    debug!(size = bytes.len(), content_type = %attachment.content_type, "loaded init image");
    notify(gateway, message, "**Loaded Img2Img image from attachment!**").await;

    Some((data_url, settings.params().prompt_strength))
}
