//! Messaging gateway abstraction.
//!
//! A gateway connects the bot to one chat platform. It turns platform events
//! into [`IncomingMessage`]s and exposes the handful of outbound operations
//! the commands need: plain and reply messages, edits, status cards, file
//! uploads, deletion, direct-message channels and typing indicators.

use crate::error::ChannelResult;
use crate::util;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write as _;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::debug;

/// Author of an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    /// Platform user id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the author is a bot account.
    pub is_bot: bool,
}

/// File attached to an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    /// Platform file id.
    pub id: String,
    /// Original file name.
    pub filename: String,
    /// MIME type reported by the platform.
    pub content_type: String,
    /// Download URL, if the platform provides one.
    pub url: String,
    /// Caption or description attached to the file.
    pub caption: String,
}

impl Attachment {
    /// Whether the attachment is an image.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

/// A message received from a gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message id.
    pub id: String,
    /// Channel (or chat) id.
    pub channel_id: String,
    /// Sender.
    pub author: Author,
    /// Text content.
    pub content: String,
    /// Whether the message mentions the bot.
    pub mentions_bot: bool,
    /// Attached files.
    pub attachments: Vec<Attachment>,
}

impl IncomingMessage {
    /// Reference to this message.
    #[must_use]
    pub fn reference(&self) -> MessageRef {
        MessageRef::new(&self.channel_id, &self.id)
    }

    /// First attachment, if it is an image.
    #[must_use]
    pub fn image_attachment(&self) -> Option<&Attachment> {
        self.attachments.first().filter(|a| a.is_image())
    }
}

/// Address of a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MessageRef {
    /// Channel id.
    pub channel_id: String,
    /// Message id.
    pub message_id: String,
}

impl MessageRef {
    /// Create a reference.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }
}

/// Rich progress message shown while a render runs.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusCard {
    /// Card title.
    pub title: String,
    /// Multi-line body.
    pub description: String,
    /// Footer line.
    pub footer: String,
    /// Image to display, if any.
    pub image_url: Option<String>,
    /// When the card was built.
    pub timestamp: SystemTime,
}

impl StatusCard {
    /// Plain markdown rendering for platforms without embeds.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = format!("**{}**\n{}\n", self.title, self.description);
        if let Some(url) = &self.image_url {
            let _ = writeln!(out, "{url}");
        }
        let _ = write!(out, "_{}_", self.footer);
        out
    }
}

/// Result of [`MessagingGateway::upload_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Message carrying the file.
    pub message: MessageRef,
    /// Public URL of the file.
    pub url: String,
}

/// A connection to one chat platform.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Short platform name.
    fn name(&self) -> &str;

    /// The bot's own user id, once connected.
    fn bot_user_id(&self) -> Option<String>;

    /// Connect and forward inbound messages to `inbound`.
    async fn start(&self, inbound: mpsc::Sender<IncomingMessage>) -> ChannelResult<()>;

    /// Disconnect.
    async fn stop(&self) -> ChannelResult<()>;

    /// Post `text` in `channel_id`.
    async fn send_message(&self, channel_id: &str, text: &str) -> ChannelResult<MessageRef>;

    /// Post `text` as a reply to `to`.
    async fn send_reply(&self, to: &MessageRef, text: &str) -> ChannelResult<MessageRef>;

    /// Replace the text of a message the bot sent.
    async fn edit_message(&self, message: &MessageRef, text: &str) -> ChannelResult<()>;

    /// Replace a message the bot sent with a status card.
    async fn edit_status_card(&self, message: &MessageRef, card: &StatusCard)
    -> ChannelResult<()>;

    /// Upload `data` as `filename` to `channel_id`.
    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: Bytes,
    ) -> ChannelResult<UploadedFile>;

    /// Delete a message.
    async fn delete_message(&self, message: &MessageRef) -> ChannelResult<()>;

    /// Open a direct-message channel with `user_id` and return its id.
    async fn create_dm_channel(&self, user_id: &str) -> ChannelResult<String>;

    /// Show the typing indicator in `channel_id`.
    async fn trigger_typing(&self, channel_id: &str) -> ChannelResult<()>;

    /// Download an attachment's bytes.
    async fn fetch_attachment(&self, attachment: &Attachment) -> ChannelResult<Bytes>;
}

/// Reply to `to`, posting a plain message in the same channel if the reply fails.
///
/// Mentions are made inert and the text is capped to one chat message.
///
/// # Errors
///
/// Returns the error of the plain send when both attempts fail.
pub async fn reply_or_send(
    gateway: &dyn MessagingGateway,
    to: &MessageRef,
    text: &str,
) -> ChannelResult<MessageRef> {
    let text = util::sanitize_reply(text);
    match gateway.send_reply(to, &text).await {
        Ok(sent) => Ok(sent),
        Err(e) => {
            debug!(channel = %to.channel_id, error = %e, "reply failed, sending plain message");
            gateway.send_message(&to.channel_id, &text).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_attachment_checks_first_only() {
        let mut msg = IncomingMessage {
            attachments: vec![
                Attachment {
                    content_type: "text/plain".into(),
                    ..Attachment::default()
                },
                Attachment {
                    content_type: "image/png".into(),
                    ..Attachment::default()
                },
            ],
            ..IncomingMessage::default()
        };
        assert!(msg.image_attachment().is_none());
        msg.attachments.remove(0);
        assert!(msg.image_attachment().is_some());
    }

    #[test]
    fn test_status_card_markdown() {
        let card = StatusCard {
            title: "Stable Diffusion".into(),
            description: "**Prompt:** cat".into(),
            footer: "Step 1 of 2".into(),
            image_url: Some("https://x/1.jpg".into()),
            timestamp: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(
            card.to_markdown(),
            "**Stable Diffusion**\n**Prompt:** cat\nhttps://x/1.jpg\n_Step 1 of 2_"
        );
    }

    #[tokio::test]
    async fn test_reply_falls_back_to_plain_send() {
        use crate::channels::{GatewayEvent, MemoryGateway};

        let to = MessageRef::new("c1", "in1");
        let gw = MemoryGateway::new();
        reply_or_send(&gw, &to, "hi @here").await.unwrap();
        assert!(matches!(&gw.events()[0], GatewayEvent::Replied { text, .. } if text == "hi @\u{200b}here"));

        let gw = MemoryGateway::new().failing_replies();
        let sent = reply_or_send(&gw, &to, "hi").await.unwrap();
        assert_eq!(sent.channel_id, "c1");
        assert!(matches!(&gw.events()[0], GatewayEvent::Sent { text, .. } if text == "hi"));
    }
}
