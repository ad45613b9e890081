//! In-memory gateway that records every outbound call.
//!
//! Used by tests and for driving the bot programmatically. Inbound messages
//! are injected with [`MemoryGateway::inject`].

use crate::error::{ChannelError, ChannelResult};
use crate::messaging::{
    Attachment, IncomingMessage, MessageRef, MessagingGateway, StatusCard, UploadedFile,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// An outbound operation observed by [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// `send_message`.
    Sent {
        /// Created message.
        message: MessageRef,
        /// Text.
        text: String,
    },
    /// `send_reply`.
    Replied {
        /// Created message.
        message: MessageRef,
        /// Message replied to.
        to: MessageRef,
        /// Text.
        text: String,
    },
    /// `edit_message`.
    Edited {
        /// Edited message.
        message: MessageRef,
        /// New text.
        text: String,
    },
    /// `edit_status_card`.
    CardEdited {
        /// Edited message.
        message: MessageRef,
        /// New card.
        card: StatusCard,
    },
    /// `upload_file`.
    Uploaded {
        /// Message carrying the file.
        message: MessageRef,
        /// File name.
        filename: String,
        /// Payload size.
        size: usize,
    },
    /// `delete_message`.
    Deleted(MessageRef),
    /// `create_dm_channel` for a user.
    DmOpened(String),
    /// `trigger_typing` in a channel.
    Typing(String),
}

#[derive(Debug, Default)]
struct State {
    events: Vec<GatewayEvent>,
    inbound: Option<mpsc::Sender<IncomingMessage>>,
    attachments: HashMap<String, Bytes>,
    fail_replies: bool,
    fail_uploads: bool,
    deleted: HashSet<MessageRef>,
}

/// Gateway keeping everything in memory.
#[derive(Debug)]
pub struct MemoryGateway {
    state: Mutex<State>,
    next_id: AtomicU64,
    bot_user_id: String,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Create a gateway whose bot user id is `bot`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(1),
            bot_user_id: "bot".to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_ref(&self, channel_id: &str) -> MessageRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        MessageRef::new(channel_id, format!("m{id}"))
    }

    /// Serve `bytes` for attachments whose URL is `url`.
    #[must_use]
    pub fn with_attachment(self, url: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.lock().attachments.insert(url.into(), bytes.into());
        self
    }

    /// Make every `send_reply` fail.
    #[must_use]
    pub fn failing_replies(self) -> Self {
        self.lock().fail_replies = true;
        self
    }

    /// Make every `upload_file` fail.
    #[must_use]
    pub fn failing_uploads(self) -> Self {
        self.lock().fail_uploads = true;
        self
    }

    /// Feed a message to the running bot.
    ///
    /// # Errors
    ///
    /// Fails when the gateway was not started or the receiver is gone.
    pub async fn inject(&self, message: IncomingMessage) -> ChannelResult<()> {
        let tx = self.lock().inbound.clone().ok_or(ChannelError::NotConnected)?;
        tx.send(message)
            .await
            .map_err(|e| ChannelError::Internal(e.to_string()))
    }

    /// Every recorded event, in order.
    #[must_use]
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.lock().events.clone()
    }

    /// Every text posted or written by edits, in order.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::Sent { text, .. }
                | GatewayEvent::Replied { text, .. }
                | GatewayEvent::Edited { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every status card written, in order.
    #[must_use]
    pub fn cards(&self) -> Vec<StatusCard> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::CardEdited { card, .. } => Some(card.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of typing indicators sent.
    #[must_use]
    pub fn typing_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, GatewayEvent::Typing(_)))
            .count()
    }

    /// Whether `message` was deleted.
    #[must_use]
    pub fn was_deleted(&self, message: &MessageRef) -> bool {
        self.lock().deleted.contains(message)
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.lock().events.clear();
    }

    fn record(&self, event: GatewayEvent) {
        self.lock().events.push(event);
    }
}

#[async_trait]
impl MessagingGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    fn bot_user_id(&self) -> Option<String> {
        Some(self.bot_user_id.clone())
    }

    async fn start(&self, inbound: mpsc::Sender<IncomingMessage>) -> ChannelResult<()> {
        self.lock().inbound = Some(inbound);
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.lock().inbound = None;
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> ChannelResult<MessageRef> {
        let message = self.next_ref(channel_id);
        self.record(GatewayEvent::Sent {
            message: message.clone(),
            text: text.to_string(),
        });
        Ok(message)
    }

    async fn send_reply(&self, to: &MessageRef, text: &str) -> ChannelResult<MessageRef> {
        if self.lock().fail_replies {
            return Err(ChannelError::send("replies disabled"));
        }
        let message = self.next_ref(&to.channel_id);
        self.record(GatewayEvent::Replied {
            message: message.clone(),
            to: to.clone(),
            text: text.to_string(),
        });
        Ok(message)
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> ChannelResult<()> {
        self.record(GatewayEvent::Edited {
            message: message.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn edit_status_card(
        &self,
        message: &MessageRef,
        card: &StatusCard,
    ) -> ChannelResult<()> {
        self.record(GatewayEvent::CardEdited {
            message: message.clone(),
            card: card.clone(),
        });
        Ok(())
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: Bytes,
    ) -> ChannelResult<UploadedFile> {
        if self.lock().fail_uploads {
            return Err(ChannelError::upload("uploads disabled"));
        }
        let message = self.next_ref(channel_id);
        let url = format!("memory://{channel_id}/{}/{filename}", message.message_id);
        self.record(GatewayEvent::Uploaded {
            message: message.clone(),
            filename: filename.to_string(),
            size: data.len(),
        });
        Ok(UploadedFile { message, url })
    }

    async fn delete_message(&self, message: &MessageRef) -> ChannelResult<()> {
        let mut state = self.lock();
        state.deleted.insert(message.clone());
        state.events.push(GatewayEvent::Deleted(message.clone()));
        Ok(())
    }

    async fn create_dm_channel(&self, user_id: &str) -> ChannelResult<String> {
        self.record(GatewayEvent::DmOpened(user_id.to_string()));
        Ok(format!("dm-{user_id}"))
    }

    async fn trigger_typing(&self, channel_id: &str) -> ChannelResult<()> {
        self.record(GatewayEvent::Typing(channel_id.to_string()));
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> ChannelResult<Bytes> {
        self.lock()
            .attachments
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| ChannelError::download(format!("no attachment at {}", attachment.url)))
    }
}
