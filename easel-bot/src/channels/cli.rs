//! Terminal gateway.
//!
//! Lines read from stdin become messages in a single `cli` channel; outbound
//! messages are printed to stdout. Uploaded frames are written to a local
//! directory and referenced by `file://` URL.

use crate::error::{ChannelError, ChannelResult};
use crate::messaging::{
    Attachment, Author, IncomingMessage, MessageRef, MessagingGateway, StatusCard, UploadedFile,
};
use crate::util;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

/// CLI gateway configuration.
#[derive(Debug, Clone)]
pub struct CliGatewayConfig {
    /// Channel id given to every message.
    pub channel_id: String,
    /// User id given to every message.
    pub user_id: String,
    /// Directory receiving uploaded files.
    pub upload_dir: PathBuf,
}

impl Default for CliGatewayConfig {
    fn default() -> Self {
        Self {
            channel_id: "cli".to_string(),
            user_id: "user".to_string(),
            upload_dir: util::config_dir().join("frames"),
        }
    }
}

impl CliGatewayConfig {
    /// Create a new CLI gateway config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel id.
    #[must_use]
    pub fn channel_id(mut self, id: impl Into<String>) -> Self {
        self.channel_id = id.into();
        self
    }

    /// Set the user id.
    #[must_use]
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = id.into();
        self
    }

    /// Set the upload directory.
    #[must_use]
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = dir.into();
        self
    }
}

/// Gateway reading stdin and printing to stdout.
#[derive(Debug)]
pub struct CliGateway {
    config: CliGatewayConfig,
    next_id: AtomicU64,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
}

impl Default for CliGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl CliGateway {
    /// Create a CLI gateway with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CliGatewayConfig::default())
    }

    /// Create a CLI gateway with the given configuration.
    #[must_use]
    pub fn with_config(config: CliGatewayConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            shutdown_tx: RwLock::new(None),
        }
    }

    fn next_ref(&self, channel_id: &str) -> MessageRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        MessageRef::new(channel_id, id.to_string())
    }

    #[allow(clippy::print_stdout)]
    fn print(message: &MessageRef, text: &str) {
        println!("\n[{}] {text}\n", message.message_id);
    }
}

#[async_trait]
impl MessagingGateway for CliGateway {
    fn name(&self) -> &str {
        "cli"
    }

    fn bot_user_id(&self) -> Option<String> {
        Some("easel".to_string())
    }

    async fn start(&self, inbound: mpsc::Sender<IncomingMessage>) -> ChannelResult<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let channel_id = self.config.channel_id.clone();
        let user_id = self.config.user_id.clone();
        let mut counter = 0_u64;

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        counter += 1;
                        let message = IncomingMessage {
                            id: format!("in{counter}"),
                            channel_id: channel_id.clone(),
                            author: Author {
                                id: user_id.clone(),
                                name: user_id.clone(),
                                is_bot: false,
                            },
                            content: trimmed.to_string(),
                            mentions_bot: false,
                            attachments: Vec::new(),
                        };
                        if inbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("CLI input reader shutting down");
                        break;
                    }
                }
            }
        });

        info!("CLI gateway started");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        let guard = self.shutdown_tx.write().await;
        if let Some(tx) = &*guard {
            let _ = tx.send(()).await;
        }
        drop(guard);
        info!("CLI gateway stopped");
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> ChannelResult<MessageRef> {
        let message = self.next_ref(channel_id);
        Self::print(&message, text);
        Ok(message)
    }

    async fn send_reply(&self, to: &MessageRef, text: &str) -> ChannelResult<MessageRef> {
        self.send_message(&to.channel_id, text).await
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> ChannelResult<()> {
        Self::print(message, text);
        Ok(())
    }

    async fn edit_status_card(
        &self,
        message: &MessageRef,
        card: &StatusCard,
    ) -> ChannelResult<()> {
        Self::print(message, &card.to_markdown());
        Ok(())
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: Bytes,
    ) -> ChannelResult<UploadedFile> {
        let dir = &self.config.upload_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ChannelError::upload(e.to_string()))?;
        let path = dir.join(filename);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| ChannelError::upload(e.to_string()))?;

        Ok(UploadedFile {
            message: self.next_ref(channel_id),
            url: format!("file://{}", path.display()),
        })
    }

    async fn delete_message(&self, message: &MessageRef) -> ChannelResult<()> {
        debug!(message = %message.message_id, "delete ignored on CLI");
        Ok(())
    }

    async fn create_dm_channel(&self, _user_id: &str) -> ChannelResult<String> {
        Ok(self.config.channel_id.clone())
    }

    async fn trigger_typing(&self, _channel_id: &str) -> ChannelResult<()> {
        Ok(())
    }

    async fn fetch_attachment(&self, _attachment: &Attachment) -> ChannelResult<Bytes> {
        Err(ChannelError::Unsupported("attachments on the CLI"))
    }
}
