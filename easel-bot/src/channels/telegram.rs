//! Telegram gateway using teloxide.
//!
//! Chat ids and message ids are carried as decimal strings. A private chat's
//! id equals the user's id, so opening a DM needs no API call. Status cards
//! are rendered as HTML text; uploaded frames are sent as photos and referenced
//! by their file id.
//!
//! # Setup
//!
//! 1. Create a bot via [@BotFather](https://t.me/botfather)
//! 2. Put the token in `telegram.token` or `TELEGRAM_BOT_TOKEN`
//! 3. Set `telegram.enabled` to `true`

use crate::error::{ChannelError, ChannelResult};
use crate::messaging::{
    Attachment, Author, IncomingMessage, MessageRef, MessagingGateway, StatusCard, UploadedFile,
};
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::sync::{OnceLock, PoisonError, RwLock as StdRwLock};
use teloxide::dispatching::ShutdownToken;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ParseMode, ReplyParameters};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info};

/// Telegram's message length limit.
const MAX_MESSAGE_LENGTH: usize = 4096;

/// Scheme of the URLs returned for uploaded photos.
pub const FILE_URL_SCHEME: &str = "telegram-file:";

/// Telegram gateway configuration.
#[derive(Debug, Clone)]
pub struct TelegramGatewayConfig {
    /// Bot token from @BotFather.
    pub token: String,
    /// Whether to convert markdown to Telegram HTML.
    pub parse_markdown: bool,
}

impl TelegramGatewayConfig {
    /// Create a config with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            parse_markdown: true,
        }
    }

    /// Set whether to parse messages as markdown.
    #[must_use]
    pub const fn parse_markdown(mut self, enabled: bool) -> Self {
        self.parse_markdown = enabled;
        self
    }
}

/// Gateway for the Telegram Bot API.
pub struct TelegramGateway {
    config: TelegramGatewayConfig,
    bot: RwLock<Option<Bot>>,
    user_id: StdRwLock<Option<String>>,
    shutdown: RwLock<Option<ShutdownToken>>,
}

impl std::fmt::Debug for TelegramGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramGateway")
            .field("parse_markdown", &self.config.parse_markdown)
            .finish_non_exhaustive()
    }
}

impl TelegramGateway {
    /// Create a gateway with the given configuration.
    #[must_use]
    pub fn new(config: TelegramGatewayConfig) -> Self {
        Self {
            config,
            bot: RwLock::new(None),
            user_id: StdRwLock::new(None),
            shutdown: RwLock::new(None),
        }
    }

    async fn bot(&self) -> ChannelResult<Bot> {
        self.bot.read().await.clone().ok_or(ChannelError::NotConnected)
    }

    fn format(&self, text: &str) -> String {
        if self.config.parse_markdown {
            markdown_to_telegram_html(text)
        } else {
            text.to_string()
        }
    }

    const fn parse_mode(&self) -> Option<ParseMode> {
        if self.config.parse_markdown {
            Some(ParseMode::Html)
        } else {
            None
        }
    }
}

fn chat_id(raw: &str) -> ChannelResult<ChatId> {
    raw.parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChannelError::send(format!("invalid chat ID: {raw}")))
}

fn message_id(raw: &str) -> ChannelResult<MessageId> {
    raw.parse::<i32>()
        .map(MessageId)
        .map_err(|_| ChannelError::send(format!("invalid message ID: {raw}")))
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef::new(msg.chat.id.0.to_string(), msg.id.0.to_string())
}

/// Convert a Telegram message into an [`IncomingMessage`].
fn to_incoming(msg: &Message, username: &str) -> Option<IncomingMessage> {
    let content = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let caption = msg.caption().unwrap_or_default().to_string();

    let mut attachments = Vec::new();
    if let Some(largest) = msg.photo().and_then(<[_]>::last) {
        attachments.push(Attachment {
            id: largest.file.id.to_string(),
            filename: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            url: String::new(),
            caption: caption.clone(),
        });
    } else if let Some(doc) = msg.document() {
        attachments.push(Attachment {
            id: doc.file.id.to_string(),
            filename: doc.file_name.clone().unwrap_or_default(),
            content_type: doc
                .mime_type
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            url: String::new(),
            caption,
        });
    }

    if content.is_empty() && attachments.is_empty() {
        return None;
    }

    let author = msg.from.as_ref().map_or_else(Author::default, |u| Author {
        id: u.id.0.to_string(),
        name: u.full_name(),
        is_bot: u.is_bot,
    });
    let mentions_bot = !username.is_empty() && content.contains(&format!("@{username}"));

    Some(IncomingMessage {
        id: msg.id.0.to_string(),
        channel_id: msg.chat.id.0.to_string(),
        author,
        content: content.to_string(),
        mentions_bot,
        attachments,
    })
}

/// Convert Markdown to Telegram-safe HTML.
fn markdown_to_telegram_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let patterns = MarkdownPatterns::get();

    let mut result = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    result = patterns
        .code_inline
        .replace_all(&result, "<code>$1</code>")
        .into_owned();
    result = patterns
        .bold_asterisk
        .replace_all(&result, "<b>$1</b>")
        .into_owned();
    result = patterns
        .bold_underscore
        .replace_all(&result, "<u>$1</u>")
        .into_owned();
    result = patterns
        .italic_asterisk
        .replace_all(&result, "$1<i>$2</i>$3")
        .into_owned();
    result = patterns
        .italic_underscore
        .replace_all(&result, "$1<i>$2</i>$3")
        .into_owned();

    result
}

/// Split a long message into chunks of at most `max_len` bytes.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if current.len() + line.len() + 1 > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if line.len() > max_len {
                let mut rest = line;
                while !rest.is_empty() {
                    let head = crate::util::truncate_str(rest, max_len);
                    chunks.push(head.to_string());
                    rest = &rest[head.len()..];
                }
                continue;
            }
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Cached regex patterns for markdown to HTML conversion.
struct MarkdownPatterns {
    bold_asterisk: Regex,
    bold_underscore: Regex,
    italic_asterisk: Regex,
    italic_underscore: Regex,
    code_inline: Regex,
}

impl MarkdownPatterns {
    fn new() -> Self {
        Self {
            bold_asterisk: Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"),
            bold_underscore: Regex::new(r"__(.+?)__").expect("valid regex"),
            italic_asterisk: Regex::new(r"(^|[^*])\*([^*\n]+)\*([^*]|$)").expect("valid regex"),
            italic_underscore: Regex::new(r"(^|[^_\w])_([^_\n]+)_([^_\w]|$)")
                .expect("valid regex"),
            code_inline: Regex::new(r"`([^`]+)`").expect("valid regex"),
        }
    }

    fn get() -> &'static Self {
        static PATTERNS: OnceLock<MarkdownPatterns> = OnceLock::new();
        PATTERNS.get_or_init(Self::new)
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    fn name(&self) -> &str {
        "telegram"
    }

    fn bot_user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn start(&self, inbound: mpsc::Sender<IncomingMessage>) -> ChannelResult<()> {
        let bot = Bot::new(&self.config.token);
        let me = bot
            .get_me()
            .await
            .map_err(|e| ChannelError::start(e.to_string()))?;
        let username = me.user.username.clone().unwrap_or_default();
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) =
            Some(me.user.id.0.to_string());
        *self.bot.write().await = Some(bot.clone());

        let handler = Update::filter_message().endpoint(move |msg: Message| {
            let inbound = inbound.clone();
            let username = username.clone();
            async move {
                if let Some(message) = to_incoming(&msg, &username) {
                    if inbound.send(message).await.is_err() {
                        error!("inbound receiver dropped");
                    }
                }
                Ok::<(), teloxide::RequestError>(())
            }
        });

        let mut dispatcher = Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build();
        *self.shutdown.write().await = Some(dispatcher.shutdown_token());

        tokio::spawn(async move {
            dispatcher.dispatch().await;
            debug!("Telegram dispatcher exited");
        });

        info!(bot = %me.user.id.0, "Telegram gateway started");
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        if let Some(token) = self.shutdown.write().await.take() {
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!(error = %e, "dispatcher was not running"),
            }
        }
        *self.bot.write().await = None;
        info!("Telegram gateway stopped");
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> ChannelResult<MessageRef> {
        let bot = self.bot().await?;
        let chat = chat_id(channel_id)?;
        let mut first = None;

        for chunk in split_message(&self.format(text), MAX_MESSAGE_LENGTH) {
            let mut req = bot.send_message(chat, chunk);
            req.parse_mode = self.parse_mode();
            let sent = req.await.map_err(|e| ChannelError::send(e.to_string()))?;
            first.get_or_insert_with(|| message_ref(&sent));
        }

        first.ok_or_else(|| ChannelError::send("empty message"))
    }

    async fn send_reply(&self, to: &MessageRef, text: &str) -> ChannelResult<MessageRef> {
        let bot = self.bot().await?;
        let mut req = bot.send_message(chat_id(&to.channel_id)?, self.format(text));
        req.parse_mode = self.parse_mode();
        req.reply_parameters = Some(ReplyParameters::new(message_id(&to.message_id)?));
        let sent = req.await.map_err(|e| ChannelError::send(e.to_string()))?;
        Ok(message_ref(&sent))
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> ChannelResult<()> {
        let bot = self.bot().await?;
        let mut req = bot.edit_message_text(
            chat_id(&message.channel_id)?,
            message_id(&message.message_id)?,
            self.format(text),
        );
        req.parse_mode = self.parse_mode();
        req.await.map_err(|e| ChannelError::send(e.to_string()))?;
        Ok(())
    }

    async fn edit_status_card(
        &self,
        message: &MessageRef,
        card: &StatusCard,
    ) -> ChannelResult<()> {
        let mut card = card.clone();
        if card
            .image_url
            .as_deref()
            .is_some_and(|u| u.starts_with(FILE_URL_SCHEME))
        {
            card.image_url = None;
        }
        self.edit_message(message, &card.to_markdown()).await
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: Bytes,
    ) -> ChannelResult<UploadedFile> {
        let bot = self.bot().await?;
        let photo = InputFile::memory(data.to_vec()).file_name(filename.to_string());
        let sent = bot
            .send_photo(chat_id(channel_id)?, photo)
            .await
            .map_err(|e| ChannelError::upload(e.to_string()))?;

        let file_id = sent
            .photo()
            .and_then(<[_]>::last)
            .map(|p| p.file.id.to_string())
            .ok_or_else(|| ChannelError::upload("response carried no photo"))?;

        Ok(UploadedFile {
            message: message_ref(&sent),
            url: format!("{FILE_URL_SCHEME}{file_id}"),
        })
    }

    async fn delete_message(&self, message: &MessageRef) -> ChannelResult<()> {
        let bot = self.bot().await?;
        bot.delete_message(
            chat_id(&message.channel_id)?,
            message_id(&message.message_id)?,
        )
        .await
        .map_err(|e| ChannelError::send(e.to_string()))?;
        Ok(())
    }

    async fn create_dm_channel(&self, user_id: &str) -> ChannelResult<String> {
        chat_id(user_id)?;
        Ok(user_id.to_string())
    }

    async fn trigger_typing(&self, channel_id: &str) -> ChannelResult<()> {
        let bot = self.bot().await?;
        bot.send_chat_action(chat_id(channel_id)?, ChatAction::Typing)
            .await
            .map_err(|e| ChannelError::send(e.to_string()))?;
        Ok(())
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> ChannelResult<Bytes> {
        let bot = self.bot().await?;
        let file = bot
            .get_file(attachment.id.clone())
            .await
            .map_err(|e| ChannelError::download(e.to_string()))?;

        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf)
            .await
            .map_err(|e| ChannelError::download(e.to_string()))?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = TelegramGatewayConfig::new("token123").parse_markdown(false);
        assert_eq!(config.token, "token123");
        assert!(!config.parse_markdown);
    }

    #[test]
    fn test_split_message() {
        assert_eq!(split_message("Hello, world!", 100).len(), 1);

        let chunks = split_message("Line 1\nLine 2\nLine 3\nLine 4", 15);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 15));

        let chunks = split_message(&"é".repeat(20), 7);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        assert_eq!(chunks.concat(), "é".repeat(20));
    }

    #[test]
    fn test_markdown_to_html() {
        assert_eq!(
            markdown_to_telegram_html("**Prompt:** cat"),
            "<b>Prompt:</b> cat"
        );
        assert_eq!(markdown_to_telegram_html("*(Generating...)*"), "<i>(Generating...)</i>");
        assert_eq!(markdown_to_telegram_html("_Step 1 of 2_"), "<i>Step 1 of 2</i>");
        assert_eq!(markdown_to_telegram_html("`code`"), "<code>code</code>");
        assert_eq!(markdown_to_telegram_html("<script>"), "&lt;script&gt;");
        assert_eq!(
            markdown_to_telegram_html("__Stable Diffusion__: a"),
            "<u>Stable Diffusion</u>: a"
        );
    }

    #[test]
    fn test_snake_case_names_stay_plain() {
        assert_eq!(
            markdown_to_telegram_html("euler_a and dpm_2"),
            "euler_a and dpm_2"
        );
    }

    #[test]
    fn test_id_parsing() {
        assert_eq!(chat_id("-1001").unwrap(), ChatId(-1001));
        assert!(chat_id("abc").is_err());
        assert_eq!(message_id("42").unwrap(), MessageId(42));
    }
}
