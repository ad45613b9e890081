//! Chat commands.
//!
//! A [`Command`] is a name, its aliases and a handler. Handlers get a
//! [`CommandContext`] describing the invocation and return a
//! [`CommandResult`]; the bot turns any error into a single error reply.

pub mod chat;
pub mod info;
pub mod params;
pub mod render;

use crate::config::{BotConfig, TextBackendConfig};
use crate::error::{CommandError, CommandResult};
use crate::heartbeat::TypingStop;
use crate::messaging::{IncomingMessage, MessageRef, MessagingGateway, reply_or_send};
use crate::settings::ChannelSettings;
use easel::image::{EngineClient, ImageBackend};
use easel::text::{TextBackend, TextClient};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Future returned by a command handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = CommandResult> + Send + 'a>>;

/// Command handler.
pub type Handler = for<'a> fn(&'a CommandContext) -> HandlerFuture<'a>;

/// A chat command.
#[derive(Clone, Copy)]
pub struct Command {
    /// Primary name.
    pub name: &'static str,
    /// Alternative names.
    pub aliases: &'static [&'static str],
    /// One-line description.
    pub description: &'static str,
    handler: Handler,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Create a command.
    #[must_use]
    pub const fn new(
        name: &'static str,
        aliases: &'static [&'static str],
        description: &'static str,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            aliases,
            description,
            handler,
        }
    }

    /// Whether `name` is this command's name or one of its aliases.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }

    /// Run the handler.
    ///
    /// # Errors
    ///
    /// Returns whatever the handler returns.
    pub async fn run(&self, ctx: &CommandContext) -> CommandResult {
        (self.handler)(ctx).await
    }
}

/// Ordered set of commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for command in render::COMMANDS
            .iter()
            .chain(params::COMMANDS)
            .chain(info::COMMANDS)
            .chain(chat::COMMANDS)
        {
            registry.register(*command);
        }
        registry
    }

    /// Add a command. Earlier registrations win on name clashes.
    pub fn register(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Primary names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }

    /// Look up a command by name or alias.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.matches(name))
    }

    /// Run the command called `name`.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotFound`] for unknown names, otherwise the handler's error.
    pub async fn dispatch(&self, name: &str, ctx: &CommandContext) -> CommandResult {
        let command = self
            .find(name)
            .ok_or_else(|| CommandError::NotFound(name.to_string()))?;
        debug!(command = command.name, alias = name, "dispatching command");
        command.run(ctx).await
    }
}

/// A text backend with its one-request-at-a-time lock.
pub struct TextSlot {
    backend: Arc<dyn TextBackend>,
    busy: Mutex<()>,
    dm_output: bool,
}

impl std::fmt::Debug for TextSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSlot")
            .field("dm_output", &self.dm_output)
            .finish_non_exhaustive()
    }
}

impl TextSlot {
    /// Wrap `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn TextBackend>, dm_output: bool) -> Self {
        Self {
            backend,
            busy: Mutex::new(()),
            dm_output,
        }
    }

    /// The backend.
    #[must_use]
    pub fn backend(&self) -> &dyn TextBackend {
        self.backend.as_ref()
    }

    /// Whether answers go to the requester's direct messages.
    #[must_use]
    pub const fn dm_output(&self) -> bool {
        self.dm_output
    }

    /// Claim the backend, or `None` while another request uses it.
    #[must_use]
    pub fn try_claim(&self) -> Option<MutexGuard<'_, ()>> {
        self.busy.try_lock().ok()
    }
}

/// Generation backends shared by all commands.
#[derive(Clone)]
pub struct Backends {
    /// Image engine.
    pub image: Arc<dyn ImageBackend>,
    /// Backend of the `chat` command, when enabled.
    pub chat: Option<Arc<TextSlot>>,
    /// Backend of the `kobold` command, when enabled.
    pub kobold: Option<Arc<TextSlot>>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("chat", &self.chat)
            .field("kobold", &self.kobold)
            .finish_non_exhaustive()
    }
}

impl Backends {
    /// Backends with only an image engine.
    #[must_use]
    pub fn new(image: Arc<dyn ImageBackend>) -> Self {
        Self {
            image,
            chat: None,
            kobold: None,
        }
    }

    /// Set the `chat` backend.
    #[must_use]
    pub fn with_chat(mut self, backend: Arc<dyn TextBackend>, dm_output: bool) -> Self {
        self.chat = Some(Arc::new(TextSlot::new(backend, dm_output)));
        self
    }

    /// Set the `kobold` backend.
    #[must_use]
    pub fn with_kobold(mut self, backend: Arc<dyn TextBackend>, dm_output: bool) -> Self {
        self.kobold = Some(Arc::new(TextSlot::new(backend, dm_output)));
        self
    }

    /// Build HTTP clients for everything `config` enables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL or credential is unusable.
    pub fn from_config(config: &BotConfig) -> easel::Result<Self> {
        let engine = EngineClient::builder()
            .base_url(&config.engine.url)
            .basic_auth(&config.engine.basic_auth)
            .timeout_secs(config.engine.timeout_secs)
            .build()?;
        let mut backends = Self::new(Arc::new(engine));

        if config.chat.enabled {
            backends = backends.with_chat(text_client(&config.chat)?, config.chat.dm_output);
        }
        if config.kobold.enabled {
            backends = backends.with_kobold(text_client(&config.kobold)?, config.kobold.dm_output);
        }
        Ok(backends)
    }
}

fn text_client(config: &TextBackendConfig) -> easel::Result<Arc<dyn TextBackend>> {
    let client = TextClient::builder()
        .url(&config.url)
        .mode(config.mode)
        .auth(&config.auth)
        .build()?;
    Ok(Arc::new(client))
}

/// Prefix, command name and arguments of a message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Prefix (or mention) the message started with.
    pub prefix: String,
    /// Lowercased command name or alias.
    pub command: String,
    /// Remaining text.
    pub args: String,
}

impl Invocation {
    /// Parse `content` if it starts with `prefix` (any case) or, when the
    /// message mentions the bot, with a mention token.
    ///
    /// Newlines become spaces. A bare prefix is a request for help.
    #[must_use]
    pub fn parse(content: &str, prefix: &str, mentions_bot: bool) -> Option<Self> {
        let (used, rest) = if content
            .get(..prefix.len())
            .is_some_and(|head| !prefix.is_empty() && head.eq_ignore_ascii_case(prefix))
        {
            content.split_at(prefix.len())
        } else if mentions_bot && (content.starts_with('@') || content.starts_with("<@")) {
            let end = content.find(char::is_whitespace).unwrap_or(content.len());
            content.split_at(end)
        } else {
            return None;
        };

        let mut args = rest.trim().replace('\n', " ");
        if args.is_empty() {
            args.push('?');
        }
        let (command, args) = args.split_once(' ').unwrap_or((args.as_str(), ""));

        Some(Self {
            prefix: used.to_string(),
            command: command.to_lowercase(),
            args: args.trim().to_string(),
        })
    }
}

/// Everything a handler knows about one invocation.
pub struct CommandContext {
    /// Settings of the channel the message came from.
    pub settings: Arc<ChannelSettings>,
    /// Gateway the message came from.
    pub gateway: Arc<dyn MessagingGateway>,
    /// Generation backends.
    pub backends: Backends,
    /// Configuration snapshot taken when the message arrived.
    pub config: Arc<BotConfig>,
    /// Registry the command was dispatched from.
    pub registry: Arc<CommandRegistry>,
    /// Triggering message.
    pub message: IncomingMessage,
    /// Prefix the message used.
    pub prefix: String,
    /// Name or alias the command was invoked with.
    pub alias: String,
    /// Arguments after the command name.
    pub args: String,
    /// Stops the channel's typing indicator.
    pub typing: TypingStop,
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("channel", &self.message.channel_id)
            .field("alias", &self.alias)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl CommandContext {
    /// Reply to the triggering message, falling back to a plain message.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when neither attempt succeeds.
    pub async fn reply(&self, text: &str) -> CommandResult<MessageRef> {
        Ok(reply_or_send(self.gateway.as_ref(), &self.message.reference(), text).await?)
    }

    /// [`reply`](Self::reply), discarding the sent message.
    ///
    /// # Errors
    ///
    /// Returns the gateway error when neither attempt succeeds.
    pub async fn say(&self, text: impl AsRef<str> + Send) -> CommandResult {
        self.reply(text.as_ref()).await.map(|_| ())
    }

    /// Check that `property` may be changed in this channel now.
    ///
    /// # Errors
    ///
    /// [`CommandError::Denied`] or [`CommandError::Busy`].
    pub fn can_change(&self, property: &str) -> CommandResult {
        self.config
            .can_change(self.settings.is_rendering(), property)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::channels::MemoryGateway;
    use crate::config::RenderDefaults;
    use crate::settings::RenderParams;
    use easel::image::ActiveModels;
    use easel::mock::ScriptedImageBackend;

    /// Context for `alias args` in channel `c1` from user `u1`.
    pub(crate) fn context(
        gateway: &Arc<MemoryGateway>,
        backend: &Arc<ScriptedImageBackend>,
        config: BotConfig,
        alias: &str,
        args: &str,
    ) -> CommandContext {
        let active = ActiveModels {
            stable_diffusion: "sd-v1-5".into(),
            ..ActiveModels::default()
        };
        CommandContext {
            settings: Arc::new(ChannelSettings::new(
                "c1",
                RenderParams::from_defaults(&RenderDefaults::default(), &active),
            )),
            gateway: Arc::clone(gateway) as Arc<dyn MessagingGateway>,
            backends: Backends::new(Arc::clone(backend) as Arc<dyn ImageBackend>),
            config: Arc::new(config),
            registry: Arc::new(CommandRegistry::builtin()),
            message: IncomingMessage {
                id: "in1".into(),
                channel_id: "c1".into(),
                author: crate::messaging::Author {
                    id: "u1".into(),
                    name: "alice".into(),
                    is_bot: false,
                },
                content: format!("sd!{alias} {args}"),
                ..IncomingMessage::default()
            },
            prefix: "sd!".into(),
            alias: alias.into(),
            args: args.into(),
            typing: TypingStop::new(),
        }
    }
}
