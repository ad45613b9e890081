//! Bot service.
//!
//! The bot owns everything that outlives a single message: the live
//! configuration, the channel settings store, the backends and the command
//! registry. [`Bot::run`] connects a gateway and handles each inbound message
//! in its own task; [`Bot::handle_message`] is the per-message pipeline.

use crate::commands::{Backends, CommandContext, CommandRegistry, Invocation};
use crate::config::{BotConfig, ConfigStore};
use crate::error::{CommandResult, Result};
use crate::frames;
use crate::heartbeat::{TypingHeartbeat, TypingStop};
use crate::messaging::{IncomingMessage, MessagingGateway, reply_or_send};
use crate::settings::{ChannelSettingsStore, RenderParams};
use easel::BackendError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Queued inbound messages before gateways wait.
const INBOUND_CAPACITY: usize = 64;

/// How often the configuration file is checked for changes.
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The bot service.
#[derive(Clone)]
pub struct Bot {
    config: ConfigStore,
    store: ChannelSettingsStore,
    backends: Backends,
    registry: Arc<CommandRegistry>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Create a bot with the built-in commands.
    #[must_use]
    pub fn new(config: ConfigStore, backends: Backends) -> Self {
        let ttl = config.snapshot().settings.ttl();
        Self {
            config,
            store: ChannelSettingsStore::new(ttl),
            backends,
            registry: Arc::new(CommandRegistry::builtin()),
        }
    }

    /// Create a bot whose backends are built from the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be configured.
    pub fn from_config(config: ConfigStore) -> Result<Self> {
        let backends = Backends::from_config(&config.snapshot())?;
        Ok(Self::new(config, backends))
    }

    /// Live configuration.
    #[must_use]
    pub const fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Per-channel settings.
    #[must_use]
    pub const fn settings(&self) -> &ChannelSettingsStore {
        &self.store
    }

    /// Whether `message` should be looked at at all.
    fn accepts(config: &BotConfig, gateway: &dyn MessagingGateway, message: &IncomingMessage) -> bool {
        if gateway
            .bot_user_id()
            .is_some_and(|id| id == message.author.id)
        {
            return false;
        }
        if message.author.is_bot && !config.allow_bots {
            return false;
        }
        config.is_channel_permitted(&message.channel_id)
            && config.users_list.permits(&message.author.id)
    }

    /// Handle one inbound message.
    ///
    /// Returns `None` when the message is not a command for this bot, and the
    /// command's result otherwise. Errors have already been reported in the
    /// channel when this returns.
    #[instrument(skip_all, fields(channel = %message.channel_id, user = %message.author.id))]
    pub async fn handle_message(
        &self,
        gateway: Arc<dyn MessagingGateway>,
        message: IncomingMessage,
    ) -> Option<CommandResult> {
        let config = self.config.snapshot();
        if !Self::accepts(&config, gateway.as_ref(), &message) {
            return None;
        }
        let invocation = Invocation::parse(&message.content, &config.prefix, message.mentions_bot)?;
        debug!(command = %invocation.command, "command received");

        let reference = message.reference();
        let channel_id = message.channel_id.clone();
        let heartbeat = TypingHeartbeat::start(
            Arc::clone(&gateway),
            message.channel_id.clone(),
            Duration::from_secs(config.typing_interval_secs),
        );
        let result = self
            .execute(&gateway, &config, invocation, message, heartbeat.stop_signal())
            .await;
        self.store.touch(&channel_id).await;

        if let Err(e) = &result {
            warn!(error = %e, kind = ?e.kind(), "command failed");
            let text = format!("**Error:** {e}");
            if let Err(send) = reply_or_send(gateway.as_ref(), &reference, &text).await {
                error!(error = %send, "failed to report command error");
            }
        }
        heartbeat.finish().await;
        Some(result)
    }

    async fn execute(
        &self,
        gateway: &Arc<dyn MessagingGateway>,
        config: &Arc<BotConfig>,
        invocation: Invocation,
        message: IncomingMessage,
        typing: TypingStop,
    ) -> CommandResult {
        let image = Arc::clone(&self.backends.image);
        let defaults = &config.defaults;
        let settings = self
            .store
            .get_or_create(&message.channel_id, || async move {
                let active = image.fetch_active_model_config().await?;
                Ok::<_, BackendError>(RenderParams::from_defaults(defaults, &active.model))
            })
            .await?;

        let ctx = CommandContext {
            settings,
            gateway: Arc::clone(gateway),
            backends: self.backends.clone(),
            config: Arc::clone(config),
            registry: Arc::clone(&self.registry),
            message,
            prefix: invocation.prefix,
            alias: invocation.command.clone(),
            args: invocation.args,
            typing,
        };
        self.registry.dispatch(&invocation.command, &ctx).await
    }

    /// Connect `gateway` and serve it until `shutdown` resolves or the
    /// gateway closes its inbound stream.
    ///
    /// Also runs the settings sweeper, the configuration reloader and, when a
    /// frame URL is configured, the frame server.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway fails to start.
    pub async fn run(
        &self,
        gateway: Arc<dyn MessagingGateway>,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);
        gateway.start(tx).await?;
        info!(gateway = gateway.name(), "Bot started");

        let config = self.config.snapshot();
        let sweeper = self.store.spawn_sweeper(config.settings.sweep_interval());
        let reloader = self.config.spawn_reloader(CONFIG_POLL_INTERVAL);
        let (frames_stop, frames_stopped) = oneshot::channel::<()>();
        let frame_server = config.frames.serves_frames().then(|| {
            let bind = config.frames.http_bind.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                let stopped = async move {
                    let _ = frames_stopped.await;
                };
                if let Err(e) = frames::serve(&bind, store, stopped).await {
                    error!(error = %e, "Frame server failed");
                }
            })
        });

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        info!("Gateway closed its inbound stream");
                        break;
                    };
                    let bot = self.clone();
                    let gateway = Arc::clone(&gateway);
                    tasks.spawn(async move {
                        bot.handle_message(gateway, message).await;
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "message task panicked");
                    }
                }
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        if let Err(e) = gateway.stop().await {
            warn!(error = %e, "failed to stop gateway");
        }
        tasks.shutdown().await;
        sweeper.stop().await;
        reloader.stop().await;
        let _ = frames_stop.send(());
        if let Some(server) = frame_server {
            server.await?;
        }
        info!("Bot stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryGateway;
    use crate::config::UsersList;
    use crate::error::CommandError;
    use crate::messaging::Author;
    use easel::mock::ScriptedImageBackend;

    fn bot(config: BotConfig) -> Bot {
        Bot::new(
            ConfigStore::new(config),
            Backends::new(Arc::new(ScriptedImageBackend::new())),
        )
    }

    fn dyn_gateway(gw: &Arc<MemoryGateway>) -> Arc<dyn MessagingGateway> {
        Arc::clone(gw) as Arc<dyn MessagingGateway>
    }

    fn message(user: &str, content: &str) -> IncomingMessage {
        IncomingMessage {
            id: "m1".into(),
            channel_id: "c1".into(),
            author: Author {
                id: user.into(),
                name: user.into(),
                is_bot: false,
            },
            content: content.into(),
            ..IncomingMessage::default()
        }
    }

    #[tokio::test]
    async fn test_ignores_non_commands_and_own_messages() {
        let bot = bot(BotConfig::default());
        let gw = Arc::new(MemoryGateway::new());

        assert!(bot.handle_message(dyn_gateway(&gw), message("u1", "hello")).await.is_none());
        assert!(bot.handle_message(dyn_gateway(&gw), message("bot", "sd!p")).await.is_none());

        let mut from_bot = message("u2", "sd!p");
        from_bot.author.is_bot = true;
        assert!(bot.handle_message(dyn_gateway(&gw), from_bot).await.is_none());
        assert!(gw.events().is_empty());
        assert!(bot.settings().is_empty().await);
    }

    #[tokio::test]
    async fn test_channel_and_user_lists() {
        let config = BotConfig {
            channel_ids: vec!["other".into()],
            ..BotConfig::default()
        };
        let gw = Arc::new(MemoryGateway::new());
        assert!(bot(config).handle_message(dyn_gateway(&gw), message("u1", "sd!p")).await.is_none());

        let config = BotConfig {
            users_list: UsersList {
                whitelist_mode: true,
                list: vec!["u9".into()],
            },
            ..BotConfig::default()
        };
        let bot = bot(config);
        assert!(bot.handle_message(dyn_gateway(&gw), message("u1", "sd!p")).await.is_none());
        assert!(bot.handle_message(dyn_gateway(&gw), message("u9", "sd!p")).await.is_some());
    }

    #[tokio::test]
    async fn test_prefix_is_case_insensitive() {
        let bot = bot(BotConfig::default());
        let gw = Arc::new(MemoryGateway::new());

        let result = bot.handle_message(dyn_gateway(&gw), message("u1", "SD!Prompt a red fox")).await;
        assert!(matches!(result, Some(Ok(()))));
        let settings = bot.settings().peek("c1").await.unwrap();
        assert_eq!(settings.params().prompt, "a red fox");
    }

    #[tokio::test]
    async fn test_errors_are_reported_once() {
        let bot = bot(BotConfig::default());
        let gw = Arc::new(MemoryGateway::new());

        let result = bot.handle_message(dyn_gateway(&gw), message("u1", "sd!zz")).await;
        assert!(matches!(result, Some(Err(CommandError::NotFound(_)))));
        assert_eq!(gw.texts(), vec!["**Error:** command not found: zz"]);
    }

    #[tokio::test]
    async fn test_settings_persist_between_messages() {
        let bot = bot(BotConfig::default());
        let gw = Arc::new(MemoryGateway::new());

        bot.handle_message(dyn_gateway(&gw), message("u1", "sd!sz 512")).await;
        gw.clear();
        bot.handle_message(dyn_gateway(&gw), message("u1", "sd!sz")).await;
        assert!(gw.texts()[0].starts_with("**Current size:** 512x512"));
    }
}
