//! Easel Bot - chat-driven Stable Diffusion renders with live progress.
//!
//! Users configure per-channel render settings with short prefixed commands
//! and start renders whose progress is streamed into a single status message
//! that is edited as new frames arrive.
//!
//! # Architecture
//!
//! - **Gateways** ([`messaging`], [`channels`]) - platform integrations (CLI,
//!   Telegram, and an in-memory gateway for tests)
//! - **Commands** ([`commands`]) - registry, invocation parsing and handlers
//! - **Settings** ([`settings`]) - per-channel render parameters with idle expiry
//! - **Render** ([`render`]) - the submit, poll and publish loop
//! - **Frames** ([`frames`]) - optional HTTP server for in-progress frames
//! - **Bot** ([`bot`]) - per-message pipeline and service lifecycle
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use easel_bot::prelude::*;
//! use std::sync::Arc;
//!
//! let config = ConfigStore::open(config_path()).await?;
//! let bot = Bot::from_config(config)?;
//! bot.run(Arc::new(CliGateway::new()), async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! ```
//!
//! # Features
//!
//! - `telegram` - Telegram gateway via teloxide

pub mod bot;
pub mod channels;
pub mod commands;
pub mod config;
pub mod error;
pub mod frames;
pub mod heartbeat;
pub mod messaging;
pub mod render;
pub mod settings;
pub mod util;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{
        BotError, ChannelError, ChannelResult, CommandError, CommandResult, ConfigError,
        ConfigResult, ErrorContext, ErrorKind, Result,
    };

    pub use crate::bot::Bot;

    pub use crate::channels::{CliGateway, CliGatewayConfig, GatewayEvent, MemoryGateway};
    #[cfg(feature = "telegram")]
    pub use crate::channels::{TelegramGateway, TelegramGatewayConfig};

    pub use crate::commands::{
        Backends, Command, CommandContext, CommandRegistry, Invocation, TextSlot,
    };

    pub use crate::config::{
        BotConfig, ConfigIssue, ConfigStore, EngineConfig, FrameConfig, IssueLevel,
        RenderDefaults, SettingsConfig, TextBackendConfig, UsersList, config_path, init_config,
        load_config, load_or_default, save_config,
    };

    pub use crate::heartbeat::{TypingHeartbeat, TypingStop};

    pub use crate::messaging::{
        Attachment, Author, IncomingMessage, MessageRef, MessagingGateway, StatusCard,
        UploadedFile,
    };

    pub use crate::render::{RenderJob, RenderSummary, run_render, stop_render};

    pub use crate::settings::{
        ChannelSettings, ChannelSettingsStore, CurrentRenderInfo, RenderGuard, RenderParams,
    };
}
