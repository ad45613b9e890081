//! Unified error types for easel-bot.
//!
//! Module-specific errors convert into [`BotError`] for the service layer.
//! Command handlers return [`CommandError`], which the bot turns into a single
//! `**Error:** ...` reply.

use easel::BackendError;
use std::fmt;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for easel-bot operations.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Messaging gateway error.
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Generation backend error.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// Command failed outside a chat context.
    #[error("command: {0}")]
    Command(#[from] CommandError),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Task join error.
    #[error("task: {0}")]
    Task(String),

    /// Error with added context.
    #[error("{0}")]
    Internal(String),
}

impl BotError {
    /// Create a config error from a string.
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }
}

impl From<tokio::task::JoinError> for BotError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type alias for easel-bot operations.
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// Channel Errors
// ============================================================================

/// Error type for messaging gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Failed to start the gateway.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// Failed to send, edit or delete a message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to upload a file.
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Failed to download an attachment.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// The platform does not support this operation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Gateway is not connected.
    #[error("not connected")]
    NotConnected,

    /// Internal error.
    #[error("{0}")]
    Internal(String),
}

impl ChannelError {
    /// Create a start failed error.
    #[inline]
    pub fn start(msg: impl Into<String>) -> Self {
        Self::StartFailed(msg.into())
    }

    /// Create a send failed error.
    #[inline]
    pub fn send(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Create an upload failed error.
    #[inline]
    pub fn upload(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    /// Create a download failed error.
    #[inline]
    pub fn download(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }
}

/// Result type for gateway operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Missing required field.
    #[error("missing: {0}")]
    Missing(String),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a missing field error.
    #[inline]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Command Errors
// ============================================================================

/// Coarse classification of a [`CommandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Resource is in use; retry later.
    Busy,
    /// Operation not permitted by configuration or ownership.
    Denied,
    /// Bad user input.
    Validation,
    /// Backend reported a failure.
    Backend,
    /// Network or platform failure.
    Transport,
    /// Unknown command or empty backend result.
    NotFound,
}

/// Error returned by command handlers.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Property is locked while a render runs.
    #[error("locked while rendering")]
    Busy,

    /// A render is already running in this channel.
    #[error("render already in progress")]
    AlreadyInProgress,

    /// Property is on the deny list.
    #[error("not allowed to change property")]
    Denied(String),

    /// Invalid user input.
    #[error("{0}")]
    Validation(String),

    /// `stop` without a running render.
    #[error("no render in progress")]
    RenderNotInProgress,

    /// `stop` from someone other than the requester.
    #[error("current render not requested by you")]
    RenderNotRequestedByYou,

    /// Unknown command name.
    #[error("command not found: {0}")]
    NotFound(String),

    /// Feature switched off in configuration.
    #[error("{0} is disabled")]
    Disabled(String),

    /// Generation backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Messaging gateway failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl CommandError {
    /// Create a validation error.
    #[inline]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a deny-list error for `property`.
    #[inline]
    pub fn denied(property: impl Into<String>) -> Self {
        Self::Denied(property.into())
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy | Self::AlreadyInProgress => ErrorKind::Busy,
            Self::Denied(_) | Self::RenderNotRequestedByYou | Self::Disabled(_) => {
                ErrorKind::Denied
            }
            Self::Validation(_) | Self::RenderNotInProgress => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Backend(e) if e.is_not_found() => ErrorKind::NotFound,
            Self::Backend(e) if e.is_transport() => ErrorKind::Transport,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Channel(_) => ErrorKind::Transport,
        }
    }
}

impl From<std::num::ParseIntError> for CommandError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for CommandError {
    fn from(err: std::num::ParseFloatError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for command handlers.
pub type CommandResult<T = ()> = std::result::Result<T, CommandError>;

// ============================================================================
// Error Context Extension
// ============================================================================

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<BotError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            BotError::Internal(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            BotError::Internal(format!("{}: {}", f(), err))
        })
    }
}

// ============================================================================
// Display Helpers
// ============================================================================

/// A wrapper that displays errors in a user-friendly format.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a BotError);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BotError::Config(e) => write!(f, "Configuration error: {e}"),
            BotError::Channel(e) => write!(f, "Channel error: {e}"),
            BotError::Backend(e) => write!(f, "Backend error: {e}"),
            BotError::Command(e) => write!(f, "Command error: {e}"),
            BotError::Io(e) => write!(f, "IO error: {e}"),
            BotError::Json(e) => write!(f, "JSON error: {e}"),
            BotError::Task(e) => write!(f, "Task error: {e}"),
            BotError::Internal(e) => write!(f, "Internal error: {e}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
