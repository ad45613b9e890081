//! Bot configuration.
//!
//! The configuration lives in a JSON file (`~/.easel/config.json` by default).
//! Every field has a default, so a partial file is valid. [`ConfigStore`]
//! publishes immutable snapshots and can follow edits to the file while the
//! bot runs.

use crate::error::{CommandError, CommandResult, ConfigError, ConfigResult};
use crate::util;
use easel::text::TextMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Default command prefix.
pub const DEFAULT_PREFIX: &str = "sd!";

/// Placeholder image shown before the first frame arrives.
pub const DEFAULT_LOADING_FRAME_URL: &str = "https://c.tenor.com/RVvnVPK-6dcAAAAC/reload-cat.gif";

/// Placeholder image shown when a render fails.
pub const DEFAULT_ERROR_FRAME_URL: &str =
    "https://upload.wikimedia.org/wikipedia/commons/f/f7/Generic_error_message.png";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Command prefix, matched case-insensitively.
    pub prefix: String,
    /// Channels the bot answers in. Empty means every channel.
    pub channel_ids: Vec<String>,
    /// Channel that receives uploaded preview frames. Empty means the current channel.
    pub image_dump_channel_id: String,
    /// Answer messages from other bots.
    pub allow_bots: bool,
    /// Image engine connection.
    pub engine: EngineConfig,
    /// Preview frame publishing.
    pub frames: FrameConfig,
    /// Initial values for new channel settings.
    pub defaults: RenderDefaults,
    /// Properties users may not change (`size`, `negative_prompt`, `img2img`, ...).
    pub deny_changing: Vec<String>,
    /// User allow/deny list.
    pub users_list: UsersList,
    /// Backend for the `chat` command.
    pub chat: TextBackendConfig,
    /// Backend for the `kobold` command.
    pub kobold: TextBackendConfig,
    /// Telegram gateway.
    pub telegram: TelegramConfig,
    /// Channel settings lifetime.
    pub settings: SettingsConfig,
    /// Seconds between typing indicators.
    pub typing_interval_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            channel_ids: Vec::new(),
            image_dump_channel_id: String::new(),
            allow_bots: false,
            engine: EngineConfig::default(),
            frames: FrameConfig::default(),
            defaults: RenderDefaults::default(),
            deny_changing: Vec::new(),
            users_list: UsersList::default(),
            chat: TextBackendConfig::default(),
            kobold: TextBackendConfig {
                mode: TextMode::Kobold,
                ..TextBackendConfig::default()
            },
            telegram: TelegramConfig::default(),
            settings: SettingsConfig::default(),
            typing_interval_secs: 5,
        }
    }
}

/// Image engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine base URL.
    pub url: String,
    /// Pre-encoded Basic auth credential.
    pub basic_auth: String,
    /// Ask the engine for intermediate images.
    pub stream_image_progress: bool,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: easel::image::DEFAULT_ENGINE_URL.to_string(),
            basic_auth: String::new(),
            stream_image_progress: true,
            timeout_secs: easel::image::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Preview frame settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Public base URL of the built-in frame server. Empty disables it.
    pub frame_url: String,
    /// Bind address of the frame server.
    pub http_bind: String,
    /// Update the status card on steps that carry no image.
    pub count_frameless: bool,
    /// Image shown until the first frame.
    pub loading_frame_url: String,
    /// Image shown after a failure.
    pub error_frame_url: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frame_url: String::new(),
            http_bind: "0.0.0.0:8080".to_string(),
            count_frameless: false,
            loading_frame_url: DEFAULT_LOADING_FRAME_URL.to_string(),
            error_frame_url: DEFAULT_ERROR_FRAME_URL.to_string(),
        }
    }
}

impl FrameConfig {
    /// Whether frames are served by the built-in server.
    #[must_use]
    pub fn serves_frames(&self) -> bool {
        !self.frame_url.is_empty()
    }
}

/// Defaults for new channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Prompt.
    pub prompt: String,
    /// Negative prompt.
    pub negative_prompt: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Img2img prompt strength.
    pub prompt_strength: f64,
    /// Inference steps.
    pub inference_steps: u32,
    /// Guidance scale.
    pub guidance_scale: f64,
    /// Sampler.
    pub sampler: String,
    /// Upscaler, empty for none.
    pub upscaler: String,
    /// Upscale factor.
    pub upscale_amount: u32,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            prompt: "cat".to_string(),
            negative_prompt: "nsfw".to_string(),
            width: 768,
            height: 768,
            prompt_strength: 0.8,
            inference_steps: 28,
            guidance_scale: 12.0,
            sampler: "euler_a".to_string(),
            upscaler: String::new(),
            upscale_amount: 2,
        }
    }
}

/// User allow/deny list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersList {
    /// When true only listed users may use the bot; otherwise listed users are blocked.
    pub whitelist_mode: bool,
    /// User ids.
    pub list: Vec<String>,
}

impl UsersList {
    /// Whether `user_id` may use the bot.
    #[must_use]
    pub fn permits(&self, user_id: &str) -> bool {
        let listed = self.list.iter().any(|u| u == user_id);
        if self.whitelist_mode { listed } else { !listed }
    }
}

/// Text backend settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextBackendConfig {
    /// Whether the command is available.
    pub enabled: bool,
    /// Backend URL.
    pub url: String,
    /// Wire mode.
    pub mode: TextMode,
    /// Credential (Basic, Bearer or horde key depending on the mode).
    pub auth: String,
    /// Send the answer as a direct message to the requester.
    pub dm_output: bool,
}

/// Telegram gateway settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Whether to start the Telegram gateway.
    pub enabled: bool,
    /// Bot token from @BotFather. `TELEGRAM_BOT_TOKEN` overrides it.
    pub token: String,
}

/// Channel settings store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Idle time before a channel's settings are forgotten.
    pub ttl_secs: u64,
    /// Interval of the eviction sweep.
    pub sweep_interval_secs: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 20 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl SettingsConfig {
    /// Idle TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn normalize_property(name: &str) -> String {
    name.replace('_', "").to_ascii_lowercase()
}

impl BotConfig {
    /// Whether `property` is not on the deny list.
    ///
    /// Matching ignores case and underscores.
    #[must_use]
    pub fn is_changeable(&self, property: &str) -> bool {
        let wanted = normalize_property(property);
        !self
            .deny_changing
            .iter()
            .any(|p| normalize_property(p) == wanted)
    }

    /// Check that `property` may be changed right now.
    ///
    /// # Errors
    ///
    /// [`CommandError::Denied`] for deny-listed properties, [`CommandError::Busy`]
    /// while a render is running.
    pub fn can_change(&self, in_use: bool, property: &str) -> CommandResult<()> {
        if !self.is_changeable(property) {
            return Err(CommandError::denied(property));
        }
        if in_use {
            return Err(CommandError::Busy);
        }
        Ok(())
    }

    /// Whether the bot answers in `channel_id`.
    #[must_use]
    pub fn is_channel_permitted(&self, channel_id: &str) -> bool {
        self.channel_ids.is_empty() || self.channel_ids.iter().any(|c| c == channel_id)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        match std::env::var("TELEGRAM_BOT_TOKEN") {
            Ok(token) if !token.is_empty() => self.telegram.token = token,
            _ => {}
        }
    }

    /// Check the configuration for problems.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.prefix.trim().is_empty() {
            issues.push(ConfigIssue::error("prefix", "prefix must not be empty"));
        }
        if url_is_invalid(&self.engine.url) {
            issues.push(ConfigIssue::error(
                "engine.url",
                format!("not a valid URL: {}", self.engine.url),
            ));
        }
        if self.frames.serves_frames() {
            if url_is_invalid(&self.frames.frame_url) {
                issues.push(ConfigIssue::error(
                    "frames.frame_url",
                    format!("not a valid URL: {}", self.frames.frame_url),
                ));
            }
            if self.frames.http_bind.parse::<std::net::SocketAddr>().is_err() {
                issues.push(ConfigIssue::error(
                    "frames.http_bind",
                    format!("not a socket address: {}", self.frames.http_bind),
                ));
            }
        }
        if self.defaults.inference_steps == 0 || self.defaults.inference_steps > 100 {
            issues.push(ConfigIssue::warning(
                "defaults.inference_steps",
                "should be between 1 and 100",
            ));
        }
        if !(0.0..1.0).contains(&self.defaults.prompt_strength) {
            issues.push(ConfigIssue::warning(
                "defaults.prompt_strength",
                "should be in [0, 1)",
            ));
        }
        for (name, backend) in [("chat", &self.chat), ("kobold", &self.kobold)] {
            if backend.enabled && backend.url.is_empty() {
                issues.push(ConfigIssue::error(
                    format!("{name}.url"),
                    "enabled but no URL configured",
                ));
            }
        }
        if self.telegram.enabled && self.telegram.token.is_empty() {
            issues.push(ConfigIssue::error(
                "telegram.token",
                "enabled but no token (set TELEGRAM_BOT_TOKEN)",
            ));
        }
        if self.users_list.whitelist_mode && self.users_list.list.is_empty() {
            issues.push(ConfigIssue::warning(
                "users_list",
                "whitelist mode with an empty list blocks everyone",
            ));
        }
        if self.settings.ttl_secs == 0 || self.settings.sweep_interval_secs == 0 {
            issues.push(ConfigIssue::error(
                "settings",
                "ttl_secs and sweep_interval_secs must be positive",
            ));
        }

        issues
    }

    /// Whether [`validate`](Self::validate) found no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|i| i.level != IssueLevel::Error)
    }
}

fn url_is_invalid(raw: &str) -> bool {
    !(raw.starts_with("http://") || raw.starts_with("https://")) || raw.len() <= "https://".len()
}

// ============================================================================
// Validation issues
// ============================================================================

/// Severity of a [`ConfigIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// The bot will misbehave or refuse to start.
    Error,
    /// Suspicious but usable.
    Warning,
}

/// A problem found by [`BotConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Dotted field path.
    pub field: String,
    /// Description.
    pub message: String,
}

impl ConfigIssue {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        write!(f, "{level}: {}: {}", self.field, self.message)
    }
}

// ============================================================================
// Loading and saving
// ============================================================================

/// Default config file path.
#[must_use]
pub fn config_path() -> PathBuf {
    util::config_path()
}

/// Load the configuration from `path`, applying environment overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn load_config(path: &Path) -> ConfigResult<BotConfig> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut config: BotConfig = serde_json::from_str(&content)?;
    config.apply_env();
    Ok(config)
}

/// Load `path` if it exists, otherwise defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_or_default(path: &Path) -> ConfigResult<BotConfig> {
    if tokio::fs::try_exists(path).await? {
        load_config(path).await
    } else {
        let mut config = BotConfig::default();
        config.apply_env();
        Ok(config)
    }
}

/// Write `config` to `path` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn save_config(path: &Path, config: &BotConfig) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Write a default configuration to `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn init_config(path: &Path) -> ConfigResult<()> {
    save_config(path, &BotConfig::default()).await
}

// ============================================================================
// Live configuration
// ============================================================================

/// Shared, hot-swappable configuration.
///
/// Readers take an `Arc<BotConfig>` snapshot and keep it for the duration of
/// one operation, so a reload never changes values under a running command.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<Arc<BotConfig>>>,
    path: Option<Arc<Path>>,
}

impl ConfigStore {
    /// Store holding a fixed configuration.
    #[must_use]
    pub fn new(config: BotConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self {
            tx: Arc::new(tx),
            path: None,
        }
    }

    /// Store backed by a file that [`reload`](Self::reload) re-reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path: PathBuf = path.into();
        let config = load_or_default(&path).await?;
        let mut store = Self::new(config);
        store.path = Some(path.into());
        Ok(store)
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<BotConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receive every new snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<BotConfig>> {
        self.tx.subscribe()
    }

    /// Backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Publish a new snapshot.
    pub fn replace(&self, config: BotConfig) {
        self.tx.send_replace(Arc::new(config));
    }

    /// Re-read the backing file and publish it if it parses.
    ///
    /// # Errors
    ///
    /// Returns an error if the store has no file or the file is unreadable or
    /// invalid. The previous snapshot stays active in that case.
    pub async fn reload(&self) -> ConfigResult<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| ConfigError::missing("config file path"))?;
        let config = load_config(path).await?;
        self.replace(config);
        info!(path = %path.display(), "Configuration reloaded");
        Ok(())
    }

    /// Poll the backing file's modification time and reload on change.
    ///
    /// Does nothing useful for stores without a file.
    #[must_use]
    pub fn spawn_reloader(&self, interval: Duration) -> ReloaderHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let store = self.clone();

        let task = tokio::spawn(async move {
            let Some(path) = store.path.clone() else {
                return;
            };
            let mut last_seen = modified(&path).await;
            debug!(path = %path.display(), "config reloader started");

            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        let current = modified(&path).await;
                        if current.is_some() && current != last_seen {
                            last_seen = current;
                            if let Err(e) = store.reload().await {
                                warn!(error = %e, "Ignoring invalid configuration change");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("config reloader shutting down");
                        break;
                    }
                }
            }
        });

        ReloaderHandle { shutdown_tx, task }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Handle for the config reload task.
#[derive(Debug)]
pub struct ReloaderHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ReloaderHandle {
    /// Stop the reloader and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.prefix, "sd!");
        assert_eq!(config.engine.url, "http://localhost:9000");
        assert_eq!(config.defaults.width, 768);
        assert_eq!(config.defaults.inference_steps, 28);
        assert!((config.defaults.guidance_scale - 12.0).abs() < f64::EPSILON);
        assert_eq!(config.kobold.mode, TextMode::Kobold);
        assert_eq!(config.settings.ttl(), Duration::from_secs(1200));
        assert!(config.is_valid());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BotConfig = serde_json::from_str(
            r#"{"prefix":"!","defaults":{"width":512},"chat":{"enabled":true,"url":"http://x","mode":"openai"}}"#,
        )
        .unwrap();
        assert_eq!(config.prefix, "!");
        assert_eq!(config.defaults.width, 512);
        assert_eq!(config.defaults.height, 768);
        assert_eq!(config.chat.mode, TextMode::OpenAi);
    }

    #[test]
    fn test_deny_list_ignores_case_and_underscores() {
        let config = BotConfig {
            deny_changing: vec!["Negative_Prompt".into(), "size".into()],
            ..BotConfig::default()
        };
        assert!(!config.is_changeable("negativeprompt"));
        assert!(!config.is_changeable("SIZE"));
        assert!(config.is_changeable("prompt"));

        assert!(matches!(
            config.can_change(false, "negativeprompt"),
            Err(CommandError::Denied(_))
        ));
        assert!(matches!(config.can_change(true, "prompt"), Err(CommandError::Busy)));
        assert!(config.can_change(false, "prompt").is_ok());
    }

    #[test]
    fn test_users_list() {
        let deny = UsersList {
            whitelist_mode: false,
            list: vec!["42".into()],
        };
        assert!(!deny.permits("42"));
        assert!(deny.permits("7"));

        let allow = UsersList {
            whitelist_mode: true,
            list: vec!["42".into()],
        };
        assert!(allow.permits("42"));
        assert!(!allow.permits("7"));
    }

    #[test]
    fn test_channel_filter() {
        let mut config = BotConfig::default();
        assert!(config.is_channel_permitted("any"));
        config.channel_ids = vec!["c1".into()];
        assert!(config.is_channel_permitted("c1"));
        assert!(!config.is_channel_permitted("c2"));
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = BotConfig {
            prefix: String::new(),
            chat: TextBackendConfig {
                enabled: true,
                ..TextBackendConfig::default()
            },
            frames: FrameConfig {
                frame_url: "http://frames.example".into(),
                http_bind: "nope".into(),
                ..FrameConfig::default()
            },
            ..BotConfig::default()
        };
        let issues = config.validate();
        let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"prefix"));
        assert!(fields.contains(&"chat.url"));
        assert!(fields.contains(&"frames.http_bind"));
        assert!(!config.is_valid());
    }

    #[tokio::test]
    async fn test_store_snapshots_and_reload() {
        let dir = std::env::temp_dir().join(format!("easel-config-{}", util::timestamp_nanos()));
        let path = dir.join("config.json");
        save_config(&path, &BotConfig::default()).await.unwrap();

        let store = ConfigStore::open(&path).await.unwrap();
        let before = store.snapshot();
        assert_eq!(before.prefix, "sd!");

        tokio::fs::write(&path, r#"{"prefix":"img!"}"#).await.unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.snapshot().prefix, "img!");
        assert_eq!(before.prefix, "sd!");

        tokio::fs::write(&path, "{ broken").await.unwrap();
        assert!(store.reload().await.is_err());
        assert_eq!(store.snapshot().prefix, "img!");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_store_without_file_cannot_reload() {
        let store = ConfigStore::new(BotConfig::default());
        assert!(store.path().is_none());
        assert!(matches!(store.reload().await, Err(ConfigError::Missing(_))));
    }
}
