// Configuration management module
// Handles loading, saving, and validating configuration

use crate::queue::QueuePolicy;
use crate::scrobbler::lastfm::{DEFAULT_API_URL, DEFAULT_AUTH_URL};
use crate::scrobbler::{ClientSettings, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for scrobbling
    pub enabled: bool,

    /// Scrobble after playing this percentage of the track (50% default)
    pub scrobble_threshold: u8,

    /// Verbose logging
    pub debug: bool,

    /// Where the session and queue files live; defaults to the user data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Text cleanup configuration
    pub cleanup: CleanupConfig,

    /// Last.fm configuration
    pub lastfm: LastFmConfig,

    /// Transport retry for rate limiting and server errors
    pub retry: RetryConfig,

    /// Delivery queue tuning
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Enable text cleanup
    pub enabled: bool,

    /// Regex patterns to remove from track/album/artist names
    /// Applied in order, each pattern is removed from the text
    pub patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: vec![
                r"\s*\[Explicit\]".to_string(),
                r"\s*\[Clean\]".to_string(),
                r"\s*\(Explicit\)".to_string(),
                r"\s*\(Clean\)".to_string(),
                r"\s*- Explicit".to_string(),
                r"\s*- Clean".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    pub api_key: String,
    pub api_secret: String,
    /// Session key from older configs; migrated to the session file on startup
    pub session_key: String,
    pub api_url: String,
    pub auth_url: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            session_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            connect_timeout_secs: 5,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, including the first
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 1600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Seconds between background drain cycles
    pub drain_interval_secs: u64,
    /// Maximum delivery attempts per cycle
    pub batch_size: usize,
    pub base_backoff_secs: i64,
    pub max_backoff_exponent: u32,
    /// Give up on a scrobble after this many failures (unset: never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Give up on scrobbles older than this (unset: never)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 30,
            batch_size: 10,
            base_backoff_secs: 30,
            max_backoff_exponent: 5,
            max_retries: None,
            max_age_days: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            scrobble_threshold: 50,
            debug: false,
            data_dir: None,
            cleanup: CleanupConfig::default(),
            lastfm: LastFmConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;

        Ok(config_dir.join("lastfm_relay.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from file, or create default if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config file not found, creating default at {:?}", path);
            let default_config = Self::default();
            default_config.save_to(path)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content).context("Failed to write config file")?;

        log::info!("Config saved to {:?}", path);

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate scrobble threshold (should be 1-100%)
        if self.scrobble_threshold == 0 || self.scrobble_threshold > 100 {
            anyhow::bail!("scrobble_threshold must be between 1 and 100");
        }

        if self.queue.drain_interval_secs == 0 {
            anyhow::bail!("queue.drain_interval_secs must be greater than 0");
        }

        if self.queue.batch_size == 0 {
            anyhow::bail!("queue.batch_size must be greater than 0");
        }

        if self.queue.base_backoff_secs < 0 {
            anyhow::bail!("queue.base_backoff_secs must not be negative");
        }

        if self.retry.attempts == 0 {
            anyhow::bail!("retry.attempts must be greater than 0");
        }

        if self.lastfm.api_url.is_empty() {
            anyhow::bail!("lastfm.api_url must not be empty");
        }

        // Missing credentials only disable requests
        if self.lastfm.api_key.is_empty() || self.lastfm.api_secret.is_empty() {
            log::warn!("Last.fm api_key/api_secret not configured, scrobbling is inactive");
        }

        Ok(())
    }

    /// Directory holding the session and queue files
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_dir()
                .context("Failed to get data directory")?
                .join("lastfm-relay")),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            api_url: self.lastfm.api_url.clone(),
            auth_url: self.lastfm.auth_url.clone(),
            retry: RetryPolicy {
                attempts: self.retry.attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            batch_size: self.queue.batch_size,
            base_backoff_secs: self.queue.base_backoff_secs,
            max_backoff_exponent: self.queue.max_backoff_exponent,
            max_retries: self.queue.max_retries,
            max_age_secs: self
                .queue
                .max_age_days
                .map(|days| i64::from(days) * 24 * 60 * 60),
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.queue.drain_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.lastfm.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.lastfm.timeout_secs)
    }
}
