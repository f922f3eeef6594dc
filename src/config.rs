//! Application configuration
//!
//! Loaded from TOML. Every section and field has a default, so a partial
//! file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub feed: FeedConfig,
    pub ui: UiConfig,
    pub output: OutputConfig,
}

/// Block format and scheduling depth, fixed for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Samples per second
    pub sample_rate: u32,
    /// Samples per block
    pub block_length: usize,
    /// Slots armed ahead of the play position (2 or 4)
    pub slot_count: usize,
    /// Always 1
    pub channels: u16,
    /// Feed queue capacity in blocks
    pub queue_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_length: DEFAULT_BLOCK_LENGTH,
            slot_count: DEFAULT_SLOT_COUNT,
            channels: DEFAULT_CHANNELS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PlaybackConfig {
    /// Wall-clock length of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_length as f64 / self.sample_rate as f64)
    }
}

/// Websocket feed connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    /// Delay before the second consecutive reconnect attempt
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            reconnect_initial_delay_ms: 50,
            reconnect_max_delay_ms: 2_000,
        }
    }
}

/// HTTP control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Output device selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name; the default output device when unset
    pub device: Option<String>,
    /// Use the wall-clock simulated output instead of hardware
    pub simulated: bool,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path` if given, else from the platform config directory,
    /// else fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Check invariants the scheduler relies on
    pub fn validate(&self) -> Result<()> {
        let p = &self.playback;
        if p.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if p.block_length == 0 {
            return Err(Error::Config("block_length must be positive".into()));
        }
        if p.slot_count != 2 && p.slot_count != 4 {
            return Err(Error::Config(format!(
                "slot_count must be 2 or 4, got {}",
                p.slot_count
            )));
        }
        if p.channels != 1 {
            return Err(Error::Config(format!(
                "only mono feeds are supported, got {} channels",
                p.channels
            )));
        }
        if p.queue_capacity < p.slot_count {
            return Err(Error::Config(format!(
                "queue_capacity ({}) must be at least slot_count ({})",
                p.queue_capacity, p.slot_count
            )));
        }
        if self.feed.reconnect_initial_delay_ms > self.feed.reconnect_max_delay_ms {
            return Err(Error::Config(
                "reconnect_initial_delay_ms exceeds reconnect_max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// `config.toml` in the platform configuration directory
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "gapless-stream-player")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.playback.sample_rate, 32_000);
        assert_eq!(config.playback.block_length, 1024);
        assert_eq!(config.playback.block_duration(), Duration::from_millis(32));
        assert_eq!(config.feed.url, "ws://127.0.0.1:9110");
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [playback]
            slot_count = 4

            [feed]
            url = "ws://10.0.0.2:9110"
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.slot_count, 4);
        assert_eq!(config.playback.block_length, DEFAULT_BLOCK_LENGTH);
        assert_eq!(config.feed.url, "ws://10.0.0.2:9110");
        assert!(config.ui.enabled);
    }

    #[test]
    fn test_rejects_bad_slot_count() {
        let err = AppConfig::from_toml("[playback]\nslot_count = 3\n").unwrap_err();
        assert!(err.to_string().contains("slot_count"));
    }

    #[test]
    fn test_rejects_stereo() {
        assert!(AppConfig::from_toml("[playback]\nchannels = 2\n").is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            AppConfig::from_toml("[playback\n"),
            Err(Error::Config(_))
        ));
    }
}
