//! Configuration file parser for ~/.config/feedpipe/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! Environment variables override file values:
//!
//! | Variable                          | Field                     |
//! |-----------------------------------|---------------------------|
//! | `FEEDPIPE_REFRESH_INTERVAL_SECS`  | `refresh_interval_secs`   |
//! | `FEEDPIPE_MIN_REFRESH_DELAY_SECS` | `min_refresh_delay_secs`  |
//! | `FEEDPIPE_REQUEST_TIMEOUT_MS`     | `request_timeout_ms`      |
//! | `FEEDPIPE_DATABASE`               | `database_path`           |
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level pipeline configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. `None` means `<config dir>/feeds.db`.
    pub database_path: Option<PathBuf>,

    /// Seconds between scheduled refresh cycles.
    pub refresh_interval_secs: u64,

    /// Feeds refreshed more recently than this are skipped by a cycle.
    pub min_refresh_delay_secs: u64,

    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,

    /// Maximum feed document size in bytes.
    pub max_feed_bytes: usize,

    /// Maximum icon size in bytes.
    pub max_icon_bytes: usize,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            refresh_interval_secs: 900,
            min_refresh_delay_secs: 600,
            request_timeout_ms: 5000,
            max_feed_bytes: 10 * 1024 * 1024,
            max_icon_bytes: 1024 * 1024,
            user_agent: concat!("feedpipe/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_path",
        "refresh_interval_secs",
        "min_refresh_delay_secs",
        "request_timeout_ms",
        "max_feed_bytes",
        "max_icon_bytes",
        "user_agent",
    ];

    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// - Missing file → defaults
    /// - Empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            interval_secs = config.refresh_interval_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Applies `FEEDPIPE_*` overrides. `lookup` is injectable for tests.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FEEDPIPE_REFRESH_INTERVAL_SECS") {
            self.refresh_interval_secs = parse_env("FEEDPIPE_REFRESH_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("FEEDPIPE_MIN_REFRESH_DELAY_SECS") {
            self.min_refresh_delay_secs = parse_env("FEEDPIPE_MIN_REFRESH_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("FEEDPIPE_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env("FEEDPIPE_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("FEEDPIPE_DATABASE") {
            if !v.trim().is_empty() {
                self.database_path = Some(PathBuf::from(v));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "refresh_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn min_refresh_delay(&self) -> Duration {
        Duration::from_secs(self.min_refresh_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_env(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key,
            reason: format!("{value:?}: {e}"),
        })
}

// ============================================================================
// Tests
// ============================================================================
