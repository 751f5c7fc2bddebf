//! Configuration file parser for `~/.config/feedsync/config.toml`.
//!
//! The config file is optional: a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged as warnings,
//! since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::storage::UpsertOptions;
use crate::sync::DownloaderSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message store location. `None` means `<config dir>/feedsync.db`.
    pub database_path: Option<PathBuf>,

    /// Store each feed's batch in a single transaction.
    pub use_transactions: bool,

    /// Replace feed-provided creation dates that lie in the future.
    pub fix_future_dates: bool,

    /// Do not treat changed contents alone as a reason to update a message.
    pub ignore_contents_changes: bool,

    /// Upper bound for fetching a single feed, in seconds.
    pub feed_fetch_timeout_secs: u64,

    /// Feeds listed in the end-of-run overview before "+ K other feeds".
    pub results_overview_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            use_transactions: true,
            fix_future_dates: false,
            ignore_contents_changes: false,
            feed_fetch_timeout_secs: 30,
            results_overview_count: 10,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "use_transactions",
        "fix_future_dates",
        "ignore_contents_changes",
        "feed_fetch_timeout_secs",
        "results_overview_count",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a corrupted file cannot exhaust memory.
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
                // Deleted between metadata and read
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
            use_transactions = config.use_transactions,
            timeout_secs = config.feed_fetch_timeout_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn feed_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_fetch_timeout_secs)
    }

    /// Downloader knobs derived from this configuration.
    pub fn downloader_settings(&self) -> DownloaderSettings {
        DownloaderSettings {
            fix_future_dates: self.fix_future_dates,
            feed_fetch_timeout: self.feed_fetch_timeout(),
            upsert: UpsertOptions {
                use_transactions: self.use_transactions,
                ignore_contents_changes: self.ignore_contents_changes,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
