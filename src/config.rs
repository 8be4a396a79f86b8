//! Configuration file parser for `<config dir>/MorningPost/config.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchOptions;
use crate::storage::default_store_path;

const CONFIG_DIR_NAME: &str = "MorningPost";
const CONFIG_FILE_NAME: &str = "config.toml";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file too large: {0}")]
    TooLarge(String),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address for the HTTP front end that embeds this crate. Nothing here
    /// binds it; [`MorningPost::start`](crate::MorningPost::start) only logs it.
    pub listen_address: String,

    /// Articles per page of the reading list.
    pub page_size: usize,

    /// Per-request timeout for every feed fetch, in seconds.
    pub http_timeout_secs: u64,

    /// Largest feed or page body accepted, in bytes.
    pub max_feed_size_bytes: usize,

    /// Feed store location; the platform state directory when unset.
    pub store_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchOptions::default();
        Self {
            listen_address: "127.0.0.1:33000".to_string(),
            page_size: 10,
            http_timeout_secs: fetch.timeout.as_secs(),
            max_feed_size_bytes: fetch.max_bytes,
            store_path: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "listen_address",
        "page_size",
        "http_timeout_secs",
        "max_feed_size_bytes",
        "store_path",
    ];

    /// Default config file location, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| {
            dirs.config_dir()
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME)
        })
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Zero `page_size` or `http_timeout_secs` → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "{} is {} bytes (max {} bytes)",
                    path.display(),
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
        config.validate()?;
        tracing::info!(path = %path.display(), listen = %config.listen_address, "Loaded configuration");
        Ok(config)
    }

    /// Loads `path` if given, otherwise the default location, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "http_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Request limits derived from this configuration.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_bytes: self.max_feed_size_bytes,
        }
    }

    /// The configured store path, or the platform default.
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_path)
    }
}

// ============================================================================
// Tests
// ============================================================================
