//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/docstore/config.toml`. None of
//! this governs document/collection semantics (there is no schema to
//! configure); it only tunes the connection the database handle opens.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Deserialize, Default)]
pub struct EngineConfig {
    /// Path to the SQLite database file. Defaults to the XDG data
    /// directory when absent.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Connection tuning.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-level tuning knobs, applied as PRAGMAs on open.
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Milliseconds SQLite will retry before returning `SQLITE_BUSY`.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// SQLite page cache size, in KiB (negative `cache_size` pragma units).
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,

    /// Default page size used by offset/cursor pagination helpers when the
    /// caller does not specify one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            cache_size_kib: default_cache_size_kib(),
            default_page_size: default_page_size(),
        }
    }
}

fn default_busy_timeout_ms() -> u32 {
    5_000
}

fn default_cache_size_kib() -> u32 {
    64_000
}

fn default_page_size() -> u32 {
    100
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of rotated log files to keep.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl EngineConfig {
    /// Load configuration from the default path, falling back to defaults
    /// when no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!(path = %config_path.display(), "no config file found, using defaults");
            return Ok(EngineConfig::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docstore")
            .join("config.toml")
    }

    /// Returns the default data directory (for the SQLite database file).
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docstore")
    }

    /// Returns the default state directory (for log files).
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docstore")
    }

    /// Returns the database file path this config resolves to.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("data.db"))
    }

    /// Returns the log file path.
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("docstore.log")
    }
}
