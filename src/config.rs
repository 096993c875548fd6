//! Configuration module for Stowage.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, StowageError};

/// Physical storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage root; every physical path is derived from it.
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Per-owner directory holding the file tree.
    #[serde(default = "default_files_dir")]
    pub files_dir: String,
    /// Per-owner directory holding derived thumbnails.
    #[serde(default = "default_thumbnails_dir")]
    pub thumbnails_dir: String,
    /// Per-owner directory holding in-flight uploads.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    /// Quota assigned to new accounts when none is given.
    #[serde(default = "default_quota_bytes")]
    pub default_quota_bytes: i64,
    /// Read buffer size for reader-based uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_storage_root() -> String {
    "data/storage".to_string()
}

fn default_files_dir() -> String {
    "files".to_string()
}

fn default_thumbnails_dir() -> String {
    "thumbnails".to_string()
}

fn default_staging_dir() -> String {
    ".staging".to_string()
}

fn default_quota_bytes() -> i64 {
    1024 * 1024 * 1024 // 1GiB
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            files_dir: default_files_dir(),
            thumbnails_dir: default_thumbnails_dir(),
            staging_dir: default_staging_dir(),
            default_quota_bytes: default_quota_bytes(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/stowage.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Thumbnail generation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Whether image uploads get derived thumbnails.
    #[serde(default = "default_thumbnails_enabled")]
    pub enabled: bool,
}

fn default_thumbnails_enabled() -> bool {
    true
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: default_thumbnails_enabled(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "data/logs/stowage.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Physical storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Thumbnail configuration.
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StowageError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STOWAGE_STORAGE_ROOT`: Override the storage root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("STOWAGE_STORAGE_ROOT") {
            if !root.is_empty() {
                self.storage.root = root;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.storage.root.trim().is_empty() {
            return Err(StowageError::Config("storage.root must not be empty".into()));
        }
        if self.storage.chunk_size == 0 {
            return Err(StowageError::Config(
                "storage.chunk_size must be greater than zero".into(),
            ));
        }
        if self.storage.default_quota_bytes < 0 {
            return Err(StowageError::Config(
                "storage.default_quota_bytes must not be negative".into(),
            ));
        }
        let layout = [
            ("files_dir", &self.storage.files_dir),
            ("thumbnails_dir", &self.storage.thumbnails_dir),
            ("staging_dir", &self.storage.staging_dir),
        ];
        for (key, dir) in layout {
            if dir.is_empty()
                || dir == "."
                || dir == ".."
                || dir.contains('/')
                || dir.contains('\\')
            {
                return Err(StowageError::Config(format!(
                    "storage.{key} must be a single path segment"
                )));
            }
        }
        for (i, (key, dir)) in layout.iter().enumerate() {
            if let Some((other, _)) = layout[i + 1..].iter().find(|(_, d)| d == dir) {
                return Err(StowageError::Config(format!(
                    "storage.{key} and storage.{other} must differ"
                )));
            }
        }
        Ok(())
    }
}
