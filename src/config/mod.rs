//! Configuration management for mongo-transfer
//!
//! Configuration is loaded from a TOML file and then overridden by
//! command-line arguments. Every field has a default, so an empty or missing
//! file yields a usable configuration.
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Highest zstd level usable without the long-window "ultra" mode.
pub const MAX_COMPRESSION_LEVEL: i32 = 19;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Engine tuning
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Working directories
    #[serde(default)]
    pub paths: PathsConfig,

    /// Upload acceptance rules
    #[serde(default)]
    pub upload: UploadConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection and server selection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Number of retry attempts on connection failure
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Maximum pool size
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Minimum pool size
    #[serde(default = "default_min_pool_size")]
    pub min_pool_size: u32,

    /// Connection idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Documents per write batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// zstd level used when packing archives
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Extended JSON flavour used for document files
    #[serde(default)]
    pub json_mode: JsonMode,

    /// Show a progress bar over collections
    #[serde(default)]
    pub show_progress: bool,
}

/// Extended JSON flavour for document and index files
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JsonMode {
    /// Lossless: every numeric type is wrapped (`{"$numberInt": "1"}`)
    #[default]
    Canonical,

    /// Readable: numbers are plain JSON where possible
    Relaxed,
}

/// Working directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where finished archives are written
    #[serde(default = "default_exports_dir")]
    pub exports_dir: PathBuf,

    /// Where uploads are staged before import
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    /// Parent of per-run scratch directories
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

/// Upload acceptance rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted upload in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_size_bytes: u64,

    /// Accepted file name suffixes (lowercase, with leading dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_max_pool_size() -> u32 {
    10
}

fn default_min_pool_size() -> u32 {
    0
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_app_name() -> String {
    "mongo-transfer".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_compression_level() -> i32 {
    MAX_COMPRESSION_LEVEL
}

fn default_exports_dir() -> PathBuf {
    PathBuf::from("./exports")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_upload_size() -> u64 {
    100 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    [".tar.zst", ".tzst", ".json", ".bson"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            max_pool_size: default_max_pool_size(),
            min_pool_size: default_min_pool_size(),
            idle_timeout: default_idle_timeout(),
            app_name: default_app_name(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            compression_level: default_compression_level(),
            json_mode: JsonMode::default(),
            show_progress: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            exports_dir: default_exports_dir(),
            uploads_dir: default_uploads_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_upload_size(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::InvalidFormat(format!("{}: {}", path.display(), e))
            }
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from an explicit path, or the default path.
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongo-transfer")
            .join("config.toml")
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.transfer.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transfer.batch_size".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if !(1..=MAX_COMPRESSION_LEVEL).contains(&self.transfer.compression_level) {
            return Err(ConfigError::InvalidValue {
                field: "transfer.compression_level".to_string(),
                value: self.transfer.compression_level.to_string(),
            }
            .into());
        }

        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "upload.allowed_extensions".to_string(),
                value: "[]".to_string(),
            }
            .into());
        }

        if self.connection.timeout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection.timeout".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Get connection timeout as Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.timeout)
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transfer.batch_size, 100);
        assert_eq!(config.transfer.compression_level, MAX_COMPRESSION_LEVEL);
        assert_eq!(config.transfer.json_mode, JsonMode::Canonical);
        assert_eq!(config.upload.max_size_bytes, 100 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [transfer]
            batch_size = 500
            json_mode = "relaxed"

            [paths]
            exports_dir = "/var/backups"
            "#,
        )
        .unwrap();

        assert_eq!(config.transfer.batch_size, 500);
        assert_eq!(config.transfer.json_mode, JsonMode::Relaxed);
        assert_eq!(config.paths.exports_dir, PathBuf::from("/var/backups"));
        assert_eq!(config.paths.temp_dir, PathBuf::from("./temp"));
        assert_eq!(config.connection.timeout, 30);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.transfer.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_compression_out_of_range() {
        let mut config = Config::default();
        config.transfer.compression_level = 22;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::from_file("/nonexistent/mongo-transfer.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.transfer.batch_size, config.transfer.batch_size);
        assert_eq!(parsed.upload.allowed_extensions, config.upload.allowed_extensions);
    }

    #[test]
    fn test_connection_timeout() {
        let config = Config::default();
        assert_eq!(config.connection_timeout(), Duration::from_secs(30));
    }
}
