//! Configuration management for the Filebridge server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filebridge/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind must be a socket address like 0.0.0.0:8000, got {0}")]
    InvalidBind(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("default_user must be a single path component, got {0:?}")]
    InvalidDefaultUser(String),

    #[error("remote port must be non-zero")]
    InvalidPort,

    #[error("connect_timeout must be between 1 and 300 seconds, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("chunk_size must be between {min} and {max} bytes, got {value}")]
    InvalidChunkSize { value: usize, min: usize, max: usize },

    #[error("max_upload_size must be greater than 0, got {0}")]
    InvalidMaxUploadSize(u64),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Smallest accepted streaming chunk (4 KiB).
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest accepted streaming chunk (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure for the Filebridge server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener and identity settings.
    pub server: ServerConfig,

    /// Local storage settings.
    pub storage: StorageConfig,

    /// Remote (SFTP) host settings.
    pub remote: RemoteConfig,

    /// Streaming and upload settings.
    pub transfer: TransferConfig,
}

/// HTTP listener and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional log file, rotated daily. Empty logs to stderr only.
    pub log_file: String,

    /// User assumed when the identity header is absent.
    pub default_user: String,

    /// Request header carrying the authenticated user, set by a fronting proxy.
    /// Empty disables header lookup.
    pub identity_header: String,
}

/// Local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per user. A leading `~` is expanded.
    pub root: PathBuf,

    /// Hide dotfiles in listings unless the request says otherwise.
    pub hide_dotfiles: bool,
}

/// Remote (SFTP) host settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Hosts listed under `/servers/`.
    pub hosts: Vec<String>,

    /// SSH port used when a host has none.
    pub port: u16,

    /// Login name on remote hosts.
    pub username: String,

    /// Private key used for authentication.
    pub identity_file: PathBuf,

    /// Known hosts file for trust-on-first-use host key checks.
    pub known_hosts: PathBuf,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,
}

/// Streaming and upload settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Body chunk size for file responses in bytes (default: 1MB).
    pub chunk_size: usize,

    /// `Cache-Control` max-age for whole-file responses in seconds.
    pub cache_max_age: u64,

    /// Largest accepted upload per file in bytes (default: 4GB).
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            log_level: "info".to_string(),
            log_file: String::new(),
            default_user: "test".to_string(),
            identity_header: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~"),
            hide_dotfiles: false,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1".to_string()],
            port: 22,
            username: default_username(),
            identity_file: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
                .join("id_ed25519"),
            known_hosts: default_data_dir().join("known_hosts"),
            connect_timeout: 10,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,         // 1MB
            cache_max_age: 43200,            // 12 hours
            max_upload_size: 4 * 1024 * 1024 * 1024, // 4GB
        }
    }
}

impl StorageConfig {
    /// Storage root with a leading `~` expanded to the home directory.
    pub fn resolved_root(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filebridge")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filebridge")
}

/// Returns the login name of the current user.
fn default_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Expand a leading `~` component to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEBRIDGE_BIND: Override the listen address
    /// - FILEBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEBRIDGE_ROOT: Override the storage root
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("FILEBRIDGE_BIND") {
            if !bind.is_empty() {
                tracing::info!(bind = %bind, "Overriding bind address from environment");
                self.server.bind = bind;
            }
        }

        if let Ok(level) = std::env::var("FILEBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!(level = %level, "Overriding log_level from environment");
                self.server.log_level = level;
            }
        }

        if let Ok(root) = std::env::var("FILEBRIDGE_ROOT") {
            if !root.is_empty() {
                tracing::info!(root = %root, "Overriding storage root from environment");
                self.storage.root = PathBuf::from(root);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBind(self.server.bind.clone()));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        let user = &self.server.default_user;
        if user.is_empty() || user == "." || user == ".." || user.contains('/') || user == "servers" {
            return Err(ConfigError::InvalidDefaultUser(user.clone()));
        }

        if self.remote.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.remote.connect_timeout == 0 || self.remote.connect_timeout > 300 {
            return Err(ConfigError::InvalidConnectTimeout(self.remote.connect_timeout));
        }

        let chunk = self.transfer.chunk_size;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk) {
            return Err(ConfigError::InvalidChunkSize {
                value: chunk,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            });
        }

        if self.transfer.max_upload_size == 0 {
            return Err(ConfigError::InvalidMaxUploadSize(self.transfer.max_upload_size));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
