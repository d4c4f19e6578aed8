//! Configuration management for lepotato
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{LepotatoError, Result};
use crate::types::DEFAULT_MAX_TOKENS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for lepotato
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Chat list behavior
    #[serde(default)]
    pub chat: ChatConfig,
    /// Local persisted state
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the chat backend
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds; for reply streams it bounds the wait for headers only
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Chat list behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Chats fetched per "more" page of the sidebar
    #[serde(default = "default_more_page_size")]
    pub more_page_size: usize,

    /// Context window assumed until the backend reports one
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u64,
}

fn default_more_page_size() -> usize {
    10
}

fn default_max_tokens() -> u64 {
    DEFAULT_MAX_TOKENS
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            more_page_size: default_more_page_size(),
            default_max_tokens: default_max_tokens(),
        }
    }
}

/// Local persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite chat-list mirror; defaults to the user data directory
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    /// Directory holding session token stats; defaults to the temp directory
    #[serde(default)]
    pub session_dir: Option<PathBuf>,

    /// Name of the current session
    #[serde(default = "default_session_name")]
    pub session_name: String,
}

fn default_session_name() -> String {
    "default".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            session_dir: None,
            session_name: default_session_name(),
        }
    }
}

impl StorageConfig {
    /// Session directory, falling back to `<tmp>/lepotato`
    pub fn session_dir(&self) -> PathBuf {
        self.session_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("lepotato"))
    }
}

impl Config {
    /// Load configuration from file, environment and CLI
    ///
    /// A missing file falls back to defaults. Environment variables are
    /// applied over the file and CLI flags over both.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command-line arguments
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LepotatoError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| LepotatoError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("LEPOTATO_BASE_URL") {
            self.backend.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("LEPOTATO_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.backend.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid LEPOTATO_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(page_size) = std::env::var("LEPOTATO_MORE_PAGE_SIZE") {
            if let Ok(value) = page_size.parse() {
                self.chat.more_page_size = value;
            } else {
                tracing::warn!("Invalid LEPOTATO_MORE_PAGE_SIZE: {}", page_size);
            }
        }

        if let Ok(cache_path) = std::env::var("LEPOTATO_CACHE_PATH") {
            self.storage.cache_path = Some(PathBuf::from(cache_path));
        }

        if let Ok(session) = std::env::var("LEPOTATO_SESSION") {
            self.storage.session_name = session;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(base_url) = &cli.base_url {
            self.backend.base_url = base_url.clone();
        }

        if let Some(session) = &cli.session {
            self.storage.session_name = session.clone();
        }

        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.backend.base_url).map_err(|e| {
            LepotatoError::Config(format!(
                "Invalid backend base_url {}: {}",
                self.backend.base_url, e
            ))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(LepotatoError::Config(format!(
                "backend base_url must use http or https, got {}",
                url.scheme()
            ))
            .into());
        }

        if self.backend.timeout_seconds == 0 {
            return Err(
                LepotatoError::Config("timeout_seconds must be greater than 0".to_string()).into(),
            );
        }

        if self.chat.more_page_size == 0 || self.chat.more_page_size > 100 {
            return Err(LepotatoError::Config(
                "more_page_size must be between 1 and 100".to_string(),
            )
            .into());
        }

        if self.chat.default_max_tokens == 0 {
            return Err(LepotatoError::Config(
                "default_max_tokens must be greater than 0".to_string(),
            )
            .into());
        }

        if self.storage.session_name.trim().is_empty() {
            return Err(
                LepotatoError::Config("session_name cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }
}
