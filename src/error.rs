//! Error types for lepotato
//!
//! This module defines the error types used throughout the client,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for lepotato operations
///
/// Covers configuration problems, backend failures, stream decoding
/// failures and local storage errors.
#[derive(Error, Debug)]
pub enum LepotatoError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {message}")]
    Backend {
        /// HTTP status code returned by the backend
        status: u16,
        /// Response body or a short description of the failed call
        message: String,
    },

    /// The token stream could not be opened or read
    #[error("Stream error: {0}")]
    Stream(String),

    /// Local mirror or session storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// An operation needed an active chat and there was none
    #[error("No active chat")]
    NoActiveChat,

    /// A chat id was not found in the loaded list
    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite errors from the chat-list mirror
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for lepotato operations
///
/// Uses `anyhow::Error` so callers can attach context while domain
/// errors stay downcastable to [`LepotatoError`].
pub type Result<T> = anyhow::Result<T>;
