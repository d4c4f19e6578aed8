//! lepotato - terminal client for a streaming chat backend
//!
//! This library provides the core of the client: the HTTP service that
//! talks to the backend, the token stream decoder, and the state store
//! that keeps the chat list, the active transcript and per-chat token
//! stats in sync while replies stream in.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `service`: backend trait, HTTP implementation and stream decoding
//! - `store`: chat state, send/stream/persist cycle, change events
//! - `storage`: SQLite chat-list mirror and session token stats
//! - `types`: chats, messages and token stats
//! - `view`: terminal rendering of the store's state
//! - `commands`: interactive front-end and one-shot commands
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lepotato::{ChatStore, Config, HttpChatService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let service = HttpChatService::new(&config.backend)?;
//!     let store = ChatStore::new(Arc::new(service));
//!     store.load_chats().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod store;
pub mod types;
pub mod view;

// Re-export commonly used types
pub use config::Config;
pub use error::{LepotatoError, Result};
pub use service::{ChatBackend, HttpChatService};
pub use store::{ChatStore, StoreEvent};
pub use types::{Chat, Message, Role, TokenStats};

#[cfg(test)]
pub mod test_utils;
