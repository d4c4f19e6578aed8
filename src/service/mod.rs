//! Backend access for the chat client
//!
//! [`ChatBackend`] is the seam between the [`ChatStore`](crate::store::ChatStore)
//! and the HTTP API. [`HttpChatService`] is the production implementation;
//! a `FakeBackend` exists for unit tests.
//!
//! Failure policy follows the calls' roles: listing, transcript fetches,
//! context stats and reordering fail soft (logged, safe default returned),
//! while creating, deleting, saving and opening a stream return errors for
//! the caller to react to.

pub mod http;
pub mod stream;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpChatService;
pub use stream::{ChatStream, LineDecoder, StreamChunk, StreamLine};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{Chat, ChatPage, ContextStats, Message};

/// Size of the first page of the chat list, whatever limit is asked for
pub const INITIAL_PAGE_SIZE: usize = 3;

/// Operations the client needs from the chat backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// List chats, most recently active first
    ///
    /// An `offset` of 0 always fetches [`INITIAL_PAGE_SIZE`] chats. Failures
    /// yield an empty page with a total of 0.
    async fn get_chats(&self, limit: usize, offset: usize) -> ChatPage;

    /// Fetch the persisted transcript of one chat, `None` on failure
    async fn get_chat(&self, chat_id: &str) -> Option<Chat>;

    /// Create a chat on the backend and mirror it locally
    async fn create_chat(&self) -> Result<Chat>;

    /// Delete one chat
    async fn delete_chat(&self, chat_id: &str) -> Result<()>;

    /// Delete every chat
    async fn delete_all_chats(&self) -> Result<()>;

    /// Rename a chat in the local mirror
    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()>;

    /// Persist a transcript
    async fn save_chat(&self, chat_id: &str, messages: &[Message]) -> Result<()>;

    /// Move a chat to the top of the backend's ordering; fails soft
    async fn update_chat_position(&self, chat_id: &str);

    /// Context usage of a chat; defaults on failure
    async fn get_total_context(&self, chat_id: &str) -> ContextStats;

    /// Send a user message and open the reply stream
    async fn open_stream(
        &self,
        chat_id: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> Result<ChatStream>;
}
