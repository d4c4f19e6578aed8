//! Chat state store
//!
//! [`ChatStore`] owns everything the UI shows: the chat list, the active
//! chat, the loading and streaming flags and the per-chat token stats. It
//! drives the send/stream/persist cycle against a [`ChatBackend`] and
//! broadcasts a [`StoreEvent`] whenever observable state changes.
//!
//! State sits behind a `std::sync::Mutex` that is never held across an
//! await, so the store can be shared in an `Arc` and
//! [`ChatStore::stop_streaming`] can be called from another task while
//! [`ChatStore::send_message`] is suspended on the network.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use lepotato::config::BackendConfig;
//! use lepotato::service::HttpChatService;
//! use lepotato::store::ChatStore;
//!
//! # async fn example() -> lepotato::error::Result<()> {
//! let service = HttpChatService::new(&BackendConfig::default())?;
//! let store = Arc::new(ChatStore::new(Arc::new(service)));
//! store.load_chats().await;
//! store.send_message("Hello").await?;
//! println!("{:?}", store.token_stats());
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{LepotatoError, Result};
use crate::service::{ChatBackend, StreamChunk, INITIAL_PAGE_SIZE};
use crate::storage::session::TokenStatsMap;
use crate::storage::SessionStatsStore;
use crate::types::{Chat, Message, Role, TokenStats, TokenStatsUpdate, DEFAULT_MAX_TOKENS};

const EVENT_CAPACITY: usize = 256;
const DEFAULT_MORE_PAGE_SIZE: usize = 10;

/// Change notifications for UI consumers
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The chat list, its order, titles or transcripts changed
    ChatsChanged,
    /// A different chat became active
    ActiveChatChanged(Option<String>),
    /// The streaming assistant message has new text
    ContentUpdated {
        chat_id: String,
        message_id: String,
        content: String,
    },
    /// Token stats of a chat changed
    StatsUpdated { chat_id: String, stats: TokenStats },
    /// A stream started or ended
    StreamingChanged(bool),
    /// A list fetch started or ended
    LoadingChanged(bool),
}

struct ActiveStream {
    id: u64,
    cancel: CancellationToken,
}

struct StoreState {
    chats: Vec<Chat>,
    current_chat_id: Option<String>,
    total_chats: usize,
    is_loading: bool,
    active_stream: Option<ActiveStream>,
    next_stream_id: u64,
    token_stats: TokenStatsMap,
}

impl StoreState {
    fn chat_mut(&mut self, chat_id: &str) -> Option<&mut Chat> {
        self.chats.iter_mut().find(|c| c.id == chat_id)
    }

    fn move_to_top(&mut self, chat_id: &str) -> bool {
        match self.chats.iter().position(|c| c.id == chat_id) {
            Some(0) => false,
            Some(index) => {
                let chat = self.chats.remove(index);
                self.chats.insert(0, chat);
                true
            }
            None => false,
        }
    }
}

/// State store for the chat client
pub struct ChatStore {
    backend: Arc<dyn ChatBackend>,
    state: Mutex<StoreState>,
    events: broadcast::Sender<StoreEvent>,
    session: Option<SessionStatsStore>,
    more_page_size: usize,
    initial_stats: TokenStats,
}

impl std::fmt::Debug for ChatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ChatStore")
            .field("chats", &state.chats.len())
            .field("current_chat_id", &state.current_chat_id)
            .field("streaming", &state.active_stream.is_some())
            .finish_non_exhaustive()
    }
}

impl ChatStore {
    /// Create an empty store on top of `backend`
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            state: Mutex::new(StoreState {
                chats: Vec::new(),
                current_chat_id: None,
                total_chats: 0,
                is_loading: false,
                active_stream: None,
                next_stream_id: 0,
                token_stats: TokenStatsMap::new(),
            }),
            events,
            session: None,
            more_page_size: DEFAULT_MORE_PAGE_SIZE,
            initial_stats: TokenStats::default(),
        }
    }

    /// Restore token stats from `session` and keep it updated
    ///
    /// An unreadable session file is logged and ignored.
    pub fn with_session(mut self, session: SessionStatsStore) -> Self {
        match session.load() {
            Ok(map) => {
                tracing::debug!("Restored token stats for {} chats", map.len());
                self.state_mut().token_stats = map;
            }
            Err(e) => tracing::warn!("Ignoring unreadable session stats: {}", e),
        }
        self.session = Some(session);
        self
    }

    /// Page size used by [`ChatStore::load_more_chats`]
    pub fn with_more_page_size(mut self, size: usize) -> Self {
        self.more_page_size = size.max(1);
        self
    }

    /// Context window reported for chats without stats
    pub fn with_default_max_tokens(mut self, max_tokens: u64) -> Self {
        self.initial_stats.max_tokens = if max_tokens == 0 {
            DEFAULT_MAX_TOKENS
        } else {
            max_tokens
        };
        self
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&mut self) -> &mut StoreState {
        self.state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn persist_stats(&self, map: &TokenStatsMap) {
        if let Some(session) = &self.session {
            if let Err(e) = session.save(map) {
                tracing::warn!("Failed to persist token stats: {}", e);
            }
        }
    }

    /// Receive every [`StoreEvent`] emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the loaded chats, most recently active first
    pub fn chats(&self) -> Vec<Chat> {
        self.state().chats.clone()
    }

    /// Snapshot of the active chat
    pub fn current_chat(&self) -> Option<Chat> {
        let state = self.state();
        let id = state.current_chat_id.as_deref()?;
        state.chats.iter().find(|c| c.id == id).cloned()
    }

    /// Id of the active chat
    pub fn current_chat_id(&self) -> Option<String> {
        self.state().current_chat_id.clone()
    }

    /// Number of chats the backend holds
    pub fn total_chats(&self) -> usize {
        self.state().total_chats
    }

    /// Whether more chats exist than are loaded
    pub fn has_more(&self) -> bool {
        let state = self.state();
        state.chats.len() < state.total_chats
    }

    /// Whether a list fetch is in progress
    pub fn is_loading(&self) -> bool {
        self.state().is_loading
    }

    /// Whether a reply is streaming
    pub fn is_streaming(&self) -> bool {
        self.state().active_stream.is_some()
    }

    /// Token stats of the active chat, initial stats when none
    pub fn token_stats(&self) -> TokenStats {
        match self.current_chat_id() {
            Some(id) => self.token_stats_for(&id),
            None => self.initial_stats,
        }
    }

    /// Token stats of `chat_id`, initial stats when unknown
    pub fn token_stats_for(&self, chat_id: &str) -> TokenStats {
        self.state()
            .token_stats
            .get(chat_id)
            .copied()
            .unwrap_or(self.initial_stats)
    }

    /// Fetch the first page of chats
    ///
    /// Selects the first chat when none is active or the active one is no
    /// longer listed.
    pub async fn load_chats(&self) {
        self.set_loading(true);

        let page = self.backend.get_chats(INITIAL_PAGE_SIZE, 0).await;

        let active_changed = {
            let mut state = self.state();
            state.chats = page.chats;
            state.total_chats = page.total;

            let still_listed = state
                .current_chat_id
                .as_deref()
                .is_some_and(|id| state.chats.iter().any(|c| c.id == id));
            if still_listed {
                None
            } else {
                state.current_chat_id = state.chats.first().map(|c| c.id.clone());
                Some(state.current_chat_id.clone())
            }
        };

        tracing::info!("Loaded {} of {} chats", self.state().chats.len(), page.total);
        self.emit(StoreEvent::ChatsChanged);
        if let Some(active) = active_changed {
            self.emit(StoreEvent::ActiveChatChanged(active));
        }
        self.set_loading(false);
    }

    /// Fetch the next page of chats and append it
    ///
    /// Returns the number of chats added. Nothing is fetched when every
    /// chat is already loaded.
    pub async fn load_more_chats(&self) -> usize {
        let offset = {
            let state = self.state();
            if state.chats.len() >= state.total_chats {
                return 0;
            }
            state.chats.len()
        };

        self.set_loading(true);
        let page = self.backend.get_chats(self.more_page_size, offset).await;

        let added = {
            let mut state = self.state();
            let mut added = 0;
            for chat in page.chats {
                if !state.chats.iter().any(|c| c.id == chat.id) {
                    state.chats.push(chat);
                    added += 1;
                }
            }
            if added > 0 || page.total > 0 {
                state.total_chats = page.total;
            }
            added
        };

        tracing::debug!("Loaded {} more chats at offset {}", added, offset);
        if added > 0 {
            self.emit(StoreEvent::ChatsChanged);
        }
        self.set_loading(false);
        added
    }

    fn set_loading(&self, loading: bool) {
        self.state().is_loading = loading;
        self.emit(StoreEvent::LoadingChanged(loading));
    }

    /// Create a chat, put it first and make it active
    ///
    /// # Errors
    ///
    /// Returns the backend error if the chat could not be created
    pub async fn create_chat(&self) -> Result<Chat> {
        let chat = self.backend.create_chat().await?;

        {
            let mut state = self.state();
            state.chats.insert(0, chat.clone());
            state.current_chat_id = Some(chat.id.clone());
            state.total_chats += 1;
        }

        self.emit(StoreEvent::ChatsChanged);
        self.emit(StoreEvent::ActiveChatChanged(Some(chat.id.clone())));
        Ok(chat)
    }

    /// Make a loaded chat active
    ///
    /// # Errors
    ///
    /// Returns [`LepotatoError::ChatNotFound`] if the chat is not loaded
    pub fn select_chat(&self, chat_id: &str) -> Result<()> {
        {
            let mut state = self.state();
            if !state.chats.iter().any(|c| c.id == chat_id) {
                return Err(LepotatoError::ChatNotFound(chat_id.to_string()).into());
            }
            state.current_chat_id = Some(chat_id.to_string());
        }
        self.emit(StoreEvent::ActiveChatChanged(Some(chat_id.to_string())));
        Ok(())
    }

    /// Move a chat to the front of the list
    pub fn move_chat_to_top(&self, chat_id: &str) {
        if self.state().move_to_top(chat_id) {
            self.emit(StoreEvent::ChatsChanged);
        }
    }

    /// Delete a chat everywhere
    ///
    /// When the active chat is deleted, the first remaining chat becomes
    /// active.
    ///
    /// # Errors
    ///
    /// Returns the backend error; local state is untouched in that case
    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.backend.delete_chat(chat_id).await?;

        let (stats, active_changed) = {
            let mut state = self.state();
            let before = state.chats.len();
            state.chats.retain(|c| c.id != chat_id);
            if state.chats.len() < before {
                state.total_chats = state.total_chats.saturating_sub(1);
            }
            state.token_stats.remove(chat_id);

            let active_changed = if state.current_chat_id.as_deref() == Some(chat_id) {
                state.current_chat_id = state.chats.first().map(|c| c.id.clone());
                Some(state.current_chat_id.clone())
            } else {
                None
            };
            (state.token_stats.clone(), active_changed)
        };

        self.persist_stats(&stats);
        self.emit(StoreEvent::ChatsChanged);
        if let Some(active) = active_changed {
            self.emit(StoreEvent::ActiveChatChanged(active));
        }
        Ok(())
    }

    /// Rename a chat in the list, the active chat and the local mirror
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror could not be updated
    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()> {
        self.backend.rename_chat(chat_id, title).await?;
        self.rename_local(chat_id, title);
        Ok(())
    }

    fn rename_local(&self, chat_id: &str, title: &str) {
        let renamed = match self.state().chat_mut(chat_id) {
            Some(chat) => {
                chat.title = title.to_string();
                true
            }
            None => false,
        };
        if renamed {
            self.emit(StoreEvent::ChatsChanged);
        }
    }

    /// Delete every chat and reset the list and stats
    ///
    /// # Errors
    ///
    /// Returns the backend error; local state is untouched in that case
    pub async fn clear_all_chats(&self) -> Result<()> {
        self.backend.delete_all_chats().await?;

        {
            let mut state = self.state();
            state.chats.clear();
            state.current_chat_id = None;
            state.total_chats = 0;
            state.token_stats.clear();
        }

        self.persist_stats(&TokenStatsMap::new());
        self.emit(StoreEvent::ChatsChanged);
        self.emit(StoreEvent::ActiveChatChanged(None));
        Ok(())
    }

    /// Merge `update` into the stats of `chat_id` and persist the map
    ///
    /// A title in the update renames the chat.
    pub async fn update_token_stats(&self, chat_id: &str, update: TokenStatsUpdate) {
        let stats = self.apply_stats(chat_id, &update);
        if let Some(stats) = stats {
            self.emit(StoreEvent::StatsUpdated {
                chat_id: chat_id.to_string(),
                stats,
            });
        }

        if let Some(title) = &update.title {
            if let Err(e) = self.backend.rename_chat(chat_id, title).await {
                tracing::warn!("Failed to mirror generated title for {}: {}", chat_id, e);
            }
            self.rename_local(chat_id, title);
        }
    }

    fn apply_stats(&self, chat_id: &str, update: &TokenStatsUpdate) -> Option<TokenStats> {
        if update.total_tokens.is_none()
            && update.max_tokens.is_none()
            && update.tokens_per_second.is_none()
        {
            return None;
        }

        let (stats, map) = {
            let mut state = self.state();
            let initial = self.initial_stats;
            let entry = state
                .token_stats
                .entry(chat_id.to_string())
                .or_insert(initial);
            entry.apply(update);
            (*entry, state.token_stats.clone())
        };

        self.persist_stats(&map);
        Some(stats)
    }

    /// Cancel the in-flight stream
    ///
    /// Partial content stays in the transcript and no final re-fetch
    /// happens. Does nothing when no stream is running.
    pub fn stop_streaming(&self) {
        let stopped = match self.state().active_stream.take() {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        };

        if stopped {
            tracing::info!("Stopped streaming");
            self.emit(StoreEvent::StreamingChanged(false));
        }
    }

    /// Send `content` on the active chat and stream the reply into it
    ///
    /// Does nothing when no chat is active or a reply is already
    /// streaming. The user message and an empty assistant message are
    /// appended before the request goes out; the assistant message is then
    /// filled chunk by chunk. After a complete stream the transcript is
    /// reconciled with the backend, context stats are refreshed and the
    /// chat is moved to the top on the backend.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the cycle early. The streaming flag
    /// is cleared and partial content is kept either way. A stop through
    /// [`ChatStore::stop_streaming`] is not an error.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let Some((chat_id, user_message, assistant_id, stream_id, cancel)) =
            self.begin_stream(content)
        else {
            return Ok(());
        };

        self.emit(StoreEvent::StreamingChanged(true));
        self.emit(StoreEvent::ChatsChanged);

        let result = self
            .run_stream(&chat_id, &user_message, &assistant_id, &cancel)
            .await;
        if let Err(e) = &result {
            tracing::error!("Error in chat stream for {}: {}", chat_id, e);
        }

        self.finish_stream(stream_id);
        result
    }

    fn begin_stream(
        &self,
        content: &str,
    ) -> Option<(String, Message, String, u64, CancellationToken)> {
        let mut state = self.state();

        let Some(chat_id) = state.current_chat_id.clone() else {
            tracing::debug!("No active chat, message not sent");
            return None;
        };
        if state.active_stream.is_some() {
            tracing::warn!("A reply is already streaming, message not sent");
            return None;
        }

        let user_message = Message::user(content);
        let assistant = Message::assistant_placeholder();
        let assistant_id = assistant.id.clone();

        let Some(chat) = state.chat_mut(&chat_id) else {
            tracing::warn!("Active chat {} is not loaded, message not sent", chat_id);
            return None;
        };
        chat.messages.push(user_message.clone());
        chat.messages.push(assistant);
        chat.updated_at = Utc::now();
        state.move_to_top(&chat_id);

        let cancel = CancellationToken::new();
        let stream_id = state.next_stream_id;
        state.next_stream_id += 1;
        state.active_stream = Some(ActiveStream {
            id: stream_id,
            cancel: cancel.clone(),
        });

        Some((chat_id, user_message, assistant_id, stream_id, cancel))
    }

    fn finish_stream(&self, stream_id: u64) {
        let finished = {
            let mut state = self.state();
            match &state.active_stream {
                Some(active) if active.id == stream_id => {
                    state.active_stream = None;
                    true
                }
                _ => false,
            }
        };
        if finished {
            self.emit(StoreEvent::StreamingChanged(false));
        }
    }

    async fn run_stream(
        &self,
        chat_id: &str,
        user_message: &Message,
        assistant_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.backend
            .save_chat(chat_id, std::slice::from_ref(user_message))
            .await?;

        let mut stream = match self
            .backend
            .open_stream(chat_id, &user_message.content, cancel.clone())
            .await
        {
            Ok(stream) => stream,
            Err(_) if cancel.is_cancelled() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut reply = String::new();
        while let Some(chunk) = stream.next_chunk().await? {
            if !self.apply_chunk(chat_id, assistant_id, &mut reply, &chunk, cancel) {
                break;
            }
            let update = chunk.stats_update();
            if !update.is_empty() {
                self.update_token_stats(chat_id, update).await;
            }
        }

        if stream.is_cancelled() || cancel.is_cancelled() {
            tracing::debug!("Stream for {} cancelled, skipping reconciliation", chat_id);
            return Ok(());
        }

        self.reconcile(chat_id).await
    }

    /// Write a chunk's content into the assistant message
    ///
    /// Returns false once the stream has been cancelled; the chunk is then
    /// dropped.
    fn apply_chunk(
        &self,
        chat_id: &str,
        assistant_id: &str,
        reply: &mut String,
        chunk: &StreamChunk,
        cancel: &CancellationToken,
    ) -> bool {
        let updated = {
            let mut state = self.state();
            if cancel.is_cancelled() {
                return false;
            }

            if let Some(error) = &chunk.error {
                tracing::error!("Backend reported a stream error for {}: {}", chat_id, error);
            }

            let Some(fragment) = chunk.content_fragment() else {
                return true;
            };
            reply.push_str(fragment);

            state
                .chat_mut(chat_id)
                .and_then(|chat| chat.messages.iter_mut().find(|m| m.id == assistant_id))
                .map(|message| {
                    message.content.clone_from(reply);
                    message.content.clone()
                })
        };

        if let Some(content) = updated {
            self.emit(StoreEvent::ContentUpdated {
                chat_id: chat_id.to_string(),
                message_id: assistant_id.to_string(),
                content,
            });
        }
        true
    }

    async fn reconcile(&self, chat_id: &str) -> Result<()> {
        if let Some(remote) = self.backend.get_chat(chat_id).await {
            if remote.last_message().map(|m| m.role) == Some(Role::Assistant) {
                self.backend.save_chat(chat_id, &remote.messages).await?;

                if let Some(chat) = self.state().chat_mut(chat_id) {
                    chat.messages = remote.messages;
                }
                self.emit(StoreEvent::ChatsChanged);
            }
        }

        self.refresh_context(chat_id).await;
        self.backend.update_chat_position(chat_id).await;
        Ok(())
    }

    /// Fetch context usage of `chat_id` from the backend and merge it
    pub async fn refresh_context(&self, chat_id: &str) -> TokenStats {
        let context = self.backend.get_total_context(chat_id).await;
        self.update_token_stats(chat_id, context.into()).await;
        self.token_stats_for(chat_id)
    }
}
