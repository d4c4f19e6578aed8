//! In-process [`ChatBackend`] for unit tests
//!
//! Records every call, serves chats from an in-memory list and replays
//! scripted stream bodies. A stream can also be driven live through a
//! channel so a test can interleave chunks with `stop_streaming`.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::stream::ChatStream;
use super::{ChatBackend, INITIAL_PAGE_SIZE};
use crate::error::{LepotatoError, Result};
use crate::types::{Chat, ChatPage, ContextStats, Message};

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    GetChats { limit: usize, offset: usize },
    GetChat(String),
    CreateChat,
    DeleteChat(String),
    DeleteAllChats,
    RenameChat(String, String),
    SaveChat { chat_id: String, messages: usize },
    UpdatePosition(String),
    GetTotalContext(String),
    OpenStream { chat_id: String, content: String },
}

enum ScriptedStream {
    Body(String),
    Live(mpsc::UnboundedReceiver<Bytes>),
}

#[derive(Default)]
struct FakeState {
    chats: Vec<Chat>,
    calls: Vec<Call>,
    streams: VecDeque<ScriptedStream>,
    context: ContextStats,
    fail_writes: bool,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded with `chats`, most recent first
    pub(crate) fn with_chats(chats: Vec<Chat>) -> Self {
        let fake = Self::new();
        fake.state.lock().unwrap().chats = chats;
        fake
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Queue a complete stream body for the next `open_stream`
    pub(crate) fn push_stream_body(&self, body: &str) {
        self.state
            .lock()
            .unwrap()
            .streams
            .push_back(ScriptedStream::Body(body.to_string()));
    }

    /// Queue a live stream; dropping the sender ends the body
    pub(crate) fn push_live_stream(&self) -> mpsc::UnboundedSender<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .streams
            .push_back(ScriptedStream::Live(rx));
        tx
    }

    /// Replace the stored transcript of `chat_id`
    pub(crate) fn set_transcript(&self, chat_id: &str, messages: Vec<Message>) {
        let mut state = self.state.lock().unwrap();
        if let Some(chat) = state.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.messages = messages;
        }
    }

    pub(crate) fn set_context(&self, context: ContextStats) {
        self.state.lock().unwrap().context = context;
    }

    /// Make create, delete, save and stream calls fail
    pub(crate) fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    fn record(&self, call: Call) -> bool {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.fail_writes
    }
}

fn backend_down() -> anyhow::Error {
    LepotatoError::Backend {
        status: 500,
        message: "fake backend failure".to_string(),
    }
    .into()
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn get_chats(&self, limit: usize, offset: usize) -> ChatPage {
        self.record(Call::GetChats { limit, offset });
        let limit = if offset == 0 { INITIAL_PAGE_SIZE } else { limit };
        let state = self.state.lock().unwrap();
        ChatPage {
            chats: state.chats.iter().skip(offset).take(limit).cloned().collect(),
            total: state.chats.len(),
        }
    }

    async fn get_chat(&self, chat_id: &str) -> Option<Chat> {
        self.record(Call::GetChat(chat_id.to_string()));
        let state = self.state.lock().unwrap();
        state.chats.iter().find(|c| c.id == chat_id).cloned()
    }

    async fn create_chat(&self) -> Result<Chat> {
        if self.record(Call::CreateChat) {
            return Err(backend_down());
        }
        let chat = Chat::new();
        self.state.lock().unwrap().chats.insert(0, chat.clone());
        Ok(chat)
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        if self.record(Call::DeleteChat(chat_id.to_string())) {
            return Err(backend_down());
        }
        self.state.lock().unwrap().chats.retain(|c| c.id != chat_id);
        Ok(())
    }

    async fn delete_all_chats(&self) -> Result<()> {
        if self.record(Call::DeleteAllChats) {
            return Err(backend_down());
        }
        self.state.lock().unwrap().chats.clear();
        Ok(())
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()> {
        self.record(Call::RenameChat(chat_id.to_string(), title.to_string()));
        Ok(())
    }

    async fn save_chat(&self, chat_id: &str, messages: &[Message]) -> Result<()> {
        if self.record(Call::SaveChat {
            chat_id: chat_id.to_string(),
            messages: messages.len(),
        }) {
            return Err(backend_down());
        }
        Ok(())
    }

    async fn update_chat_position(&self, chat_id: &str) {
        self.record(Call::UpdatePosition(chat_id.to_string()));
    }

    async fn get_total_context(&self, chat_id: &str) -> ContextStats {
        self.record(Call::GetTotalContext(chat_id.to_string()));
        self.state.lock().unwrap().context
    }

    async fn open_stream(
        &self,
        chat_id: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> Result<ChatStream> {
        if self.record(Call::OpenStream {
            chat_id: chat_id.to_string(),
            content: content.to_string(),
        }) {
            return Err(backend_down());
        }

        let scripted = self.state.lock().unwrap().streams.pop_front();
        match scripted {
            Some(ScriptedStream::Body(body)) => {
                let bytes = futures::stream::iter(vec![Ok(Bytes::from(body))]);
                Ok(ChatStream::new(chat_id, bytes, cancel))
            }
            Some(ScriptedStream::Live(rx)) => {
                let bytes = UnboundedReceiverStream::new(rx).map(Ok);
                Ok(ChatStream::new(chat_id, bytes, cancel))
            }
            None => Err(LepotatoError::Stream("no scripted stream".to_string()).into()),
        }
    }
}
