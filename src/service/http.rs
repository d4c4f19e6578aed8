//! HTTP implementation of [`ChatBackend`]
//!
//! Talks to the chat backend's REST endpoints with `reqwest` and keeps the
//! optional local mirror ([`SqliteChatCache`]) in step with create, delete
//! and rename calls. The mirror is best effort: its failures are logged and
//! never fail a backend call, except for renames, which only exist locally.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::stream::ChatStream;
use super::{ChatBackend, INITIAL_PAGE_SIZE};
use crate::config::BackendConfig;
use crate::error::{LepotatoError, Result};
use crate::storage::SqliteChatCache;
use crate::types::{parse_timestamp, Chat, ChatPage, ContextStats, Message, Role};

/// `GET /chats`
#[derive(Debug, Deserialize)]
struct ChatListResponse {
    #[serde(default)]
    chats: Vec<String>,
    #[serde(default)]
    total: usize,
}

/// `GET /chat/{id}`
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(rename = "chatId")]
    chat_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    conversations: Vec<Conversation>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Conversation {
    #[serde(default)]
    message_id: Option<String>,
    role: Role,
    #[serde(default)]
    content: String,
}

impl From<ChatResponse> for Chat {
    fn from(response: ChatResponse) -> Self {
        let created_at = response
            .created_at
            .as_deref()
            .map(parse_timestamp)
            .unwrap_or_else(chrono::Utc::now);

        let messages = response
            .conversations
            .into_iter()
            .map(|conv| Message {
                id: conv
                    .message_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                content: conv.content,
                role: conv.role,
                created_at: chrono::Utc::now(),
            })
            .collect();

        Chat {
            id: response.chat_id,
            title: response.title,
            messages,
            created_at,
            updated_at: created_at,
        }
    }
}

/// `POST /chat`
#[derive(Debug, Serialize)]
struct CreateChatRequest<'a> {
    #[serde(rename = "chatId")]
    chat_id: &'a str,
    title: &'a str,
}

/// `POST /chat/{id}/save`
#[derive(Debug, Serialize)]
struct SaveChatRequest<'a> {
    messages: Vec<SavedMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct SavedMessage<'a> {
    message_id: &'a str,
    message_position: usize,
    role: Role,
    content: &'a str,
}

impl<'a> SaveChatRequest<'a> {
    fn new(messages: &'a [Message]) -> Self {
        Self {
            messages: messages
                .iter()
                .enumerate()
                .map(|(index, msg)| SavedMessage {
                    message_id: &msg.id,
                    message_position: index + 1,
                    role: msg.role,
                    content: &msg.content,
                })
                .collect(),
        }
    }
}

/// `POST /user_chat`
#[derive(Debug, Serialize)]
struct UserChatRequest<'a> {
    session_id: &'a str,
    message: &'a str,
    stream: bool,
}

/// Chat backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpChatService {
    client: Client,
    base_url: String,
    timeout: Duration,
    cache: Option<SqliteChatCache>,
}

impl HttpChatService {
    /// Create a service for the backend described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::config::BackendConfig;
    /// use lepotato::service::HttpChatService;
    ///
    /// let service = HttpChatService::new(&BackendConfig::default()).unwrap();
    /// assert_eq!(service.base_url(), "http://localhost:8000");
    /// ```
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("lepotato/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LepotatoError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Initialized chat service: base_url={}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            cache: None,
        })
    }

    /// Mirror created, deleted and renamed chats into `cache`
    pub fn with_cache(mut self, cache: SqliteChatCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Backend base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Local mirror, if configured
    pub fn cache(&self) -> Option<&SqliteChatCache> {
        self.cache.as_ref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request bounded by the configured timeout, body included
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .timeout(self.timeout)
    }

    async fn fetch_page(&self, limit: usize, offset: usize) -> Result<ChatPage> {
        let response = self
            .request(Method::GET, "/chats")
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;
        let response = check_status(response, "list chats").await?;
        let listing: ChatListResponse = response.json().await?;

        let chats = try_join_all(listing.chats.iter().map(|id| self.fetch_chat(id))).await?;

        Ok(ChatPage {
            chats,
            total: listing.total,
        })
    }

    async fn fetch_chat(&self, chat_id: &str) -> Result<Chat> {
        let response = self
            .request(Method::GET, &format!("/chat/{}", chat_id))
            .send()
            .await?;
        let response = check_status(response, "fetch chat").await?;
        let chat: ChatResponse = response.json().await?;
        Ok(chat.into())
    }

    async fn fetch_context(&self, chat_id: &str) -> Result<ContextStats> {
        let response = self
            .request(Method::GET, &format!("/get_total_context/{}", chat_id))
            .send()
            .await?;
        let response = check_status(response, "get context").await?;
        Ok(response.json().await?)
    }

    async fn put_position(&self, chat_id: &str) -> Result<()> {
        let response = self
            .request(Method::PUT, &format!("/chat/{}/position", chat_id))
            .send()
            .await?;
        check_status(response, "update chat position").await?;
        Ok(())
    }

    fn mirror<F>(&self, what: &str, op: F)
    where
        F: FnOnce(&SqliteChatCache) -> Result<()>,
    {
        if let Some(cache) = &self.cache {
            if let Err(e) = op(cache) {
                tracing::warn!("Failed to {} in local mirror: {}", what, e);
            }
        }
    }
}

/// Turn a non-success response into [`LepotatoError::Backend`]
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    tracing::debug!("Backend error body for {}: {}", what, error_text);
    Err(LepotatoError::Backend {
        status: status.as_u16(),
        message: format!("Failed to {}: {}", what, error_text),
    }
    .into())
}

#[async_trait]
impl ChatBackend for HttpChatService {
    async fn get_chats(&self, limit: usize, offset: usize) -> ChatPage {
        let limit = if offset == 0 { INITIAL_PAGE_SIZE } else { limit };

        match self.fetch_page(limit, offset).await {
            Ok(page) => {
                tracing::debug!(
                    "Fetched {} chats at offset {} (total {})",
                    page.chats.len(),
                    offset,
                    page.total
                );
                page
            }
            Err(e) => {
                tracing::error!("Failed to fetch chats: {}", e);
                ChatPage::default()
            }
        }
    }

    async fn get_chat(&self, chat_id: &str) -> Option<Chat> {
        match self.fetch_chat(chat_id).await {
            Ok(chat) => Some(chat),
            Err(e) => {
                tracing::error!("Failed to fetch chat {}: {}", chat_id, e);
                None
            }
        }
    }

    async fn create_chat(&self) -> Result<Chat> {
        let chat = Chat::new();

        let response = self
            .request(Method::POST, "/chat")
            .json(&CreateChatRequest {
                chat_id: &chat.id,
                title: &chat.title,
            })
            .send()
            .await?;
        check_status(response, "create chat").await?;

        self.mirror("store new chat", |cache| cache.prepend_chat(&chat));
        tracing::info!("Created chat {}", chat.id);
        Ok(chat)
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/chat/{}", chat_id))
            .send()
            .await?;
        check_status(response, "delete chat").await?;

        self.mirror("remove chat", |cache| cache.remove_chat(chat_id));
        tracing::info!("Deleted chat {}", chat_id);
        Ok(())
    }

    async fn delete_all_chats(&self) -> Result<()> {
        let response = self.request(Method::DELETE, "/chats").send().await?;
        check_status(response, "delete all chats").await?;

        self.mirror("clear chats", |cache| cache.clear());
        tracing::info!("Deleted all chats");
        Ok(())
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<()> {
        let Some(cache) = self.cache.clone() else {
            tracing::debug!("No local mirror, rename of {} kept in memory", chat_id);
            return Ok(());
        };

        let (id, new_title) = (chat_id.to_string(), title.to_string());
        let renamed = tokio::task::spawn_blocking(move || cache.rename_chat(&id, &new_title))
            .await
            .map_err(|e| LepotatoError::Storage(format!("Rename task failed: {}", e)))??;

        if !renamed {
            tracing::debug!("Chat {} not in local mirror, rename kept in memory", chat_id);
        }
        Ok(())
    }

    async fn save_chat(&self, chat_id: &str, messages: &[Message]) -> Result<()> {
        let response = self
            .request(Method::POST, &format!("/chat/{}/save", chat_id))
            .json(&SaveChatRequest::new(messages))
            .send()
            .await?;
        check_status(response, "save chat").await?;

        tracing::debug!("Saved {} messages for chat {}", messages.len(), chat_id);
        Ok(())
    }

    async fn update_chat_position(&self, chat_id: &str) {
        if let Err(e) = self.put_position(chat_id).await {
            tracing::error!("Failed to update chat position for {}: {}", chat_id, e);
        }
    }

    async fn get_total_context(&self, chat_id: &str) -> ContextStats {
        match self.fetch_context(chat_id).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("Error fetching total context for {}: {}", chat_id, e);
                ContextStats::default()
            }
        }
    }

    async fn open_stream(
        &self,
        chat_id: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> Result<ChatStream> {
        let request = self.client.post(self.url("/user_chat")).json(&UserChatRequest {
            session_id: chat_id,
            message: content,
            stream: true,
        });

        // The deadline covers the wait for headers only; the body streams
        // for as long as the backend keeps generating.
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(LepotatoError::Stream("cancelled before the stream opened".into()).into());
            }
            response = tokio::time::timeout(self.timeout, request.send()) => match response {
                Ok(response) => response?,
                Err(_) => {
                    return Err(LepotatoError::Stream(format!(
                        "no response within {}s",
                        self.timeout.as_secs()
                    ))
                    .into());
                }
            },
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Stream response status: {}", status);
            tracing::error!("Stream error details: {}", error_text);
            return Err(LepotatoError::Backend {
                status: status.as_u16(),
                message: format!("Stream request failed: {}", error_text),
            }
            .into());
        }

        tracing::debug!("Opened stream for chat {}", chat_id);
        Ok(ChatStream::new(chat_id, response.bytes_stream(), cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_for(server: &MockServer) -> HttpChatService {
        HttpChatService::new(&BackendConfig {
            base_url: format!("{}/", server.uri()),
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let service = HttpChatService::new(&BackendConfig {
            base_url: "http://host:8000/".to_string(),
            timeout_seconds: 5,
        })
        .unwrap();
        assert_eq!(service.url("/chats"), "http://host:8000/chats");
    }

    #[test]
    fn test_chat_response_conversion() {
        let raw = r#"{
            "chatId": "c1",
            "title": "Trip",
            "conversations": [
                {"message_id": "m1", "role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ],
            "created_at": "2025-01-02T03:04:05.000001"
        }"#;
        let chat: Chat = serde_json::from_str::<ChatResponse>(raw).unwrap().into();
        assert_eq!(chat.id, "c1");
        assert_eq!(chat.title, "Trip");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].id, "m1");
        assert!(!chat.messages[1].id.is_empty());
        assert_eq!(chat.messages[1].role, Role::Assistant);
        assert_eq!(chat.created_at, chat.updated_at);
    }

    #[test]
    fn test_save_request_positions_are_one_based() {
        let messages = vec![Message::user("a"), Message::assistant_placeholder()];
        let json = serde_json::to_value(SaveChatRequest::new(&messages)).unwrap();
        assert_eq!(json["messages"][0]["message_position"], 1);
        assert_eq!(json["messages"][1]["message_position"], 2);
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][0]["message_id"], messages[0].id.as_str());
    }

    #[tokio::test]
    async fn test_first_page_always_requests_three() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .and(query_param("limit", "3"))
            .and(query_param("offset", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"chats": [], "total": 0})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = service_for(&server).get_chats(50, 0).await;
        assert!(page.chats.is_empty());
    }

    #[tokio::test]
    async fn test_later_pages_use_requested_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats"))
            .and(query_param("limit", "10"))
            .and(query_param("offset", "3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"chats": [], "total": 3})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = service_for(&server).get_chats(10, 3).await;
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_create_chat_posts_id_and_default_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let chat = service_for(&server).create_chat().await.unwrap();
        assert_eq!(chat.title, "New Chat");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["chatId"], chat.id.as_str());
        assert_eq!(body["title"], "New Chat");
    }

    #[tokio::test]
    async fn test_create_chat_failure_propagates_and_skips_mirror() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteChatCache::new_with_path(dir.path().join("chats.db")).unwrap();
        let service = service_for(&server).with_cache(cache.clone());

        let err = service.create_chat().await.unwrap_err();
        match err.downcast_ref::<LepotatoError>() {
            Some(LepotatoError::Backend { status, .. }) => assert_eq!(*status, 500),
            other => panic!("expected backend error, got {:?}", other),
        }
        assert!(cache.load_chats().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_total_context_defaults_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_total_context/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let stats = service_for(&server).get_total_context("nope").await;
        assert_eq!(stats, ContextStats::default());
    }

    #[tokio::test]
    async fn test_open_stream_sends_session_and_stream_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user_chat"))
            .and(body_json(serde_json::json!({
                "session_id": "c1",
                "message": "hi",
                "stream": true
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"content\":\"yo\"}\n\ndata: [DONE]\n\n", "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut stream = service_for(&server)
            .open_stream("c1", "hi", CancellationToken::new())
            .await
            .unwrap();
        let chunk = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("yo"));
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_stream_cancelled_before_send() {
        let server = MockServer::start().await;
        let token = CancellationToken::new();
        token.cancel();

        let result = service_for(&server).open_stream("c1", "hi", token).await;
        assert!(result.is_err());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_without_mirror_is_ok() {
        let server = MockServer::start().await;
        assert!(service_for(&server).rename_chat("c1", "x").await.is_ok());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
