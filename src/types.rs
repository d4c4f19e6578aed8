//! Core data model shared by the service, the store and the UI
//!
//! A [`Chat`] owns an ordered list of [`Message`]s. [`TokenStats`] are kept
//! outside of the chat entity, keyed by chat id, because they come from
//! the backend's stream and context endpoints rather than the transcript.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to chats created from the client
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Context window reported when the backend has not told us otherwise
pub const DEFAULT_MAX_TOKENS: u64 = 8192;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user
    User,
    /// Reply produced by the backend
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id
    pub id: String,
    /// Message text
    pub content: String,
    /// Who wrote it
    pub role: Role,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user message with a fresh id
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::types::{Message, Role};
    ///
    /// let msg = Message::user("hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert_eq!(msg.content, "hello");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            role: Role::User,
            created_at: Utc::now(),
        }
    }

    /// Create the empty assistant message that a stream fills in
    pub fn assistant_placeholder() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: String::new(),
            role: Role::Assistant,
            created_at: Utc::now(),
        }
    }
}

/// A persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Unique chat id, also used as the backend session id
    pub id: String,
    /// Display title
    pub title: String,
    /// Ordered transcript
    pub messages: Vec<Message>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last activity time
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// Create an empty chat titled [`DEFAULT_CHAT_TITLE`]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Last message of the transcript, if any
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// Usage and throughput figures reported by the backend for one chat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStats {
    /// Tokens currently held in the chat's context
    pub total_tokens: u64,
    /// Size of the model's context window
    pub max_tokens: u64,
    /// Generation speed of the last reply
    pub tokens_per_second: f64,
}

impl Default for TokenStats {
    fn default() -> Self {
        Self {
            total_tokens: 0,
            max_tokens: DEFAULT_MAX_TOKENS,
            tokens_per_second: 0.0,
        }
    }
}

impl TokenStats {
    /// Apply a partial update; absent fields keep their previous value
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::types::{TokenStats, TokenStatsUpdate};
    ///
    /// let mut stats = TokenStats::default();
    /// stats.apply(&TokenStatsUpdate {
    ///     total_tokens: Some(42),
    ///     ..Default::default()
    /// });
    /// assert_eq!(stats.total_tokens, 42);
    /// assert_eq!(stats.max_tokens, 8192);
    /// ```
    pub fn apply(&mut self, update: &TokenStatsUpdate) {
        if let Some(total) = update.total_tokens {
            self.total_tokens = total;
        }
        if let Some(max) = update.max_tokens {
            self.max_tokens = max;
        }
        if let Some(tps) = update.tokens_per_second {
            self.tokens_per_second = tps;
        }
    }

    /// Share of the context window in use, between 0.0 and 1.0
    pub fn usage_ratio(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.total_tokens as f64 / self.max_tokens as f64).min(1.0)
    }
}

/// Partial token stats, plus an optional new chat title
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStatsUpdate {
    pub total_tokens: Option<u64>,
    pub max_tokens: Option<u64>,
    pub tokens_per_second: Option<f64>,
    pub title: Option<String>,
}

impl TokenStatsUpdate {
    /// True when the update carries nothing to apply
    pub fn is_empty(&self) -> bool {
        self.total_tokens.is_none()
            && self.max_tokens.is_none()
            && self.tokens_per_second.is_none()
            && self.title.is_none()
    }
}

/// Context figures returned by `GET /get_total_context/{id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub total_tokens: u64,
    pub max_tokens: u64,
}

impl Default for ContextStats {
    fn default() -> Self {
        Self {
            total_tokens: 0,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<ContextStats> for TokenStatsUpdate {
    fn from(stats: ContextStats) -> Self {
        Self {
            total_tokens: Some(stats.total_tokens),
            max_tokens: Some(stats.max_tokens),
            ..Default::default()
        }
    }
}

/// One page of the chat list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatPage {
    /// Chats of this page, most recently active first
    pub chats: Vec<Chat>,
    /// Number of chats the backend holds in total
    pub total: usize,
}

/// Parse a backend timestamp
///
/// Accepts RFC 3339 and the naive ISO-8601 form produced by Python's
/// `datetime.isoformat()` (read as UTC). Anything else maps to now.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    tracing::debug!("Unparseable backend timestamp {:?}, using now", raw);
    Utc::now()
}
