use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary row of the local chat-list mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedChatSummary {
    /// Chat id
    pub id: String,
    /// Title as last known locally
    pub title: String,
    /// When the chat was created
    pub created_at: DateTime<Utc>,
    /// When the chat was last active
    pub updated_at: DateTime<Utc>,
    /// Number of messages in the mirrored transcript
    pub message_count: usize,
}
