//! Local persisted state
//!
//! Two stores live here:
//!
//! - [`SqliteChatCache`]: a durable mirror of the chat list in the user's
//!   data directory. It is a best-effort cache and never authoritative; the
//!   backend is. It also keeps small UI preferences such as whether the
//!   sidebar's "more" section is expanded.
//! - [`session::SessionStatsStore`]: the per-session token stats map,
//!   restored on start and overwritten on every change.

use crate::error::{LepotatoError, Result};
use crate::types::{Chat, Message};
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub mod session;
pub mod types;
pub use session::SessionStatsStore;
pub use types::CachedChatSummary;

/// Preference key for the sidebar's "more" section
pub const PREF_HISTORY_EXPANDED: &str = "chat_history_expanded";

/// Durable mirror of the chat list
#[derive(Debug, Clone)]
pub struct SqliteChatCache {
    db_path: PathBuf,
}

impl SqliteChatCache {
    /// Open the mirror at its default location in the user's data directory
    pub fn new() -> Result<Self> {
        Self::new_with_path(Self::default_path()?)
    }

    /// Default database path, `<data dir>/chats.db`
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "lepotato", "lepotato")
            .ok_or_else(|| LepotatoError::Storage("Could not determine data directory".into()))?;
        Ok(proj_dirs.data_dir().join("chats.db"))
    }

    /// Open the mirror at `db_path`, creating parent directories and schema
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::storage::SqliteChatCache;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let cache = SqliteChatCache::new_with_path(dir.path().join("chats.db")).unwrap();
    /// assert!(cache.load_chats().unwrap().is_empty());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        }

        let cache = Self { db_path };
        cache.init()?;
        Ok(cache)
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| LepotatoError::Storage(e.to_string()).into())
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                messages JSON NOT NULL
            );
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("Failed to create tables")
        .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Load every mirrored chat in list order
    pub fn load_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at, updated_at, messages
                FROM chats
                ORDER BY position ASC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query chats")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;

        let mut chats = Vec::new();
        for (id, title, created_at, updated_at, messages_json) in rows.flatten() {
            let messages: Vec<Message> = match serde_json::from_str(&messages_json) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!("Dropping unreadable mirrored transcript for {}: {}", id, e);
                    Vec::new()
                }
            };
            chats.push(Chat {
                id,
                title,
                messages,
                created_at: parse_stored_time(&created_at),
                updated_at: parse_stored_time(&updated_at),
            });
        }
        Ok(chats)
    }

    /// Replace the whole mirror with `chats`, keeping their order
    pub fn save_chats(&self, chats: &[Chat]) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;

        tx.execute("DELETE FROM chats", [])
            .context("Failed to clear chats")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;

        for (position, chat) in chats.iter().enumerate() {
            insert_chat(&tx, chat, position as i64)?;
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Put `chat` at the front of the mirror, replacing any previous copy
    pub fn prepend_chat(&self, chat: &Chat) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;

        tx.execute("DELETE FROM chats WHERE id = ?", params![chat.id])
            .context("Failed to replace chat")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;

        let first: Option<i64> = tx
            .query_row("SELECT MIN(position) FROM chats", [], |row| row.get(0))
            .optional()
            .context("Failed to read positions")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?
            .flatten();

        insert_chat(&tx, chat, first.map_or(0, |p| p - 1))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove one chat; missing ids are ignored
    pub fn remove_chat(&self, chat_id: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM chats WHERE id = ?", params![chat_id])
            .context("Failed to delete chat")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Rename a mirrored chat, returning whether it was present
    pub fn rename_chat(&self, chat_id: &str, title: &str) -> Result<bool> {
        let conn = self.open()?;
        let changed = conn
            .execute(
                "UPDATE chats SET title = ? WHERE id = ?",
                params![title, chat_id],
            )
            .context("Failed to rename chat")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Empty the mirror
    pub fn clear(&self) -> Result<()> {
        self.save_chats(&[])
    }

    /// Summaries of the mirrored chats in list order
    pub fn list_summaries(&self) -> Result<Vec<CachedChatSummary>> {
        Ok(self
            .load_chats()?
            .into_iter()
            .map(|chat| CachedChatSummary {
                message_count: chat.messages.len(),
                id: chat.id,
                title: chat.title,
                created_at: chat.created_at,
                updated_at: chat.updated_at,
            })
            .collect())
    }

    /// Read a stored preference
    pub fn preference(&self, key: &str) -> Result<Option<String>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT value FROM preferences WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read preference")
        .map_err(|e| LepotatoError::Storage(e.to_string()).into())
    }

    /// Store a preference, overwriting any previous value
    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .context("Failed to write preference")
        .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn insert_chat(conn: &Connection, chat: &Chat, position: i64) -> Result<()> {
    let messages_json = serde_json::to_string(&chat.messages)
        .context("Failed to serialize messages")
        .map_err(|e| LepotatoError::Storage(e.to_string()))?;

    conn.execute(
        "INSERT INTO chats (id, title, position, created_at, updated_at, messages)
        VALUES (?, ?, ?, ?, ?, ?)",
        params![
            chat.id,
            chat.title,
            position,
            chat.created_at.to_rfc3339(),
            chat.updated_at.to_rfc3339(),
            messages_json
        ],
    )
    .context("Failed to insert chat")
    .map_err(|e| LepotatoError::Storage(e.to_string()))?;
    Ok(())
}

fn parse_stored_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
