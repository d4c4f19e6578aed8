//! Session-scoped token stats
//!
//! The stats map lives for one client session: it is written as a JSON
//! file under a temporary directory, restored when a client with the same
//! session name starts, and overwritten on every change.

use crate::error::{LepotatoError, Result};
use crate::types::TokenStats;
use anyhow::Context;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Stats keyed by chat id
pub type TokenStatsMap = HashMap<String, TokenStats>;

/// JSON file holding the [`TokenStatsMap`] of one session
#[derive(Debug, Clone)]
pub struct SessionStatsStore {
    path: PathBuf,
}

impl SessionStatsStore {
    /// Store for session `name` inside `dir`
    ///
    /// # Examples
    ///
    /// ```
    /// use lepotato::storage::SessionStatsStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SessionStatsStore::new(dir.path(), "default");
    /// assert!(store.load().unwrap().is_empty());
    /// ```
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        let file = format!("{}.json", sanitize(name));
        Self {
            path: dir.as_ref().join(file),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the map; a missing file is an empty map
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<TokenStatsMap> {
        if !self.path.exists() {
            return Ok(TokenStatsMap::new());
        }

        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        let map = serde_json::from_str(&raw)
            .context("Failed to parse session stats")
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(map)
    }

    /// Overwrite the file with `map`
    pub fn save(&self, map: &TokenStatsMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create session directory")
                .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        }

        let raw = serde_json::to_string(map)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write {}", self.path.display()))
            .map_err(|e| LepotatoError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
