//! Recently-viewed boards, persisted through a small key/value store.
//!
//! The tracker keeps `board id -> last access (ms since epoch)` in memory and
//! writes the whole map under one key on every access. Missing or corrupt
//! data reads as "no recent boards"; it never fails startup.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::ErrorCode;
use crate::model::{BoardSummary, EntityId};

/// Storage key for the access map.
pub const RECENT_KEY: &str = "recentBoardAccess";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_STORAGE_IO",
            Self::Corrupt(_) => "E_STORAGE_CORRUPT",
        }
    }
}

/// Minimal durable string store.
pub trait KeyValueStore: Send {
    /// # Errors
    ///
    /// Returns [`StorageError`] when the backing data cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns [`StorageError`] when the value cannot be persisted.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-memory store, for tests and for running without a home directory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// One JSON object file holding every key.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_all()?.get(key).and_then(Value::as_str).map(str::to_owned))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut all = self.read_all().unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "replacing unreadable storage file");
            Map::new()
        });
        all.insert(key.to_owned(), Value::String(value.to_owned()));
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&all)?)?;
        Ok(())
    }
}

/// Last-access ranking for boards.
pub struct RecencyTracker {
    storage: Box<dyn KeyValueStore>,
    entries: HashMap<EntityId, i64>,
}

impl RecencyTracker {
    /// Load persisted entries, treating any failure as an empty history.
    #[must_use]
    pub fn load(storage: Box<dyn KeyValueStore>) -> Self {
        let entries = match storage.get(RECENT_KEY) {
            Ok(Some(raw)) => parse_entries(&raw),
            Ok(None) => HashMap::new(),
            Err(e) => {
                tracing::warn!(error = %e, "recent boards unavailable");
                HashMap::new()
            }
        };
        Self { storage, entries }
    }

    /// Record an access now and persist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if persisting fails; the in-memory entry is kept.
    pub fn record(&mut self, board_id: &EntityId) -> Result<(), StorageError> {
        self.record_at(board_id, Utc::now())
    }

    /// Record an access at `at` and persist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if persisting fails; the in-memory entry is kept.
    pub fn record_at(&mut self, board_id: &EntityId, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.entries.insert(board_id.clone(), at.timestamp_millis());
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(id, ms)| (id.to_string(), Value::from(*ms)))
            .collect();
        self.storage.set(RECENT_KEY, &Value::Object(map).to_string())
    }

    #[must_use]
    pub fn last_access(&self, board_id: &EntityId) -> Option<DateTime<Utc>> {
        self.entries.get(board_id).and_then(|ms| DateTime::from_timestamp_millis(*ms))
    }

    /// Catalogue boards by last access, newest first, at most `limit`.
    /// Boards never opened, or no longer in the catalogue, are left out.
    #[must_use]
    pub fn recent(&self, catalogue: &[BoardSummary], limit: usize) -> Vec<BoardSummary> {
        let mut ranked: Vec<(i64, &BoardSummary)> = catalogue
            .iter()
            .filter_map(|board| self.entries.get(&board.id).map(|ms| (*ms, board)))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        ranked.into_iter().take(limit).map(|(_, board)| board.clone()).collect()
    }
}

/// Parse `{ "<id>": <ms> }`. Values may be numbers or numeric strings;
/// anything else is skipped.
fn parse_entries(raw: &str) -> HashMap<EntityId, i64> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        tracing::warn!("recent boards data is corrupt; starting empty");
        return HashMap::new();
    };
    map.into_iter()
        .filter_map(|(id, value)| {
            let ms = match &value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            }?;
            Some((EntityId::new(id), ms))
        })
        .collect()
}

#[cfg(test)]
#[path = "recency_test.rs"]
mod tests;
