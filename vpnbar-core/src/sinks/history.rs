//! Connection history, newest entry first

use crate::sinks::{load_json, save_json, ConnectionEventSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// Entries kept on disk
pub const MAX_HISTORY_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Connected,
    Disconnected,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryAction::Connected => write!(f, "connected"),
            HistoryAction::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub connection_id: String,
    pub connection_name: String,
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
}

/// Sink keeping the last [`MAX_HISTORY_ENTRIES`] transitions
pub struct ConnectionHistory {
    path: Option<PathBuf>,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl ConnectionHistory {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries: Vec<HistoryEntry> = load_json(&path);
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(MAX_HISTORY_ENTRIES);

        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Up to `limit` entries, newest first
    pub fn entries(&self, limit: usize) -> Vec<HistoryEntry> {
        self.lock().iter().take(limit).cloned().collect()
    }

    pub fn record(&self, id: &str, name: &str, action: HistoryAction, at: DateTime<Utc>) {
        let mut entries = self.lock();
        entries.insert(
            0,
            HistoryEntry {
                connection_id: id.to_string(),
                connection_name: name.to_string(),
                timestamp: at,
                action,
            },
        );
        entries.truncate(MAX_HISTORY_ENTRIES);
        self.persist(&entries);
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clear();
        self.persist(&entries);
    }

    fn persist(&self, entries: &[HistoryEntry]) {
        if let Some(path) = &self.path {
            if let Err(e) = save_json(path, &entries) {
                warn!("Failed to save history to {:?}: {}", path, e);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionEventSink for ConnectionHistory {
    fn on_connected(&self, id: &str, name: &str) {
        self.record(id, name, HistoryAction::Connected, Utc::now());
    }

    fn on_disconnected(&self, id: &str, name: &str) {
        self.record(id, name, HistoryAction::Disconnected, Utc::now());
    }
}
