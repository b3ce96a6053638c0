//! Usage statistics
//!
//! Counts connections and disconnections and tracks session durations.
//! Persisted as JSON next to the settings file.

use crate::sinks::{load_json, save_json, ConnectionEventSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Aggregated usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionStatistics {
    pub total_connections: u64,
    pub total_disconnections: u64,

    /// Sum of all completed session durations
    pub total_connection_time_ms: u64,

    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub longest_session_ms: u64,
    pub shortest_session_ms: Option<u64>,
}

impl ConnectionStatistics {
    pub fn total_connection_time(&self) -> Duration {
        Duration::from_millis(self.total_connection_time_ms)
    }

    /// Mean duration of completed sessions
    pub fn average_session(&self) -> Duration {
        if self.total_disconnections == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.total_connection_time_ms / self.total_disconnections)
    }
}

struct Inner {
    stats: ConnectionStatistics,

    /// Start time of each session still open
    open_sessions: HashMap<String, DateTime<Utc>>,
}

/// Sink recording [`ConnectionStatistics`]
pub struct StatisticsRecorder {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl StatisticsRecorder {
    /// Recorder persisted at `path`; a missing or corrupt file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = load_json(&path);
        Self::with_stats(Some(path), stats)
    }

    pub fn in_memory() -> Self {
        Self::with_stats(None, ConnectionStatistics::default())
    }

    fn with_stats(path: Option<PathBuf>, stats: ConnectionStatistics) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner {
                stats,
                open_sessions: HashMap::new(),
            }),
        }
    }

    pub fn statistics(&self) -> ConnectionStatistics {
        self.lock().stats.clone()
    }

    /// Forget everything, open sessions included
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.stats = ConnectionStatistics::default();
        inner.open_sessions.clear();
        self.persist(&inner.stats);
    }

    pub fn record_connection(&self, id: &str, at: DateTime<Utc>) {
        let mut inner = self.lock();
        inner.open_sessions.insert(id.to_string(), at);
        inner.stats.total_connections += 1;
        inner.stats.last_connected_at = Some(at);
        self.persist(&inner.stats);
    }

    /// Close the session opened for `id`; ignored when none is open
    pub fn record_disconnection(&self, id: &str, at: DateTime<Utc>) {
        let mut inner = self.lock();
        let Some(started) = inner.open_sessions.remove(id) else {
            debug!(id, "Disconnection without a recorded session start");
            return;
        };

        let duration = u64::try_from((at - started).num_milliseconds()).unwrap_or(0);
        let stats = &mut inner.stats;
        stats.total_disconnections += 1;
        stats.total_connection_time_ms += duration;
        stats.last_disconnected_at = Some(at);
        stats.longest_session_ms = stats.longest_session_ms.max(duration);
        stats.shortest_session_ms = Some(match stats.shortest_session_ms {
            Some(shortest) => shortest.min(duration),
            None => duration,
        });

        self.persist(&inner.stats);
    }

    fn persist(&self, stats: &ConnectionStatistics) {
        if let Some(path) = &self.path {
            if let Err(e) = save_json(path, stats) {
                warn!("Failed to save statistics to {:?}: {}", path, e);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionEventSink for StatisticsRecorder {
    fn on_connected(&self, id: &str, _name: &str) {
        self.record_connection(id, Utc::now());
    }

    fn on_disconnected(&self, id: &str, _name: &str) {
        self.record_disconnection(id, Utc::now());
    }
}
