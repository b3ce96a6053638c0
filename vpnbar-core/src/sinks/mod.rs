//! Side effects of confirmed connection transitions
//!
//! The orchestrator calls every registered [`ConnectionEventSink`] exactly
//! once per genuine transition into `Connected`, and once per genuine
//! transition from an active state into `Disconnected`.

use crate::config::SettingsStore;
use crate::error::VpnBarError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub mod history;
pub mod statistics;

pub use history::{ConnectionHistory, HistoryAction, HistoryEntry};
pub use statistics::{ConnectionStatistics, StatisticsRecorder};

/// Consumer of confirmed connect/disconnect transitions
pub trait ConnectionEventSink: Send + Sync {
    fn on_connected(&self, id: &str, name: &str);

    fn on_disconnected(&self, id: &str, name: &str);
}

/// Sink that reports transitions through `tracing`
///
/// Silent while `notifications_enabled` is off; the setting is read on
/// every event so changes apply without a restart.
pub struct TracingNotifier {
    settings: Arc<SettingsStore>,
}

impl TracingNotifier {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    /// Whether the next transition would be announced
    pub fn is_enabled(&self) -> bool {
        self.settings.notifications_enabled()
    }
}

impl ConnectionEventSink for TracingNotifier {
    fn on_connected(&self, id: &str, name: &str) {
        if self.is_enabled() {
            info!(id, "VPN connected: {}", name);
        }
    }

    fn on_disconnected(&self, id: &str, name: &str) {
        if self.is_enabled() {
            info!(id, "VPN disconnected: {}", name);
        }
    }
}

/// Read a JSON store, falling back to the default value when it is missing
/// or unreadable
fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            return T::default();
        }
    };

    serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!("Discarding corrupt store {:?}: {}", path, e);
        T::default()
    })
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), VpnBarError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
