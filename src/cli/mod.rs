//! CLI command implementations
//!
//! Every command builds the same object graph (settings, provider,
//! loader, sinks, orchestrator), performs its work and shuts the
//! orchestrator down again. `run` keeps it alive until interrupted.

pub mod agent;
pub mod report;
pub mod vpn;

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vpnbar_core::config::toml_config::{get_config_dir, get_config_path};
use vpnbar_core::config::SettingsStore;
use vpnbar_core::error::{VpnBarError, VpnError};
use vpnbar_core::native::{MemoryProvider, NativeSessionProvider, NetworkManagerProvider};
use vpnbar_core::sinks::{ConnectionEventSink, ConnectionHistory, StatisticsRecorder, TracingNotifier};
use vpnbar_core::types::{Connection, ConnectionStatus};
use vpnbar_core::vpn::{ManagerDeps, ManagerState, ProviderConfigurationLoader, VpnManager};

const STATISTICS_FILE: &str = "statistics.json";
const HISTORY_FILE: &str = "history.json";

/// Upper bound for a one-shot command waiting on the first load
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Which native session provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// NetworkManager over the system D-Bus
    Networkmanager,
    /// In-process simulation with two demo profiles
    Memory,
}

impl ProviderKind {
    fn build(self) -> Result<Arc<dyn NativeSessionProvider>, VpnError> {
        match self {
            ProviderKind::Networkmanager => Ok(Arc::new(NetworkManagerProvider::new()?)),
            ProviderKind::Memory => {
                let provider = MemoryProvider::new()
                    .with_profile("demo-office", "Office (demo)")
                    .with_profile("demo-home", "Home (demo)");
                provider.set_connect_delay(Some(Duration::from_millis(300)));
                provider.set_disconnect_delay(Some(Duration::from_millis(200)));
                Ok(Arc::new(provider))
            }
        }
    }
}

/// Everything a command needs, wired together
pub struct Agent {
    pub manager: VpnManager,
    pub settings: Arc<SettingsStore>,
}

impl Agent {
    /// Build the object graph for `provider`
    pub fn start(provider: ProviderKind) -> Result<Self, VpnBarError> {
        let settings = Arc::new(SettingsStore::open(get_config_path()?)?);
        let config_dir = get_config_dir()?;

        let provider = provider.build()?;
        let loader = Arc::new(ProviderConfigurationLoader::new(Arc::clone(&provider)));
        let sinks: Vec<Arc<dyn ConnectionEventSink>> = vec![
            Arc::new(TracingNotifier::new(Arc::clone(&settings))),
            Arc::new(StatisticsRecorder::open(config_dir.join(STATISTICS_FILE))),
            Arc::new(ConnectionHistory::open(config_dir.join(HISTORY_FILE))),
        ];

        let manager = VpnManager::start(ManagerDeps {
            provider,
            loader,
            sinks,
            settings: Arc::clone(&settings),
        })?;

        Ok(Self { manager, settings })
    }

    /// Force a full load and wait for its result
    ///
    /// Fails when the load produced an error and no connection at all.
    pub async fn load(&self) -> Result<ManagerState, VpnBarError> {
        self.manager.load_connections(true);
        let state = tokio::time::timeout(LOAD_TIMEOUT, self.manager.wait_for(|s| s.loaded))
            .await
            .map_err(|_| VpnError::connection_failed("timed out loading configurations"))?
            .ok_or(VpnError::SharedManagerUnavailable)?;

        match &state.loading_error {
            Some(error) if state.connections.is_empty() => Err(error.clone().into()),
            _ => Ok(state),
        }
    }

    pub async fn shutdown(self) {
        self.manager.shutdown().await;
    }
}

/// Find a connection by id, or by case-insensitive name
pub fn resolve<'a>(state: &'a ManagerState, key: &str) -> Result<&'a Connection, VpnError> {
    if let Some(connection) = state.connection(key) {
        return Ok(connection);
    }

    let lowered = key.to_lowercase();
    let found = state
        .connections
        .iter()
        .find(|c| c.name.to_lowercase() == lowered);
    debug!(key, matched = found.is_some(), "Resolving connection by name");
    found.ok_or_else(|| VpnError::ConnectionNotFound { id: key.to_string() })
}

/// Status word coloured for terminal output
pub fn status_label(status: ConnectionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ConnectionStatus::Connected => label.green().bold(),
        ConnectionStatus::Connecting => label.yellow(),
        ConnectionStatus::Disconnecting => label.yellow(),
        ConnectionStatus::Disconnected => label.dimmed(),
    }
}

/// Human-readable duration, e.g. `1h 02m 03s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
