//! VPN connection orchestration
//!
//! Session pool, status polling, configuration loading and the
//! connection orchestrator built on top of them.

pub mod loader;
pub mod manager;
pub mod session_pool;
pub mod status_monitor;

// Public re-exports
pub use loader::{ConfigurationLoader, ProviderConfigurationLoader};
pub use manager::{ManagerDeps, ManagerState, VpnManager};
pub use session_pool::{SessionPool, StatusUpdate};
pub use status_monitor::{StatusBatch, StatusMonitor};
