//! TOML settings file I/O
//!
//! Handles loading and saving agent settings to/from a TOML file in the
//! user's configuration directory, and the shared store the orchestrator
//! reads them through.

use crate::config::{clamp_update_interval, ConnectionPolicy, DEFAULT_UPDATE_INTERVAL};
use crate::error::{ConfigError, VpnBarError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Complete TOML settings structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Connection list update interval in seconds (clamped to 5-120)
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Connection toggled most recently (hotkey/toggle convenience)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_connection_id: Option<String>,

    /// Announce connect/disconnect transitions to the user
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,

    /// Retry/timeout policy
    #[serde(rename = "connection", default)]
    pub policy: ConnectionPolicy,
}

fn default_update_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL.as_secs()
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval_secs(),
            last_used_connection_id: None,
            notifications_enabled: default_notifications_enabled(),
            policy: ConnectionPolicy::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, VpnBarError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VpnBarError::Config(ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            }),
            _ => VpnBarError::Config(ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            }),
        })?;

        let mut settings: Settings = toml::from_str(&contents).map_err(|e| {
            VpnBarError::Config(ConfigError::ValidationError {
                message: format!("Failed to parse config file: {}", e),
            })
        })?;

        debug!("Validating connection policy from config");
        settings.policy.validate().map_err(|e| {
            warn!("Connection policy validation failed: {}", e);
            VpnBarError::Config(ConfigError::ValidationError {
                message: format!("Invalid connection policy: {}", e),
            })
        })?;

        let clamped = clamp_update_interval(Duration::from_secs(settings.update_interval_secs));
        if clamped.as_secs() != settings.update_interval_secs {
            warn!(
                configured = settings.update_interval_secs,
                clamped = clamped.as_secs(),
                "Update interval out of range, clamping"
            );
            settings.update_interval_secs = clamped.as_secs();
        }

        info!(
            "Loaded settings: update_interval={}s, retry_count={}, retry_base_delay={}ms, disconnect_timeout={}ms",
            settings.update_interval_secs,
            settings.policy.retry_count,
            settings.policy.retry_base_delay_ms,
            settings.policy.disconnect_timeout_ms
        );

        Ok(settings)
    }

    /// Save settings to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), VpnBarError> {
        let contents = toml::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VpnBarError::Config(ConfigError::IoError {
                    message: format!("Failed to create config directory: {}", e),
                })
            })?;
        }

        std::fs::write(path, contents).map_err(|_e| {
            VpnBarError::Config(ConfigError::SaveFailed {
                path: path.to_string_lossy().to_string(),
            })
        })?;

        Ok(())
    }
}

/// Shared, optionally file-backed settings
///
/// Every write is persisted immediately when a path is set; persistence
/// failures are logged and the in-memory value is kept.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: Mutex<Settings>,
}

impl SettingsStore {
    /// Open the store at `path`, falling back to defaults when the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VpnBarError> {
        let path = path.into();
        let settings = match Settings::from_file(&path) {
            Ok(settings) => settings,
            Err(VpnBarError::Config(ConfigError::LoadFailed { .. })) => {
                debug!("No settings file at {:?}, using defaults", path);
                Settings::default()
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path: Some(path),
            settings: Mutex::new(settings),
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            settings: Mutex::new(settings),
        }
    }

    /// Current settings
    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    /// Connection policy
    pub fn policy(&self) -> ConnectionPolicy {
        self.lock().policy.clone()
    }

    /// Configured update interval, already clamped
    pub fn update_interval(&self) -> Duration {
        clamp_update_interval(Duration::from_secs(self.lock().update_interval_secs))
    }

    /// Store a new update interval and return the clamped value actually stored
    pub fn set_update_interval(&self, interval: Duration) -> Duration {
        let clamped = clamp_update_interval(interval);
        self.update(|settings| settings.update_interval_secs = clamped.as_secs());
        clamped
    }

    pub fn notifications_enabled(&self) -> bool {
        self.lock().notifications_enabled
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.update(|settings| settings.notifications_enabled = enabled);
    }

    pub fn last_used_connection(&self) -> Option<String> {
        self.lock().last_used_connection_id.clone()
    }

    pub fn set_last_used_connection(&self, id: &str) {
        self.update(|settings| settings.last_used_connection_id = Some(id.to_string()));
    }

    fn update(&self, apply: impl FnOnce(&mut Settings)) {
        let snapshot = {
            let mut settings = self.lock();
            apply(&mut settings);
            settings.clone()
        };

        if let Some(path) = &self.path {
            if let Err(e) = snapshot.to_file(path) {
                warn!("Failed to persist settings to {:?}: {}", path, e);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        // Settings are plain data; a poisoned lock still holds a usable value
        self.settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the default configuration directory
///
/// Returns `$VPNBAR_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/vpnbar`,
/// otherwise `~/.config/vpnbar`.
pub fn get_config_dir() -> Result<PathBuf, VpnBarError> {
    // Allow tests to override config directory via environment variable
    if let Ok(config_dir) = std::env::var("VPNBAR_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("vpnbar"));
        }
    }

    let home = std::env::var("HOME").map_err(|_| {
        VpnBarError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("vpnbar"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, VpnBarError> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}
