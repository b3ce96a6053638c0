//! Error types for the vpnbar agent
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and user-friendly error messages.

use thiserror::Error;

/// Main error type for the vpnbar application
#[derive(Error, Debug)]
pub enum VpnBarError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to VPN connection operations
    #[error("VPN error: {0}")]
    Vpn(#[from] VpnError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON (statistics/history store) errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// VPN orchestration errors
///
/// Recorded as the manager's last error; never fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VpnError {
    /// No VPN configurations are present on the system
    #[error("No VPN configurations found")]
    NoConfigurations,

    #[error("Connection not found: {id}")]
    ConnectionNotFound { id: String },

    #[error("Session not found for connection: {id}")]
    SessionNotFound { id: String },

    #[error("Failed to create session for connection: {id}")]
    SessionCreationFailed { id: String },

    #[error("Failed to load VPN framework: {reason}")]
    FrameworkLoadFailed { reason: String },

    #[error("{}", connection_failed_message(.reason))]
    ConnectionFailed { reason: Option<String> },

    /// The native VPN subsystem is absent or unreachable
    #[error("VPN configuration manager unavailable")]
    SharedManagerUnavailable,
}

/// Cause recorded when a disconnect is not confirmed in time
pub const TIMEOUT_REASON: &str = "timeout";

fn connection_failed_message(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!("Connection failed: {}", reason),
        None => "Connection failed".to_string(),
    }
}

impl VpnError {
    /// `ConnectionFailed` with a human-readable cause
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: Some(reason.into()),
        }
    }

    /// The synthetic error recorded by the disconnect timeout guard
    pub fn timeout() -> Self {
        Self::connection_failed(TIMEOUT_REASON)
    }

    /// Whether this error is a disconnect timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionFailed { reason: Some(r) } if r == TIMEOUT_REASON)
    }

    /// Invalid or unknown id; retrying will never help
    pub fn is_addressing(&self) -> bool {
        matches!(
            self,
            Self::ConnectionNotFound { .. } | Self::SessionNotFound { .. }
        )
    }
}

/// Validation errors for ConnectionPolicy
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyValidationError {
    #[error("retry_count must be between 1 and 10, got: {0}")]
    InvalidRetryCount(u32),

    #[error("retry_base_delay_ms must be between 1 and 60000, got: {0}")]
    InvalidRetryBaseDelay(u64),

    #[error("disconnect_timeout_ms must be between 100 and 300000, got: {0}")]
    InvalidDisconnectTimeout(u64),

    #[error("confirm_refresh_delay_ms ({0}) must be lower than disconnect_timeout_ms ({1})")]
    ConfirmDelayNotBelowTimeout(u64, u64),

    #[error("status_poll_interval_ms must be between 100 and 600000, got: {0}")]
    InvalidStatusPollInterval(u64),

    #[error("reload_interval_ms must be between 1000 and 3600000, got: {0}")]
    InvalidReloadInterval(u64),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, VpnBarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_display() {
        assert_eq!(
            VpnError::ConnectionFailed { reason: None }.to_string(),
            "Connection failed"
        );
        assert_eq!(VpnError::timeout().to_string(), "Connection failed: timeout");
    }

    #[test]
    fn test_error_classification() {
        assert!(VpnError::timeout().is_timeout());
        assert!(!VpnError::connection_failed("refused").is_timeout());
        assert!(VpnError::ConnectionNotFound { id: "a".into() }.is_addressing());
        assert!(VpnError::SessionNotFound { id: "a".into() }.is_addressing());
        assert!(!VpnError::NoConfigurations.is_addressing());
    }

    #[test]
    fn test_vpn_error_converts_into_top_level() {
        let err: VpnBarError = VpnError::SharedManagerUnavailable.into();
        assert!(matches!(err, VpnBarError::Vpn(VpnError::SharedManagerUnavailable)));
    }
}
