//! Configuration module
//!
//! Update-interval bounds, the connection policy (retry, timeout and
//! polling constants) and the persisted settings store.

use crate::error::PolicyValidationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod toml_config;

pub use toml_config::{Settings, SettingsStore};

/// Lower bound for the connection list update interval
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for the connection list update interval
pub const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(120);

/// Update interval used when nothing is configured
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(15);

/// Clamp an update interval into `[MIN_UPDATE_INTERVAL, MAX_UPDATE_INTERVAL]`
pub fn clamp_update_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_UPDATE_INTERVAL, MAX_UPDATE_INTERVAL)
}

/// Retry, timeout and polling behaviour of the connection orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPolicy {
    /// Default number of connection attempts
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base delay for exponential backoff between attempts
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// How long a disconnect may stay unconfirmed before it is forced
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_ms: u64,

    /// Delay before re-reading the native status after a start/stop call
    #[serde(default = "default_confirm_refresh_delay")]
    pub confirm_refresh_delay_ms: u64,

    /// Status monitor polling interval
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval_ms: u64,

    /// Minimum time between two full configuration reloads
    #[serde(default = "default_reload_interval")]
    pub reload_interval_ms: u64,
}

fn default_retry_count() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1_000
}
fn default_disconnect_timeout() -> u64 {
    30_000
}
fn default_confirm_refresh_delay() -> u64 {
    500
}
fn default_status_poll_interval() -> u64 {
    5_000
}
fn default_reload_interval() -> u64 {
    30_000
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay(),
            disconnect_timeout_ms: default_disconnect_timeout(),
            confirm_refresh_delay_ms: default_confirm_refresh_delay(),
            status_poll_interval_ms: default_status_poll_interval(),
            reload_interval_ms: default_reload_interval(),
        }
    }
}

impl ConnectionPolicy {
    /// Validate the entire policy
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        if !(1..=10).contains(&self.retry_count) {
            return Err(PolicyValidationError::InvalidRetryCount(self.retry_count));
        }
        if !(1..=60_000).contains(&self.retry_base_delay_ms) {
            return Err(PolicyValidationError::InvalidRetryBaseDelay(
                self.retry_base_delay_ms,
            ));
        }
        if !(100..=300_000).contains(&self.disconnect_timeout_ms) {
            return Err(PolicyValidationError::InvalidDisconnectTimeout(
                self.disconnect_timeout_ms,
            ));
        }
        if self.confirm_refresh_delay_ms >= self.disconnect_timeout_ms {
            return Err(PolicyValidationError::ConfirmDelayNotBelowTimeout(
                self.confirm_refresh_delay_ms,
                self.disconnect_timeout_ms,
            ));
        }
        if !(100..=600_000).contains(&self.status_poll_interval_ms) {
            return Err(PolicyValidationError::InvalidStatusPollInterval(
                self.status_poll_interval_ms,
            ));
        }
        if !(1_000..=3_600_000).contains(&self.reload_interval_ms) {
            return Err(PolicyValidationError::InvalidReloadInterval(
                self.reload_interval_ms,
            ));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed)
    ///
    /// Formula: base × 2^(attempt-1)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1u64 << exponent))
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn confirm_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_refresh_delay_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(ConnectionPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_clamp_update_interval() {
        assert_eq!(clamp_update_interval(Duration::from_secs(1)), MIN_UPDATE_INTERVAL);
        assert_eq!(clamp_update_interval(Duration::from_secs(500)), MAX_UPDATE_INTERVAL);
        assert_eq!(
            clamp_update_interval(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_confirm_delay_must_stay_below_timeout() {
        let policy = ConnectionPolicy {
            confirm_refresh_delay_ms: 1_000,
            disconnect_timeout_ms: 1_000,
            ..ConnectionPolicy::default()
        };
        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::ConfirmDelayNotBelowTimeout(1_000, 1_000))
        );
    }
}
