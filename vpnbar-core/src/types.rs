//! Shared connection model
//!
//! Types exchanged between the session pool, the status monitor and the
//! connection orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User-facing status of a VPN connection
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not connected
    #[default]
    Disconnected,

    /// Attempting to establish connection
    Connecting,

    /// Successfully connected
    Connected,

    /// Tearing the tunnel down
    Disconnecting,
}

impl ConnectionStatus {
    /// `true` when the connection is up or coming up
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Status as reported by the native session layer
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    /// Unknown, or no session for the id
    #[default]
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl From<NativeStatus> for ConnectionStatus {
    fn from(status: NativeStatus) -> Self {
        match status {
            NativeStatus::Connected => ConnectionStatus::Connected,
            NativeStatus::Connecting => ConnectionStatus::Connecting,
            NativeStatus::Disconnecting => ConnectionStatus::Disconnecting,
            NativeStatus::Disconnected | NativeStatus::Invalid => ConnectionStatus::Disconnected,
        }
    }
}

/// A VPN connection known to the orchestrator
///
/// Two connections are equal when they share the same id and status; the
/// display name does not take part in equality.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Connection {
    /// Stable identifier derived from the system profile UUID
    pub id: String,

    /// Display name
    pub name: String,

    /// Current status
    pub status: ConnectionStatus,
}

impl Connection {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ConnectionStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.status == other.status
    }
}

impl Eq for Connection {}

/// A `(id, name)` pair produced by a configuration loader
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
}

impl ConnectionProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
