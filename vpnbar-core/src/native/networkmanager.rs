//! NetworkManager session provider
//!
//! Talks to NetworkManager over the system D-Bus using the blocking zbus
//! API. Only profiles of type `vpn` and `wireguard` are exposed; the
//! profile UUID is the connection id.
//!
//! Each session with an event handler owns a watcher thread subscribed to
//! `Connection.Active.StateChanged`, so tunnel transitions started outside
//! of this process are reported as they happen.

use crate::error::VpnError;
use crate::native::{EventHandler, NativeProfile, NativeSession, NativeSessionProvider, SessionEvent};
use crate::types::NativeStatus;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use zbus::blocking::{Connection, MessageIterator, Proxy};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

const NM_BUS_NAME: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_INTERFACE: &str = "org.freedesktop.NetworkManager";
const NM_SETTINGS_PATH: &str = "/org/freedesktop/NetworkManager/Settings";
const NM_SETTINGS_INTERFACE: &str = "org.freedesktop.NetworkManager.Settings";
const NM_CONNECTION_INTERFACE: &str = "org.freedesktop.NetworkManager.Settings.Connection";
const NM_ACTIVE_INTERFACE: &str = "org.freedesktop.NetworkManager.Connection.Active";

/// Connection types shown to the user
const VPN_CONNECTION_TYPES: [&str; 2] = ["vpn", "wireguard"];

type ConnectionSettings = HashMap<String, HashMap<String, OwnedValue>>;

fn dbus_failure(e: impl std::fmt::Display) -> VpnError {
    VpnError::connection_failed(format!("D-Bus call failed: {}", e))
}

/// Map `NMActiveConnectionState` to a native status
fn native_status_from_state(state: u32) -> NativeStatus {
    match state {
        1 => NativeStatus::Connecting,
        2 => NativeStatus::Connected,
        3 => NativeStatus::Disconnecting,
        4 => NativeStatus::Disconnected,
        _ => NativeStatus::Invalid,
    }
}

/// `NMActiveConnectionStateReason` values that mean a requested teardown
const REASON_NONE: u32 = 1;
const REASON_USER_DISCONNECTED: u32 = 2;

/// Map an active-connection `StateChanged(state, reason)` signal to an event
fn session_event_for(state: u32, reason: u32) -> SessionEvent {
    match (state, reason) {
        (2, _) => SessionEvent::Connected,
        (4, REASON_NONE | REASON_USER_DISCONNECTED) => SessionEvent::StatusChanged,
        (4, _) => SessionEvent::Failed,
        _ => SessionEvent::StatusChanged,
    }
}

/// Session provider backed by NetworkManager
pub struct NetworkManagerProvider {
    connection: Connection,
}

impl NetworkManagerProvider {
    /// Connect to the system bus and verify NetworkManager is running
    ///
    /// # Errors
    ///
    /// `FrameworkLoadFailed` when the system bus is unreachable,
    /// `SharedManagerUnavailable` when NetworkManager owns no bus name.
    #[tracing::instrument]
    pub fn new() -> Result<Self, VpnError> {
        let connection = Connection::system().map_err(|e| VpnError::FrameworkLoadFailed {
            reason: e.to_string(),
        })?;

        let dbus = zbus::blocking::fdo::DBusProxy::new(&connection).map_err(|e| {
            VpnError::FrameworkLoadFailed {
                reason: e.to_string(),
            }
        })?;
        let bus_name = zbus::names::BusName::try_from(NM_BUS_NAME).map_err(|e| {
            VpnError::FrameworkLoadFailed {
                reason: e.to_string(),
            }
        })?;
        let has_owner = dbus
            .name_has_owner(bus_name)
            .map_err(|_| VpnError::SharedManagerUnavailable)?;

        if !has_owner {
            return Err(VpnError::SharedManagerUnavailable);
        }

        Ok(Self { connection })
    }

    fn proxy<'a>(&self, path: &'a str, interface: &'a str) -> Result<Proxy<'a>, VpnError> {
        Proxy::new(&self.connection, NM_BUS_NAME, path, interface).map_err(dbus_failure)
    }

    fn read_profile(&self, path: &OwnedObjectPath) -> Result<Option<NativeProfile>, VpnError> {
        let proxy = self.proxy(path.as_str(), NM_CONNECTION_INTERFACE)?;
        let mut settings: ConnectionSettings =
            proxy.call("GetSettings", &()).map_err(dbus_failure)?;

        let Some(mut section) = settings.remove("connection") else {
            return Ok(None);
        };

        let kind = section
            .remove("type")
            .and_then(|v| String::try_from(v).ok())
            .unwrap_or_default();
        if !VPN_CONNECTION_TYPES.contains(&kind.as_str()) {
            return Ok(None);
        }

        let uuid = section.remove("uuid").and_then(|v| String::try_from(v).ok());
        let name = section.remove("id").and_then(|v| String::try_from(v).ok());

        Ok(match (uuid, name) {
            (Some(uuid), Some(name)) => Some(NativeProfile {
                id: uuid,
                name,
                system: false,
            }),
            _ => None,
        })
    }
}

impl NativeSessionProvider for NetworkManagerProvider {
    fn name(&self) -> &str {
        "networkmanager"
    }

    fn list_profiles(&self) -> Result<Vec<NativeProfile>, VpnError> {
        let settings = self.proxy(NM_SETTINGS_PATH, NM_SETTINGS_INTERFACE)?;
        let paths: Vec<OwnedObjectPath> =
            settings.call("ListConnections", &()).map_err(dbus_failure)?;

        let mut profiles = Vec::new();
        for path in &paths {
            match self.read_profile(path) {
                Ok(Some(profile)) => profiles.push(profile),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable connection {}: {}", path.as_str(), e),
            }
        }

        debug!(count = profiles.len(), "Listed NetworkManager VPN profiles");
        Ok(profiles)
    }

    fn create_session(&self, id: &str) -> Result<Box<dyn NativeSession>, VpnError> {
        let settings = self.proxy(NM_SETTINGS_PATH, NM_SETTINGS_INTERFACE)?;
        let path: OwnedObjectPath = settings
            .call("GetConnectionByUuid", &(id,))
            .map_err(|e| {
                debug!("GetConnectionByUuid({}) failed: {}", id, e);
                VpnError::SessionCreationFailed { id: id.to_string() }
            })?;

        Ok(Box::new(NetworkManagerSession {
            connection: self.connection.clone(),
            uuid: id.to_string(),
            settings_path: path,
            handler: Arc::new(Mutex::new(None)),
            active_paths: Arc::new(Mutex::new(HashSet::new())),
            watching: None,
        }))
    }
}

struct NetworkManagerSession {
    connection: Connection,
    uuid: String,
    settings_path: OwnedObjectPath,
    handler: Arc<Mutex<Option<EventHandler>>>,
    /// Active-connection objects known to belong to this profile
    active_paths: Arc<Mutex<HashSet<OwnedObjectPath>>>,
    /// Stop flag of the signal watcher thread, when one runs
    watching: Option<Arc<AtomicBool>>,
}

/// Shared state of a signal watcher thread
struct SignalWatcher {
    connection: Connection,
    uuid: String,
    handler: Arc<Mutex<Option<EventHandler>>>,
    active_paths: Arc<Mutex<HashSet<OwnedObjectPath>>>,
    stopped: Arc<AtomicBool>,
}

impl SignalWatcher {
    fn spawn(self) -> std::io::Result<()> {
        let name = format!("nm-signals-{}", self.uuid);
        std::thread::Builder::new().name(name).spawn(move || {
            if let Err(e) = self.run() {
                warn!(uuid = %self.uuid, "Signal watcher stopped: {}", e);
            }
        })?;
        Ok(())
    }

    fn run(&self) -> zbus::Result<()> {
        let rule = zbus::MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(NM_ACTIVE_INTERFACE)?
            .member("StateChanged")?
            .build();
        let signals = MessageIterator::for_match_rule(rule, &self.connection, None)?;

        // The iterator blocks; a stop request takes effect on the next signal
        for message in signals {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let message = message?;
            let header = message.header();
            let Some(path) = header.path() else {
                continue;
            };
            let path = OwnedObjectPath::from(path.clone());
            if !self.is_ours(&path) {
                continue;
            }

            let body = message.body();
            let Ok((state, reason)) = body.deserialize::<(u32, u32)>() else {
                continue;
            };
            debug!(uuid = %self.uuid, state, reason, "Active connection state changed");
            if state == 4 {
                self.lock_paths().remove(&path);
            }

            let handler = self
                .handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(handler) = handler {
                handler(session_event_for(state, reason));
            }
        }

        debug!(uuid = %self.uuid, "Signal watcher finished");
        Ok(())
    }

    /// Whether `path` is an active connection of this profile
    fn is_ours(&self, path: &OwnedObjectPath) -> bool {
        if self.lock_paths().contains(path) {
            return true;
        }

        // Activated elsewhere, e.g. from the desktop applet
        let uuid = Proxy::new(&self.connection, NM_BUS_NAME, path.as_str(), NM_ACTIVE_INTERFACE)
            .ok()
            .and_then(|proxy| proxy.get_property::<String>("Uuid").ok());
        match uuid {
            Some(uuid) if uuid == self.uuid => {
                self.lock_paths().insert(path.clone());
                true
            }
            _ => false,
        }
    }

    fn lock_paths(&self) -> std::sync::MutexGuard<'_, HashSet<OwnedObjectPath>> {
        self.active_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl NetworkManagerSession {
    fn manager(&self) -> Result<Proxy<'static>, VpnError> {
        Proxy::new(&self.connection, NM_BUS_NAME, NM_PATH, NM_INTERFACE).map_err(dbus_failure)
    }

    /// Active connection object for this profile, if any
    fn active_connection(&self) -> Result<Option<(OwnedObjectPath, u32)>, VpnError> {
        let manager = self.manager()?;
        let active: Vec<OwnedObjectPath> = manager
            .get_property("ActiveConnections")
            .map_err(dbus_failure)?;

        for path in active {
            let proxy = Proxy::new(
                &self.connection,
                NM_BUS_NAME,
                path.as_str(),
                NM_ACTIVE_INTERFACE,
            )
            .map_err(dbus_failure)?;

            // Active connections may vanish between the two reads
            let Ok(uuid) = proxy.get_property::<String>("Uuid") else {
                continue;
            };
            if uuid == self.uuid {
                let state: u32 = proxy.get_property("State").unwrap_or(0);
                return Ok(Some((path.clone(), state)));
            }
        }

        Ok(None)
    }

    fn notify(&self, event: SessionEvent) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

impl NativeSession for NetworkManagerSession {
    #[tracing::instrument(skip(self), fields(uuid = %self.uuid))]
    fn start(&self) -> Result<(), VpnError> {
        let root = ObjectPath::try_from("/")
            .map(OwnedObjectPath::from)
            .map_err(dbus_failure)?;

        let active: OwnedObjectPath = self
            .manager()?
            .call(
                "ActivateConnection",
                &(self.settings_path.clone(), root.clone(), root),
            )
            .map_err(|e| VpnError::connection_failed(e.to_string()))?;
        self.active_paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(active);

        self.notify(SessionEvent::StatusChanged);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(uuid = %self.uuid))]
    fn stop(&self) -> Result<(), VpnError> {
        let Some((active, _)) = self.active_connection()? else {
            debug!("No active connection to deactivate");
            self.notify(SessionEvent::StatusChanged);
            return Ok(());
        };

        let () = self
            .manager()?
            .call("DeactivateConnection", &(active,))
            .map_err(|e| VpnError::connection_failed(e.to_string()))?;

        self.notify(SessionEvent::StatusChanged);
        Ok(())
    }

    fn status(&self) -> NativeStatus {
        match self.active_connection() {
            Ok(Some((_, state))) => native_status_from_state(state),
            Ok(None) => NativeStatus::Disconnected,
            Err(e) => {
                warn!(uuid = %self.uuid, "Failed to query status: {}", e);
                NativeStatus::Invalid
            }
        }
    }

    fn set_event_handler(&mut self, handler: EventHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        if self.watching.is_some() {
            return;
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let watcher = SignalWatcher {
            connection: self.connection.clone(),
            uuid: self.uuid.clone(),
            handler: Arc::clone(&self.handler),
            active_paths: Arc::clone(&self.active_paths),
            stopped: Arc::clone(&stopped),
        };
        match watcher.spawn() {
            Ok(()) => {
                info!(uuid = %self.uuid, "Watching NetworkManager state signals");
                self.watching = Some(stopped);
            }
            // Status still arrives through polling
            Err(e) => warn!(uuid = %self.uuid, "Failed to start signal watcher: {}", e),
        }
    }

    fn cancel(&self) {
        if let Some(stopped) = &self.watching {
            stopped.store(true, Ordering::SeqCst);
        }
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn release(self: Box<Self>) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_state_mapping() {
        assert_eq!(native_status_from_state(0), NativeStatus::Invalid);
        assert_eq!(native_status_from_state(1), NativeStatus::Connecting);
        assert_eq!(native_status_from_state(2), NativeStatus::Connected);
        assert_eq!(native_status_from_state(3), NativeStatus::Disconnecting);
        assert_eq!(native_status_from_state(4), NativeStatus::Disconnected);
        assert_eq!(native_status_from_state(99), NativeStatus::Invalid);
    }

    #[test]
    fn test_state_signal_events() {
        assert_eq!(session_event_for(1, 0), SessionEvent::StatusChanged);
        assert_eq!(session_event_for(2, 1), SessionEvent::Connected);
        assert_eq!(session_event_for(3, 2), SessionEvent::StatusChanged);
        assert_eq!(session_event_for(4, REASON_USER_DISCONNECTED), SessionEvent::StatusChanged);
        assert_eq!(session_event_for(4, REASON_NONE), SessionEvent::StatusChanged);
        // e.g. NM_ACTIVE_CONNECTION_STATE_REASON_LOGIN_FAILED
        assert_eq!(session_event_for(4, 10), SessionEvent::Failed);
    }
}
