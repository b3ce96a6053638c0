//! Scriptable in-memory session provider
//!
//! Behaves like a native VPN subsystem without touching the system:
//! profiles, statuses, failures and confirmation delays are configured by
//! the caller. Used by the test suite and by `vpnbar --provider memory`.

use crate::error::VpnError;
use crate::native::{EventHandler, NativeProfile, NativeSession, NativeSessionProvider, SessionEvent};
use crate::types::NativeStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    profiles: Vec<NativeProfile>,
    statuses: HashMap<String, NativeStatus>,
    create_failures: HashMap<String, u32>,
    start_failures: HashMap<String, u32>,
    create_delay: Duration,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    handlers: HashMap<String, Vec<(u64, EventHandler)>>,
    next_session: u64,
    sessions_created: u32,
    sessions_released: u32,
    start_calls: HashMap<String, u32>,
    stop_calls: HashMap<String, u32>,
}

/// In-memory provider; clones share the same simulated system
#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set `status` for `id` and notify every live session of that id
fn transition(state: &Mutex<MemoryState>, id: &str, status: NativeStatus, event: SessionEvent) {
    let handlers: Vec<EventHandler> = {
        let mut guard = lock(state);
        guard.statuses.insert(id.to_string(), status);
        guard
            .handlers
            .get(id)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default()
    };

    for handler in handlers {
        handler(event);
    }
}

/// Move to `status` after `delay` on a helper thread
fn transition_later(
    state: &Arc<Mutex<MemoryState>>,
    id: &str,
    status: NativeStatus,
    event: SessionEvent,
    delay: Duration,
) {
    let state = Arc::clone(state);
    let id = id.to_string();
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        transition(&state, &id, status, event);
    });
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user-facing profile
    pub fn with_profile(self, id: &str, name: &str) -> Self {
        self.add_profile(id, name, false);
        self
    }

    /// Add a profile that loaders must hide
    pub fn with_system_profile(self, id: &str, name: &str) -> Self {
        self.add_profile(id, name, true);
        self
    }

    fn add_profile(&self, id: &str, name: &str, system: bool) {
        lock(&self.state).profiles.push(NativeProfile {
            id: id.to_string(),
            name: name.to_string(),
            system,
        });
    }

    /// Drop a profile from the simulated configuration
    pub fn remove_profile(&self, id: &str) {
        lock(&self.state).profiles.retain(|p| p.id != id);
    }

    /// Confirm starts with `Connected` after `delay` (`None`: stay `Connecting`)
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        lock(&self.state).connect_delay = delay;
    }

    /// Confirm stops with `Disconnected` after `delay` (`None`: never confirm)
    pub fn set_disconnect_delay(&self, delay: Option<Duration>) {
        lock(&self.state).disconnect_delay = delay;
    }

    /// Make session creation block for `delay`
    pub fn set_create_delay(&self, delay: Duration) {
        lock(&self.state).create_delay = delay;
    }

    /// Fail the next `times` session creations for `id`
    pub fn fail_session_creation(&self, id: &str, times: u32) {
        lock(&self.state).create_failures.insert(id.to_string(), times);
    }

    /// Fail the next `times` start calls for `id`
    pub fn fail_start(&self, id: &str, times: u32) {
        lock(&self.state).start_failures.insert(id.to_string(), times);
    }

    /// Change the status and fire native events
    pub fn set_status(&self, id: &str, status: NativeStatus) {
        transition(&self.state, id, status, SessionEvent::StatusChanged);
    }

    /// Change the status without any event, like a tunnel torn down behind our back
    pub fn set_status_silently(&self, id: &str, status: NativeStatus) {
        lock(&self.state).statuses.insert(id.to_string(), status);
    }

    pub fn status_of(&self, id: &str) -> NativeStatus {
        lock(&self.state)
            .statuses
            .get(id)
            .copied()
            .unwrap_or(NativeStatus::Disconnected)
    }

    pub fn sessions_created(&self) -> u32 {
        lock(&self.state).sessions_created
    }

    pub fn sessions_released(&self) -> u32 {
        lock(&self.state).sessions_released
    }

    /// Handles created and not yet released
    pub fn live_sessions(&self) -> u32 {
        let state = lock(&self.state);
        state.sessions_created - state.sessions_released
    }

    /// Start attempts for `id`, failed ones included
    pub fn start_calls(&self, id: &str) -> u32 {
        lock(&self.state).start_calls.get(id).copied().unwrap_or(0)
    }

    pub fn stop_calls(&self, id: &str) -> u32 {
        lock(&self.state).stop_calls.get(id).copied().unwrap_or(0)
    }
}

impl NativeSessionProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_profiles(&self) -> Result<Vec<NativeProfile>, VpnError> {
        Ok(lock(&self.state).profiles.clone())
    }

    fn create_session(&self, id: &str) -> Result<Box<dyn NativeSession>, VpnError> {
        let delay = {
            let mut state = lock(&self.state);
            if let Some(remaining) = state.create_failures.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(VpnError::SessionCreationFailed { id: id.to_string() });
                }
            }
            state.create_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = lock(&self.state);
        state.next_session += 1;
        state.sessions_created += 1;
        state
            .statuses
            .entry(id.to_string())
            .or_insert(NativeStatus::Disconnected);

        Ok(Box::new(MemorySession {
            id: id.to_string(),
            serial: state.next_session,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    id: String,
    serial: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySession {
    fn detach_handler(&self) {
        let mut state = lock(&self.state);
        if let Some(list) = state.handlers.get_mut(&self.id) {
            list.retain(|(serial, _)| *serial != self.serial);
        }
    }
}

impl NativeSession for MemorySession {
    fn start(&self) -> Result<(), VpnError> {
        let connect_delay = {
            let mut state = lock(&self.state);
            *state.start_calls.entry(self.id.clone()).or_insert(0) += 1;
            if let Some(remaining) = state.start_failures.get_mut(&self.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(VpnError::connection_failed("simulated start failure"));
                }
            }
            state.connect_delay
        };

        transition(&self.state, &self.id, NativeStatus::Connecting, SessionEvent::StatusChanged);
        if let Some(delay) = connect_delay {
            transition_later(&self.state, &self.id, NativeStatus::Connected, SessionEvent::Connected, delay);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), VpnError> {
        let disconnect_delay = {
            let mut state = lock(&self.state);
            *state.stop_calls.entry(self.id.clone()).or_insert(0) += 1;
            state.disconnect_delay
        };

        transition(&self.state, &self.id, NativeStatus::Disconnecting, SessionEvent::StatusChanged);
        if let Some(delay) = disconnect_delay {
            transition_later(
                &self.state,
                &self.id,
                NativeStatus::Disconnected,
                SessionEvent::StatusChanged,
                delay,
            );
        }
        Ok(())
    }

    fn status(&self) -> NativeStatus {
        lock(&self.state)
            .statuses
            .get(&self.id)
            .copied()
            .unwrap_or(NativeStatus::Invalid)
    }

    fn set_event_handler(&mut self, handler: EventHandler) {
        lock(&self.state)
            .handlers
            .entry(self.id.clone())
            .or_default()
            .push((self.serial, handler));
    }

    fn cancel(&self) {
        self.detach_handler();
    }

    fn release(self: Box<Self>) {
        self.detach_handler();
        lock(&self.state).sessions_released += 1;
    }
}
