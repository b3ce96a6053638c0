//! Shared fixtures for orchestrator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vpnbar_core::config::{ConnectionPolicy, Settings, SettingsStore};
use vpnbar_core::error::VpnError;
use vpnbar_core::native::MemoryProvider;
use vpnbar_core::sinks::ConnectionEventSink;
use vpnbar_core::types::ConnectionProfile;
use vpnbar_core::vpn::{ConfigurationLoader, ManagerDeps, ManagerState, VpnManager};

/// Generous upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

type Response = (Duration, Result<Vec<ConnectionProfile>, VpnError>);

/// Loader returning scripted responses in order; the last one repeats
pub struct ScriptedLoader {
    responses: Mutex<VecDeque<Response>>,
    calls: AtomicU32,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn respond(self, profiles: &[(&str, &str)]) -> Self {
        self.respond_after(Duration::ZERO, profiles)
    }

    pub fn respond_after(self, delay: Duration, profiles: &[(&str, &str)]) -> Self {
        let profiles = profiles
            .iter()
            .map(|(id, name)| ConnectionProfile::new(*id, *name))
            .collect();
        self.responses.lock().unwrap().push_back((delay, Ok(profiles)));
        self
    }

    pub fn fail_with(self, error: VpnError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back((Duration::ZERO, Err(error)));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationLoader for ScriptedLoader {
    async fn load_configurations(&self) -> Result<Vec<ConnectionProfile>, VpnError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses
                    .front()
                    .cloned()
                    .unwrap_or((Duration::ZERO, Ok(Vec::new())))
            }
        };
        tokio::time::sleep(delay).await;
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Connected(String),
    Disconnected(String),
}

/// Sink remembering every call
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn connected(&self, id: &str) -> usize {
        self.count(&SinkEvent::Connected(id.to_string()))
    }

    pub fn disconnected(&self, id: &str) -> usize {
        self.count(&SinkEvent::Disconnected(id.to_string()))
    }

    fn count(&self, event: &SinkEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

impl ConnectionEventSink for RecordingSink {
    fn on_connected(&self, id: &str, _name: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Connected(id.to_string()));
    }

    fn on_disconnected(&self, id: &str, _name: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Disconnected(id.to_string()));
    }
}

/// Short timings so scenarios finish in well under a second
pub fn fast_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        retry_count: 3,
        retry_base_delay_ms: 50,
        disconnect_timeout_ms: 1_000,
        confirm_refresh_delay_ms: 50,
        status_poll_interval_ms: 100,
        reload_interval_ms: 60_000,
    }
}

pub struct Harness {
    pub manager: VpnManager,
    pub provider: MemoryProvider,
    pub loader: Arc<ScriptedLoader>,
    pub sink: Arc<RecordingSink>,
    pub settings: Arc<SettingsStore>,
}

pub fn start(provider: MemoryProvider, loader: ScriptedLoader, policy: ConnectionPolicy) -> Harness {
    let loader = Arc::new(loader);
    let sink = Arc::new(RecordingSink::default());
    let settings = Arc::new(SettingsStore::in_memory(Settings {
        policy,
        ..Settings::default()
    }));

    let manager = VpnManager::start(ManagerDeps {
        provider: Arc::new(provider.clone()),
        loader: loader.clone(),
        sinks: vec![sink.clone() as Arc<dyn ConnectionEventSink>],
        settings: settings.clone(),
    })
    .expect("manager should start");

    Harness {
        manager,
        provider,
        loader,
        sink,
        settings,
    }
}

impl Harness {
    /// Force a load and wait until it is applied
    pub async fn load(&self) -> ManagerState {
        self.manager.load_connections(true);
        self.wait_for(|s| s.loaded).await
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&ManagerState) -> bool) -> ManagerState {
        tokio::time::timeout(WAIT, self.manager.wait_for(predicate))
            .await
            .expect("timed out waiting for manager state")
            .expect("manager stopped")
    }
}
