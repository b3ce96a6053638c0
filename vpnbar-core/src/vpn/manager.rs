//! Connection orchestrator
//!
//! `VpnManager` is a cheap, cloneable handle to a single actor task that
//! owns the connection registry. Every state mutation happens inside that
//! task; the handle only sends commands and reads the latest published
//! [`ManagerState`] from a `watch` channel.
//!
//! ```text
//!  VpnManager ──Command──▶ ManagerActor ◀──StatusUpdate── SessionPool
//!      ▲                     │    ▲                          ▲
//!      └──── watch ──────────┘    └── spawned tasks ─────────┘
//!                                (load, connect, stop, guards)
//! ```

use crate::config::{ConnectionPolicy, SettingsStore};
use crate::error::VpnError;
use crate::native::NativeSessionProvider;
use crate::sinks::ConnectionEventSink;
use crate::types::{Connection, ConnectionProfile, ConnectionStatus, NativeStatus};
use crate::vpn::loader::ConfigurationLoader;
use crate::vpn::session_pool::{SessionPool, StatusUpdate};
use crate::vpn::status_monitor::{StatusBatch, StatusMonitor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Collaborators injected into the orchestrator
pub struct ManagerDeps {
    pub provider: Arc<dyn NativeSessionProvider>,
    pub loader: Arc<dyn ConfigurationLoader>,
    pub sinks: Vec<Arc<dyn ConnectionEventSink>>,
    pub settings: Arc<SettingsStore>,
}

/// Snapshot published after every registry change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerState {
    /// Known connections, sorted by name
    pub connections: Vec<Connection>,

    /// `true` iff any connection is connecting or connected
    pub has_active_connection: bool,

    /// Last error; replaced by the next load/connect/disconnect outcome
    pub loading_error: Option<VpnError>,

    pub last_used_connection_id: Option<String>,

    /// Period of the reload timer
    pub update_interval: Duration,

    /// Set once the first load result has been applied
    pub loaded: bool,
}

impl ManagerState {
    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<ConnectionStatus> {
        self.connection(id).map(|c| c.status)
    }

    pub fn active_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| c.status.is_active())
    }
}

enum Command {
    Load {
        force: bool,
    },
    LoadFinished {
        generation: u64,
        result: Result<Vec<ConnectionProfile>, VpnError>,
    },
    Connect {
        id: String,
        retry_count: u32,
    },
    ConnectIssued {
        id: String,
        generation: u64,
    },
    ConnectFailed {
        id: String,
        generation: u64,
        error: VpnError,
    },
    Disconnect {
        id: String,
    },
    DisconnectFailed {
        id: String,
        error: VpnError,
    },
    DisconnectTimedOut {
        id: String,
        generation: u64,
    },
    Toggle {
        id: String,
    },
    DisconnectAll,
    /// Re-read the pool's cached status for `id`
    StatusReport {
        id: String,
    },
    SetUpdateInterval {
        interval: Duration,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the connection orchestrator
#[derive(Clone)]
pub struct VpnManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ManagerState>,
    pool: SessionPool,
    monitor: StatusMonitor,
    settings: Arc<SettingsStore>,
}

impl VpnManager {
    /// Build the session pool and status monitor and spawn the actor
    ///
    /// Must be called from within a tokio runtime. Nothing is loaded until
    /// [`VpnManager::load_connections`] is called or the reload timer fires.
    pub fn start(deps: ManagerDeps) -> Result<Self, VpnError> {
        let ManagerDeps {
            provider,
            loader,
            sinks,
            settings,
        } = deps;
        let policy = settings.policy();

        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let pool = SessionPool::new(provider, status_tx)?;
        let monitor = StatusMonitor::new(pool.clone(), policy.status_poll_interval());

        let update_interval = settings.update_interval();
        let initial = ManagerState {
            last_used_connection_id: settings.last_used_connection(),
            update_interval,
            ..ManagerState::default()
        };
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let (commands, command_rx) = mpsc::unbounded_channel();

        let actor = ManagerActor {
            state: initial,
            state_tx,
            commands: commands.downgrade(),
            pool: pool.clone(),
            monitor: monitor.clone(),
            loader,
            sinks,
            settings: Arc::clone(&settings),
            policy,
            ticker: reload_ticker(update_interval),
            load_generation: 0,
            load_task: None,
            last_full_load: None,
            task_generation: 0,
            connect_tasks: HashMap::new(),
            disconnect_guards: HashMap::new(),
            activated: HashSet::new(),
            announced: HashSet::new(),
        };

        monitor.start_monitoring();
        tokio::spawn(actor.run(command_rx, status_rx));

        Ok(Self {
            commands,
            state: state_rx,
            pool,
            monitor,
            settings,
        })
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("VPN manager is not running");
        }
    }

    fn ensure_known(&self, id: &str) -> Result<(), VpnError> {
        match self.state.borrow().connection(id) {
            Some(_) => Ok(()),
            None => Err(VpnError::ConnectionNotFound { id: id.to_string() }),
        }
    }

    /// Reload the configuration list
    ///
    /// Without `force`, a call within the reload interval of the last full
    /// load only refreshes statuses.
    pub fn load_connections(&self, force: bool) {
        self.send(Command::Load { force });
    }

    /// Start `id`, retrying up to `retry_count` attempts
    ///
    /// Returns once the request is queued. Unknown ids are rejected here and
    /// also recorded as the manager's last error.
    #[tracing::instrument(skip(self))]
    pub fn connect(&self, id: &str, retry_count: u32) -> Result<(), VpnError> {
        let known = self.ensure_known(id);
        self.send(Command::Connect {
            id: id.to_string(),
            retry_count,
        });
        known
    }

    /// Stop `id`, forcing `Disconnected` if the stop is not confirmed in time
    #[tracing::instrument(skip(self))]
    pub fn disconnect(&self, id: &str) -> Result<(), VpnError> {
        let checked = self.ensure_known(id).and_then(|()| {
            if self.pool.has_session(id) {
                Ok(())
            } else {
                Err(VpnError::SessionNotFound { id: id.to_string() })
            }
        });
        self.send(Command::Disconnect { id: id.to_string() });
        checked
    }

    /// Connect when inactive, disconnect when active
    #[tracing::instrument(skip(self))]
    pub fn toggle_connection(&self, id: &str) -> Result<(), VpnError> {
        let known = self.ensure_known(id);
        self.send(Command::Toggle { id: id.to_string() });
        known
    }

    pub fn disconnect_all(&self) {
        self.send(Command::DisconnectAll);
    }

    /// Store a new reload interval and restart the timer
    ///
    /// Returns the clamped value actually used.
    pub fn set_update_interval(&self, interval: Duration) -> Duration {
        let clamped = self.settings.set_update_interval(interval);
        if clamped != interval {
            debug!(requested = ?interval, ?clamped, "Update interval clamped");
        }
        self.send(Command::SetUpdateInterval { interval: clamped });
        clamped
    }

    pub fn update_interval(&self) -> Duration {
        self.state.borrow().update_interval
    }

    /// Latest published state
    pub fn state(&self) -> ManagerState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`
    ///
    /// Returns `None` when the manager stopped first.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ManagerState) -> bool,
    ) -> Option<ManagerState> {
        let mut state = self.state.clone();
        let result = state.wait_for(predicate).await;
        result.ok().map(|state| ManagerState::clone(&state))
    }

    /// Batches published by the status monitor
    pub fn status_updates(&self) -> broadcast::Receiver<StatusBatch> {
        self.monitor.subscribe()
    }

    /// Query the native status of `id` now
    pub async fn refresh_status(&self, id: &str) -> NativeStatus {
        self.monitor.refresh_status(id).await
    }

    /// Stop timers and pending tasks and release every session
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        self.send(Command::Shutdown { done });
        if finished.await.is_err() {
            debug!("VPN manager already stopped");
        }
    }
}

fn reload_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Wait, re-query the native status and ask the actor to apply it
async fn confirm_later(
    pool: &SessionPool,
    commands: &mpsc::UnboundedSender<Command>,
    id: &str,
    delay: Duration,
) {
    sleep(delay).await;
    pool.session_status(id).await;
    let _ = commands.send(Command::StatusReport { id: id.to_string() });
}

struct ConnectJob {
    id: String,
    attempts: u32,
    generation: u64,
    pool: SessionPool,
    policy: ConnectionPolicy,
    snapshot: watch::Receiver<ManagerState>,
    commands: mpsc::UnboundedSender<Command>,
}

async fn try_start(pool: &SessionPool, id: &str) -> Result<(), VpnError> {
    pool.get_or_create_session(id).await?;
    pool.start_connection(id).await
}

#[tracing::instrument(skip_all, fields(id = %job.id, attempts = job.attempts))]
async fn run_connect(job: ConnectJob) {
    let ConnectJob {
        id,
        attempts,
        generation,
        pool,
        policy,
        snapshot,
        commands,
    } = job;

    let mut last_error = VpnError::ConnectionFailed { reason: None };
    for attempt in 1..=attempts {
        if snapshot.borrow().connection(&id).is_none() {
            debug!("Connection removed, abandoning connect");
            return;
        }

        match try_start(&pool, &id).await {
            Ok(()) => {
                info!(attempt, "Start request accepted");
                let _ = commands.send(Command::ConnectIssued {
                    id: id.clone(),
                    generation,
                });
                confirm_later(&pool, &commands, &id, policy.confirm_refresh_delay()).await;
                return;
            }
            Err(e) if e.is_addressing() => {
                last_error = e;
                break;
            }
            Err(e) => {
                warn!(attempt, "Connection attempt failed: {}", e);
                last_error = e;
                if attempt < attempts {
                    let delay = policy.retry_delay(attempt);
                    debug!(?delay, "Retrying after backoff");
                    sleep(delay).await;
                }
            }
        }
    }

    let _ = commands.send(Command::ConnectFailed {
        id,
        generation,
        error: last_error,
    });
}

struct ManagerActor {
    state: ManagerState,
    state_tx: watch::Sender<ManagerState>,
    commands: mpsc::WeakUnboundedSender<Command>,
    pool: SessionPool,
    monitor: StatusMonitor,
    loader: Arc<dyn ConfigurationLoader>,
    sinks: Vec<Arc<dyn ConnectionEventSink>>,
    settings: Arc<SettingsStore>,
    policy: ConnectionPolicy,
    ticker: Interval,

    load_generation: u64,
    load_task: Option<JoinHandle<()>>,
    last_full_load: Option<Instant>,

    /// Tags connect tasks and disconnect guards so stale results are ignored
    task_generation: u64,
    connect_tasks: HashMap<String, (u64, JoinHandle<()>)>,
    disconnect_guards: HashMap<String, (u64, JoinHandle<()>)>,

    /// Ids that were connecting or connected since their last `Disconnected`
    activated: HashSet<String>,
    /// Ids whose `on_connected` already fired since their last `Disconnected`
    announced: HashSet<String>,
}

impl ManagerActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut statuses: mpsc::UnboundedReceiver<StatusUpdate>,
    ) {
        info!("VPN manager started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle(command).await {
                        return;
                    }
                }

                Some(update) = statuses.recv() => {
                    debug!(id = %update.id, status = ?update.status, "Native status update");
                    self.apply_native_status(&update.id);
                }

                _ = self.ticker.tick() => {
                    self.load_connections(false);
                }
            }
        }

        // Every handle is gone
        self.shutdown().await;
    }

    /// Returns `false` once the actor should stop
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Load { force } => self.load_connections(force),
            Command::LoadFinished { generation, result } => self.finish_load(generation, result),
            Command::Connect { id, retry_count } => self.connect(id, retry_count),
            Command::ConnectIssued { id, generation } => self.connect_issued(&id, generation),
            Command::ConnectFailed {
                id,
                generation,
                error,
            } => self.connect_failed(&id, generation, error),
            Command::Disconnect { id } => self.disconnect(id),
            Command::DisconnectFailed { id, error } => self.disconnect_failed(id, error),
            Command::DisconnectTimedOut { id, generation } => {
                self.disconnect_timed_out(&id, generation)
            }
            Command::Toggle { id } => self.toggle(id),
            Command::DisconnectAll => self.disconnect_all(),
            Command::StatusReport { id } => self.apply_native_status(&id),
            Command::SetUpdateInterval { interval } => self.restart_timer(interval),
            Command::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn publish(&mut self) {
        self.state.has_active_connection = self
            .state
            .connections
            .iter()
            .any(|c| c.status.is_active());
        self.state_tx.send_replace(self.state.clone());
    }

    fn record_error(&mut self, error: VpnError) {
        warn!("{}", error);
        self.state.loading_error = Some(error);
    }

    fn next_generation(&mut self) -> u64 {
        self.task_generation += 1;
        self.task_generation
    }

    fn remember_last_used(&mut self, id: &str) {
        if self.state.last_used_connection_id.as_deref() == Some(id) {
            return;
        }
        self.state.last_used_connection_id = Some(id.to_string());
        self.settings.set_last_used_connection(id);
    }

    fn load_connections(&mut self, force: bool) {
        let recent = self
            .last_full_load
            .is_some_and(|at| at.elapsed() < self.policy.reload_interval());
        if !force && recent {
            self.refresh_statuses();
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        if let Some(previous) = self.load_task.take() {
            debug!("Superseding in-flight load");
            previous.abort();
        }

        self.load_generation += 1;
        let generation = self.load_generation;
        let loader = Arc::clone(&self.loader);
        let pool = self.pool.clone();

        self.load_task = Some(tokio::spawn(async move {
            let result = loader.load_configurations().await;
            if let Ok(profiles) = &result {
                for profile in profiles {
                    // A failed creation is retried by the next connect
                    let _ = pool.get_or_create_session(&profile.id).await;
                }
            }
            let _ = commands.send(Command::LoadFinished { generation, result });
        }));
    }

    /// Cheap pass: re-query every known session; changes arrive as status updates
    fn refresh_statuses(&self) {
        let ids: Vec<String> = self.state.connections.iter().map(|c| c.id.clone()).collect();
        let pool = self.pool.clone();
        tokio::spawn(async move {
            for id in ids {
                if pool.get_or_create_session(&id).await.is_ok() {
                    pool.session_status(&id).await;
                }
            }
        });
    }

    fn finish_load(&mut self, generation: u64, result: Result<Vec<ConnectionProfile>, VpnError>) {
        if generation != self.load_generation {
            debug!(generation, "Discarding stale load result");
            return;
        }

        self.load_task = None;
        self.last_full_load = Some(Instant::now());
        self.state.loaded = true;

        match result {
            Ok(profiles) => self.reconcile(profiles),
            Err(e) => {
                let ids: Vec<String> = self.state.connections.drain(..).map(|c| c.id).collect();
                for id in ids {
                    self.forget(&id);
                }
                self.record_error(e);
            }
        }

        self.publish();
    }

    fn reconcile(&mut self, profiles: Vec<ConnectionProfile>) {
        let mut seen = HashSet::new();
        let mut connections = Vec::with_capacity(profiles.len());

        for profile in profiles {
            if !seen.insert(profile.id.clone()) {
                debug!(id = %profile.id, "Ignoring duplicate configuration");
                continue;
            }

            let status = match self.state.status_of(&profile.id) {
                Some(status) => status,
                None => {
                    let seeded = ConnectionStatus::from(self.pool.cached_status(&profile.id));
                    if seeded.is_active() {
                        self.activated.insert(profile.id.clone());
                    }
                    if seeded == ConnectionStatus::Connected {
                        self.announced.insert(profile.id.clone());
                    }
                    seeded
                }
            };
            connections.push(Connection::new(profile.id, profile.name, status));
        }

        connections.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let removed: Vec<String> = self
            .state
            .connections
            .iter()
            .filter(|c| !seen.contains(&c.id))
            .map(|c| c.id.clone())
            .collect();
        for id in removed {
            debug!(id, "Connection no longer configured");
            self.forget(&id);
        }

        info!(count = connections.len(), "Connections reloaded");
        self.state.connections = connections;

        if self.state.connections.is_empty() {
            self.record_error(VpnError::NoConfigurations);
        } else {
            self.state.loading_error = None;
        }
    }

    /// Drop per-connection bookkeeping and cancel its pending work
    fn forget(&mut self, id: &str) {
        self.activated.remove(id);
        self.announced.remove(id);
        if let Some((_, task)) = self.connect_tasks.remove(id) {
            task.abort();
        }
        self.cancel_disconnect_guard(id);
    }

    fn cancel_disconnect_guard(&mut self, id: &str) {
        if let Some((_, guard)) = self.disconnect_guards.remove(id) {
            guard.abort();
        }
    }

    fn connect(&mut self, id: String, retry_count: u32) {
        if self.state.connection(&id).is_none() {
            self.record_error(VpnError::ConnectionNotFound { id });
            self.publish();
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        self.state.loading_error = None;
        self.remember_last_used(&id);
        // A reconnect supersedes a disconnect still waiting for confirmation
        self.cancel_disconnect_guard(&id);

        let generation = self.next_generation();
        let task = tokio::spawn(run_connect(ConnectJob {
            id: id.clone(),
            attempts: retry_count.max(1),
            generation,
            pool: self.pool.clone(),
            policy: self.policy.clone(),
            snapshot: self.state_tx.subscribe(),
            commands,
        }));
        if let Some((_, previous)) = self.connect_tasks.insert(id, (generation, task)) {
            previous.abort();
        }

        self.publish();
    }

    fn is_current_connect(&self, id: &str, generation: u64) -> bool {
        matches!(self.connect_tasks.get(id), Some((current, _)) if *current == generation)
    }

    fn connect_issued(&mut self, id: &str, generation: u64) {
        if !self.is_current_connect(id, generation) {
            return;
        }

        match self.state.status_of(id) {
            // The native layer got there first
            Some(status) if status.is_active() => {}
            Some(_) => self.update_connection_status(id, ConnectionStatus::Connecting),
            None => {}
        }
    }

    fn connect_failed(&mut self, id: &str, generation: u64, error: VpnError) {
        if !self.is_current_connect(id, generation) {
            return;
        }
        self.connect_tasks.remove(id);
        self.record_error(error);
        self.publish();
    }

    fn disconnect(&mut self, id: String) {
        if self.state.connection(&id).is_none() {
            self.record_error(VpnError::ConnectionNotFound { id });
            self.publish();
            return;
        }
        if !self.pool.has_session(&id) {
            self.record_error(VpnError::SessionNotFound { id });
            self.publish();
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        self.state.loading_error = None;
        if let Some((_, pending)) = self.connect_tasks.remove(&id) {
            pending.abort();
        }
        self.update_connection_status(&id, ConnectionStatus::Disconnecting);
        self.publish();

        let generation = self.next_generation();
        let timeout = self.policy.disconnect_timeout();
        let guard = tokio::spawn({
            let commands = commands.clone();
            let id = id.clone();
            async move {
                sleep(timeout).await;
                let _ = commands.send(Command::DisconnectTimedOut { id, generation });
            }
        });
        if let Some((_, previous)) = self.disconnect_guards.insert(id.clone(), (generation, guard)) {
            previous.abort();
        }

        let pool = self.pool.clone();
        let confirm_delay = self.policy.confirm_refresh_delay();
        tokio::spawn(async move {
            match pool.stop_connection(&id).await {
                Ok(()) => confirm_later(&pool, &commands, &id, confirm_delay).await,
                Err(error) => {
                    let _ = commands.send(Command::DisconnectFailed { id, error });
                }
            }
        });
    }

    fn disconnect_failed(&mut self, id: String, error: VpnError) {
        self.cancel_disconnect_guard(&id);
        self.record_error(error);
        self.publish();

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let pool = self.pool.clone();
        tokio::spawn(async move {
            pool.session_status(&id).await;
            let _ = commands.send(Command::StatusReport { id });
        });
    }

    /// The native session may still be up at this point; the registry
    /// reports `Disconnected` anyway and no side effect fires.
    fn disconnect_timed_out(&mut self, id: &str, generation: u64) {
        match self.disconnect_guards.get(id) {
            Some((current, _)) if *current == generation => {}
            _ => return,
        }
        self.disconnect_guards.remove(id);

        let Some(connection) = self.state.connections.iter_mut().find(|c| c.id == id) else {
            return;
        };
        if connection.status == ConnectionStatus::Disconnected {
            return;
        }

        warn!(
            id,
            native = ?self.pool.cached_status(id),
            "Disconnect not confirmed within {:?}, forcing disconnected",
            self.policy.disconnect_timeout()
        );
        connection.status = ConnectionStatus::Disconnected;
        self.activated.remove(id);
        self.announced.remove(id);
        self.record_error(VpnError::timeout());
        self.publish();
    }

    fn toggle(&mut self, id: String) {
        let Some(status) = self.state.status_of(&id) else {
            self.record_error(VpnError::ConnectionNotFound { id });
            self.publish();
            return;
        };

        self.remember_last_used(&id);
        if status.is_active() {
            self.disconnect(id);
        } else {
            let retry_count = self.policy.retry_count;
            self.connect(id, retry_count);
        }
    }

    fn disconnect_all(&mut self) {
        let active: Vec<String> = self
            .state
            .active_connections()
            .map(|c| c.id.clone())
            .collect();
        info!(count = active.len(), "Disconnecting all active connections");
        for id in active {
            self.disconnect(id);
        }
    }

    fn apply_native_status(&mut self, id: &str) {
        // The cache always holds the newest native observation
        let status = ConnectionStatus::from(self.pool.cached_status(id));
        self.update_connection_status(id, status);
    }

    /// Single point where a connection's status changes
    fn update_connection_status(&mut self, id: &str, status: ConnectionStatus) {
        let Some(connection) = self.state.connections.iter_mut().find(|c| c.id == id) else {
            return;
        };
        if connection.status == status {
            return;
        }

        debug!(id, from = %connection.status, to = %status, "Connection status changed");
        connection.status = status;
        let name = connection.name.clone();

        if status.is_active() {
            self.activated.insert(id.to_string());
        }

        match status {
            ConnectionStatus::Connected => {
                self.cancel_disconnect_guard(id);
                if self.announced.insert(id.to_string()) {
                    for sink in &self.sinks {
                        sink.on_connected(id, &name);
                    }
                }
            }
            ConnectionStatus::Disconnected => {
                self.cancel_disconnect_guard(id);
                self.announced.remove(id);
                if self.activated.remove(id) {
                    for sink in &self.sinks {
                        sink.on_disconnected(id, &name);
                    }
                }
            }
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting => {}
        }

        self.publish();
    }

    fn restart_timer(&mut self, interval: Duration) {
        self.ticker = reload_ticker(interval);
        self.state.update_interval = interval;
        info!("Reload timer restarted every {:?}", interval);
        self.publish();
    }

    async fn shutdown(&mut self) {
        info!("Shutting down VPN manager");
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        for (_, (_, task)) in self.connect_tasks.drain() {
            task.abort();
        }
        for (_, (_, guard)) in self.disconnect_guards.drain() {
            guard.abort();
        }
        self.monitor.stop_monitoring();
        self.pool.cleanup().await;
    }
}
