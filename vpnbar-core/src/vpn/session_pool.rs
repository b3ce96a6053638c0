//! Session pool
//!
//! Owns exactly one native session handle per connection id. All native
//! start/stop/status/release calls are funnelled through one dedicated
//! worker thread (the native queue) so the OS API is never entered
//! concurrently. Status changes observed on that thread are reported on an
//! mpsc channel as [`StatusUpdate`]s.

use crate::error::VpnError;
use crate::native::{NativeSession, NativeSessionProvider};
use crate::types::NativeStatus;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A native status that differs from the previously cached one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id: String,
    pub status: NativeStatus,
}

enum PoolRequest {
    Install {
        id: String,
        session: Box<dyn NativeSession>,
        done: oneshot::Sender<()>,
    },
    Start {
        id: String,
        reply: oneshot::Sender<Result<(), VpnError>>,
    },
    Stop {
        id: String,
        reply: oneshot::Sender<Result<(), VpnError>>,
    },
    Status {
        id: String,
        reply: oneshot::Sender<NativeStatus>,
    },
    /// Posted by native event handlers
    Refresh { id: String },
    Cleanup { done: oneshot::Sender<()> },
}

/// Ids and cached statuses, readable without going through the queue
#[derive(Default)]
struct PoolIndex {
    ids: HashSet<String>,
    statuses: HashMap<String, NativeStatus>,
}

/// Handle to the session pool; clones share the same worker
#[derive(Clone)]
pub struct SessionPool {
    queue: mpsc::UnboundedSender<PoolRequest>,
    index: Arc<Mutex<PoolIndex>>,
    provider: Arc<dyn NativeSessionProvider>,
}

fn lock(index: &Mutex<PoolIndex>) -> MutexGuard<'_, PoolIndex> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionPool {
    /// Spawn the native queue worker
    ///
    /// Status changes are sent to `status_tx`. The worker releases every
    /// handle and exits once the last `SessionPool` clone is dropped.
    pub fn new(
        provider: Arc<dyn NativeSessionProvider>,
        status_tx: mpsc::UnboundedSender<StatusUpdate>,
    ) -> Result<Self, VpnError> {
        let (queue, requests) = mpsc::unbounded_channel();
        let index = Arc::new(Mutex::new(PoolIndex::default()));

        let worker = PoolWorker {
            sessions: HashMap::new(),
            index: Arc::clone(&index),
            status_tx,
            events: queue.downgrade(),
        };

        std::thread::Builder::new()
            .name("vpn-session-queue".to_string())
            .spawn(move || worker.run(requests))
            .map_err(|e| VpnError::FrameworkLoadFailed {
                reason: format!("failed to spawn native queue: {}", e),
            })?;

        info!(provider = provider.name(), "Session pool started");

        Ok(Self {
            queue,
            index,
            provider,
        })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> PoolRequest) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(build(tx)).is_err() {
            warn!("Native queue is gone");
            return None;
        }
        rx.await.ok()
    }

    /// Make sure a session exists for `id`
    ///
    /// Creation runs on the blocking pool. When two callers race, both
    /// handles are created but only the first one installed survives.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_session(&self, id: &str) -> Result<(), VpnError> {
        if self.has_session(id) {
            return Ok(());
        }

        let provider = Arc::clone(&self.provider);
        let owned_id = id.to_string();
        let created = tokio::task::spawn_blocking(move || provider.create_session(&owned_id))
            .await
            .unwrap_or_else(|e| {
                Err(VpnError::FrameworkLoadFailed {
                    reason: e.to_string(),
                })
            });

        let session = match created {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to create session for {}: {}", id, e);
                return Err(VpnError::SessionCreationFailed { id: id.to_string() });
            }
        };

        self.request(|done| PoolRequest::Install {
            id: id.to_string(),
            session,
            done,
        })
        .await
        .ok_or_else(|| VpnError::SessionCreationFailed { id: id.to_string() })
    }

    /// Ask the native layer to start `id`; does not wait for confirmation
    pub async fn start_connection(&self, id: &str) -> Result<(), VpnError> {
        self.request(|reply| PoolRequest::Start {
            id: id.to_string(),
            reply,
        })
        .await
        .unwrap_or_else(|| Err(VpnError::SessionNotFound { id: id.to_string() }))
    }

    /// Ask the native layer to stop `id`; does not wait for confirmation
    pub async fn stop_connection(&self, id: &str) -> Result<(), VpnError> {
        self.request(|reply| PoolRequest::Stop {
            id: id.to_string(),
            reply,
        })
        .await
        .unwrap_or_else(|| Err(VpnError::SessionNotFound { id: id.to_string() }))
    }

    /// Query the native status of `id`, refreshing the cache
    pub async fn session_status(&self, id: &str) -> NativeStatus {
        self.request(|reply| PoolRequest::Status {
            id: id.to_string(),
            reply,
        })
        .await
        .unwrap_or_default()
    }

    /// Last observed status, `Invalid` when unknown
    pub fn cached_status(&self, id: &str) -> NativeStatus {
        lock(&self.index)
            .statuses
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    pub fn has_session(&self, id: &str) -> bool {
        lock(&self.index).ids.contains(id)
    }

    /// Ids with a live session, sorted
    pub fn all_connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.index).ids.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel and release every session; safe to call repeatedly
    pub async fn cleanup(&self) {
        if self.request(|done| PoolRequest::Cleanup { done }).await.is_none() {
            debug!("Native queue already shut down");
        }
    }
}

struct PoolWorker {
    sessions: HashMap<String, Box<dyn NativeSession>>,
    index: Arc<Mutex<PoolIndex>>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    events: mpsc::WeakUnboundedSender<PoolRequest>,
}

impl PoolWorker {
    fn run(mut self, mut requests: mpsc::UnboundedReceiver<PoolRequest>) {
        while let Some(request) = requests.blocking_recv() {
            match request {
                PoolRequest::Install { id, session, done } => {
                    self.install(id, session);
                    let _ = done.send(());
                }
                PoolRequest::Start { id, reply } => {
                    let result = match self.sessions.get(&id) {
                        Some(session) => session.start(),
                        None => Err(VpnError::SessionNotFound { id }),
                    };
                    let _ = reply.send(result);
                }
                PoolRequest::Stop { id, reply } => {
                    let result = match self.sessions.get(&id) {
                        Some(session) => session.stop(),
                        None => Err(VpnError::SessionNotFound { id }),
                    };
                    let _ = reply.send(result);
                }
                PoolRequest::Status { id, reply } => {
                    let status = self.refresh(&id);
                    let _ = reply.send(status);
                }
                PoolRequest::Refresh { id } => {
                    self.refresh(&id);
                }
                PoolRequest::Cleanup { done } => {
                    self.cleanup();
                    let _ = done.send(());
                }
            }
        }

        self.cleanup();
        debug!("Native queue stopped");
    }

    fn install(&mut self, id: String, mut session: Box<dyn NativeSession>) {
        if self.sessions.contains_key(&id) {
            debug!("Session for {} already installed, releasing duplicate", id);
            session.release();
            return;
        }

        let events = self.events.clone();
        let event_id = id.clone();
        session.set_event_handler(Arc::new(move |event| {
            debug!(id = %event_id, ?event, "Native session event");
            if let Some(queue) = events.upgrade() {
                let _ = queue.send(PoolRequest::Refresh {
                    id: event_id.clone(),
                });
            }
        }));

        self.sessions.insert(id.clone(), session);
        lock(&self.index).ids.insert(id.clone());
        info!("Session installed for {}", id);

        self.refresh(&id);
    }

    /// Query the native status, notify on change, return it
    fn refresh(&self, id: &str) -> NativeStatus {
        let Some(session) = self.sessions.get(id) else {
            return NativeStatus::Invalid;
        };
        let status = session.status();

        let previous = lock(&self.index).statuses.insert(id.to_string(), status);
        if previous != Some(status) {
            debug!(id, ?previous, current = ?status, "Native status changed");
            let _ = self.status_tx.send(StatusUpdate {
                id: id.to_string(),
                status,
            });
        }

        status
    }

    fn cleanup(&mut self) {
        if self.sessions.is_empty() {
            return;
        }

        info!("Releasing {} session(s)", self.sessions.len());
        for (_, session) in self.sessions.drain() {
            session.cancel();
            session.release();
        }

        let mut index = lock(&self.index);
        index.ids.clear();
        index.statuses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::MemoryProvider;
    use std::time::Duration;

    fn pool_with(provider: &MemoryProvider) -> (SessionPool, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = SessionPool::new(Arc::new(provider.clone()), tx).unwrap();
        (pool, rx)
    }

    #[tokio::test]
    async fn test_concurrent_creation_keeps_one_handle() {
        let provider = MemoryProvider::new().with_profile("a", "Office");
        provider.set_create_delay(Duration::from_millis(50));
        let (pool, _rx) = pool_with(&provider);

        let (first, second) = tokio::join!(
            pool.get_or_create_session("a"),
            pool.get_or_create_session("a")
        );
        assert!(first.is_ok());
        assert!(second.is_ok());

        assert_eq!(provider.sessions_created(), 2);
        assert_eq!(provider.sessions_released(), 1);
        assert_eq!(provider.live_sessions(), 1);
        assert_eq!(pool.all_connection_ids(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_start_without_session_is_addressing_error() {
        let provider = MemoryProvider::new();
        let (pool, _rx) = pool_with(&provider);

        let result = pool.start_connection("missing").await;
        assert_eq!(
            result,
            Err(VpnError::SessionNotFound {
                id: "missing".to_string()
            })
        );
        assert_eq!(pool.cached_status("missing"), NativeStatus::Invalid);
    }

    #[tokio::test]
    async fn test_status_notifies_only_on_change() {
        let provider = MemoryProvider::new().with_profile("a", "Office");
        let (pool, mut rx) = pool_with(&provider);
        pool.get_or_create_session("a").await.unwrap();

        // Initial refresh on install
        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, NativeStatus::Disconnected);

        assert_eq!(pool.session_status("a").await, NativeStatus::Disconnected);
        assert!(rx.try_recv().is_err());

        provider.set_status_silently("a", NativeStatus::Connected);
        assert_eq!(pool.session_status("a").await, NativeStatus::Connected);
        assert_eq!(rx.recv().await.unwrap().status, NativeStatus::Connected);
    }

    #[tokio::test]
    async fn test_creation_failure_reported() {
        let provider = MemoryProvider::new();
        provider.fail_session_creation("a", 1);
        let (pool, _rx) = pool_with(&provider);

        assert_eq!(
            pool.get_or_create_session("a").await,
            Err(VpnError::SessionCreationFailed { id: "a".to_string() })
        );
        assert!(!pool.has_session("a"));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let provider = MemoryProvider::new();
        let (pool, _rx) = pool_with(&provider);
        pool.get_or_create_session("a").await.unwrap();
        pool.get_or_create_session("b").await.unwrap();

        pool.cleanup().await;
        pool.cleanup().await;

        assert_eq!(provider.live_sessions(), 0);
        assert!(pool.all_connection_ids().is_empty());
        assert_eq!(pool.cached_status("a"), NativeStatus::Invalid);
    }
}
