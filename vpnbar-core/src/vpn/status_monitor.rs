//! Periodic status polling
//!
//! Some tunnels are torn down without the native layer emitting an event.
//! The monitor re-queries every pooled session on a fixed cadence; changes
//! reach the orchestrator through the pool's own status channel, and each
//! poll result is also republished as a batch for outside consumers.

use crate::types::NativeStatus;
use crate::vpn::session_pool::SessionPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// One poll result: `id -> status`
pub type StatusBatch = HashMap<String, NativeStatus>;

const BATCH_CHANNEL_CAPACITY: usize = 32;

/// Repeating status poller over a [`SessionPool`]
#[derive(Clone)]
pub struct StatusMonitor {
    pool: SessionPool,
    interval: Duration,
    batches: broadcast::Sender<StatusBatch>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

async fn poll_all(pool: &SessionPool, batches: &broadcast::Sender<StatusBatch>) -> StatusBatch {
    let mut batch = StatusBatch::new();
    for id in pool.all_connection_ids() {
        let status = pool.session_status(&id).await;
        batch.insert(id, status);
    }

    if !batch.is_empty() {
        // No subscribers is fine
        let _ = batches.send(batch.clone());
    }
    batch
}

impl StatusMonitor {
    pub fn new(pool: SessionPool, interval: Duration) -> Self {
        let (batches, _) = broadcast::channel(BATCH_CHANNEL_CAPACITY);
        Self {
            pool,
            interval,
            batches,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// (Re)start the polling task; the first poll happens after one interval
    pub fn start_monitoring(&self) {
        self.stop_monitoring();

        let pool = self.pool.clone();
        let batches = self.batches.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let batch = poll_all(&pool, &batches).await;
                debug!(sessions = batch.len(), "Status poll complete");
            }
        });

        *self.slot() = Some(handle);
        info!("Status monitoring started every {:?}", period);
    }

    /// Stop polling; does nothing when not running
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.slot().take() {
            handle.abort();
            debug!("Status monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Poll every pooled session now and publish the batch
    pub async fn refresh_all_statuses(&self) -> StatusBatch {
        poll_all(&self.pool, &self.batches).await
    }

    /// Poll one session now and publish a single-entry batch
    pub async fn refresh_status(&self, id: &str) -> NativeStatus {
        let status = self.pool.session_status(id).await;
        let _ = self
            .batches
            .send(StatusBatch::from([(id.to_string(), status)]));
        status
    }

    /// Receive every published batch
    pub fn subscribe(&self) -> broadcast::Receiver<StatusBatch> {
        self.batches.subscribe()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
