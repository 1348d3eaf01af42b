//! The sync manager: wires storage, delivery and the engine together and
//! owns the background drain loop.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use clipstream_core::{
    NetworkExecutor, Operation, OperationKind, QueueStore, Result, Subscription, SyncEngine,
    SyncEngineConfig, SyncState,
};
use clipstream_remote::{
    AccessTokenProvider, EngagementApiClient, HttpNetworkExecutor, RemoteError,
};
use clipstream_storage_sqlite::SqliteQueueStore;

use crate::scheduler::{
    SYNC_BACKGROUND_INTERVAL_SECS, SYNC_INTERVAL_JITTER_SECS, SYNC_PENDING_SHORT_DELAY_MS,
};

/// Where the durable queue lives.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// SQLite database file at this path.
    File(String),
    /// In-memory database. Durability across restarts is lost; meant for
    /// tests and ephemeral embeddings.
    InMemory,
}

/// Everything needed to assemble a [`SyncManager`].
pub struct SyncManagerConfig {
    pub storage: StorageConfig,
    pub base_url: String,
    pub tokens: Arc<dyn AccessTokenProvider>,
    pub engine: SyncEngineConfig,
}

/// Failures while assembling the manager.
#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error(transparent)]
    Storage(#[from] clipstream_core::SyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Owns one [`SyncEngine`] plus its background drain task.
pub struct SyncManager {
    engine: Arc<SyncEngine>,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    /// Assemble a manager from SQLite storage and the HTTP executor.
    pub fn new(config: SyncManagerConfig) -> std::result::Result<Self, ConfigureError> {
        let store: Arc<dyn QueueStore> = match &config.storage {
            StorageConfig::File(path) => Arc::new(SqliteQueueStore::open(path)?),
            StorageConfig::InMemory => Arc::new(SqliteQueueStore::in_memory()?),
        };
        let client = EngagementApiClient::new(&config.base_url)?;
        let executor: Arc<dyn NetworkExecutor> =
            Arc::new(HttpNetworkExecutor::new(client, config.tokens));
        Ok(Self::from_parts(store, executor, config.engine))
    }

    /// Assemble from explicit parts. Tests use this to substitute scripted
    /// executors and in-memory stores.
    pub fn from_parts(
        store: Arc<dyn QueueStore>,
        executor: Arc<dyn NetworkExecutor>,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            engine: Arc::new(SyncEngine::new(store, executor, config)),
            background_task: Mutex::new(None),
        }
    }

    /// Load the durable queue and recover interrupted work. Idempotent;
    /// a failed attempt may be retried.
    pub async fn initialize(&self) -> Result<()> {
        self.engine.initialize().await
    }

    /// Queue a user action durably. Returns the operation id.
    pub fn enqueue(&self, kind: OperationKind, payload: serde_json::Value) -> Result<String> {
        self.engine.enqueue(kind, payload)
    }

    /// Drain the queue once. Concurrent calls coalesce onto one drain.
    pub async fn sync_now(&self) -> Result<()> {
        self.engine.sync_now().await
    }

    /// Discard all operations not currently in flight.
    pub async fn clear_pending_operations(&self) -> Result<()> {
        self.engine.clear_pending_operations().await
    }

    pub fn sync_state(&self) -> SyncState {
        self.engine.sync_state()
    }

    pub fn pending_operation_count(&self) -> usize {
        self.engine.pending_operation_count()
    }

    pub fn failed_operations(&self) -> Vec<Operation> {
        self.engine.failed_operations()
    }

    pub fn on_sync_state_change(
        &self,
        listener: impl Fn(&SyncState) + Send + Sync + 'static,
    ) -> Subscription {
        self.engine.on_sync_state_change(listener)
    }

    /// The host application calls this when the platform reports that
    /// connectivity came back, so due retries run without waiting out the
    /// periodic interval.
    pub fn notify_connectivity_restored(&self) {
        self.engine.wakeup();
    }

    /// Start the background drain loop if it is not already running.
    pub async fn start_background(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = engine.sync_now().await {
                    warn!("[ClipSync] Background drain failed: {}", err);
                }

                let delay_ms = next_delay_ms(
                    engine.has_due_work(),
                    engine.next_attempt_eta(),
                    Utc::now(),
                );
                debug!("[ClipSync] Background loop sleeping for {}ms", delay_ms);

                tokio::select! {
                    _ = engine.wait_for_wakeup() => {
                        debug!("[ClipSync] Background loop woken early");
                    }
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
        });
        *guard = Some(handle);
    }

    /// Stop the background drain loop. Queued operations stay durable and
    /// resume on the next start.
    pub async fn stop_background(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

/// Next sleep before another drain: the periodic interval plus jitter,
/// shortened to the earliest scheduled retry, and capped low while due
/// work is already waiting.
fn next_delay_ms(
    has_due_work: bool,
    next_attempt_eta: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u64 {
    let jitter_bound = SYNC_INTERVAL_JITTER_SECS.saturating_mul(1000);
    let jitter_ms = if jitter_bound > 0 {
        rand::thread_rng().gen_range(0..jitter_bound)
    } else {
        0
    };
    let mut delay_ms = SYNC_BACKGROUND_INTERVAL_SECS.saturating_mul(1000) + jitter_ms;

    if let Some(eta) = next_attempt_eta {
        let wait_ms = (eta - now).num_milliseconds().max(0) as u64;
        delay_ms = delay_ms.min(wait_ms.saturating_add(jitter_ms).max(1_000));
    }

    if has_due_work {
        delay_ms = delay_ms.min(SYNC_PENDING_SHORT_DELAY_MS + (jitter_ms % 500));
    }

    delay_ms
}
