//! The sync engine state machine.
//!
//! Owns every `Operation.status` transition and the observable [`SyncState`].
//! The durable store is the source of truth; the in-memory queue here is a
//! mirror rebuilt from it on `initialize`. Every transition is persisted
//! before observers are notified, so observers never see a state the store
//! does not also hold.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use tokio::sync::{Mutex, Notify, OnceCell};

use crate::backoff::backoff_with_jitter;
use crate::errors::{Result, SyncError};
use crate::executor::{NetworkExecutor, Outcome};
use crate::hub::{Subscription, SubscriptionHub};
use crate::operation::{Operation, OperationKind, OperationStatus, SyncPhase, SyncState};
use crate::store::{QueueStore, StatusPatch, SyncSummary};

/// Tunable retry/drain parameters. The defaults mirror the backoff cap used
/// for upload retries elsewhere in the stack: exponent capped at 8, jitter up
/// to a fifth of the delay.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Attempts before a retryable failure is converted to `failed_permanent`.
    pub max_attempts: i32,
    /// First retry delay in milliseconds.
    pub base_backoff_ms: u64,
    /// Upper bound for any retry delay.
    pub max_backoff_ms: u64,
    /// How many independent ordering groups may execute concurrently.
    pub max_concurrency: usize,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_ms: 2_000,
            max_backoff_ms: 300_000,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
struct EngineStatus {
    phase: SyncPhase,
    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Offline-tolerant action synchronization engine.
pub struct SyncEngine {
    store: Arc<dyn QueueStore>,
    executor: Arc<dyn NetworkExecutor>,
    hub: SubscriptionHub,
    config: SyncEngineConfig,
    queue: StdMutex<Vec<Operation>>,
    status: StdMutex<EngineStatus>,
    init: OnceCell<()>,
    drain_lock: Mutex<()>,
    wake: Notify,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: Arc<dyn NetworkExecutor>,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            store,
            executor,
            hub: SubscriptionHub::new(),
            config,
            queue: StdMutex::new(Vec::new()),
            status: StdMutex::new(EngineStatus {
                phase: SyncPhase::Idle,
                last_synced_at: None,
                last_error: None,
            }),
            init: OnceCell::new(),
            drain_lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Rehydrate the in-memory queue from the durable store. Idempotent:
    /// repeated calls after a successful run are no-ops; a failed run may be
    /// retried.
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async { self.restore_from_store() })
            .await
            .map(|_| ())
    }

    fn restore_from_store(&self) -> Result<()> {
        let loaded = match self.store.load_all() {
            Ok(ops) => ops,
            Err(err) => {
                // The one failure allowed to leave the engine degraded.
                self.set_status(SyncPhase::Error, Some(err.to_string()));
                self.publish_state();
                return Err(err);
            }
        };

        let mut restored = Vec::with_capacity(loaded.len());
        for mut op in loaded {
            if op.status == OperationStatus::InFlight {
                // A previous session died mid-call. The outcome was never
                // observed, so it must be treated as unknown, never assumed
                // to have succeeded.
                op.status = OperationStatus::Pending;
                op.next_attempt_at = None;
                if !self.store.update_status(
                    &op.id,
                    OperationStatus::Pending,
                    StatusPatch {
                        next_attempt_at: Some(None),
                        ..StatusPatch::default()
                    },
                )? {
                    continue;
                }
                debug!("[ClipSync] Demoted in-flight operation {} to pending", op.id);
            }
            restored.push(op);
        }

        let summary = self.store.load_summary().unwrap_or_else(|err| {
            warn!("[ClipSync] Ignoring unreadable summary record: {}", err);
            None
        });

        let count = restored.len();
        if let Ok(mut queue) = self.queue.lock() {
            *queue = restored;
        }
        {
            let mut status = self.status.lock().map_err(poisoned_lock)?;
            status.phase = SyncPhase::Idle;
            status.last_error = None;
            status.last_synced_at = summary.and_then(|s| s.last_synced_at);
        }
        debug!("[ClipSync] Restored {} pending operation(s) from store", count);
        self.publish_state();
        Ok(())
    }

    /// Queue one user action. Durably persisted before this returns; fails
    /// only when the store rejects the append. A duplicate of an already
    /// active operation returns the existing id instead of queuing twice.
    pub fn enqueue(&self, kind: OperationKind, payload: serde_json::Value) -> Result<String> {
        let op = Operation::new(kind, payload);
        let id = op.id.clone();

        match self.store.append(&op) {
            Ok(()) => {}
            Err(SyncError::DuplicateOperation { existing_id }) => {
                debug!(
                    "[ClipSync] Deduplicated enqueue of {:?} onto operation {}",
                    kind, existing_id
                );
                return Ok(existing_id);
            }
            Err(err) => {
                // The user's intent could not be persisted: reject loudly and
                // surface the condition rather than dropping the action.
                self.set_status(SyncPhase::Error, Some(err.to_string()));
                self.publish_state();
                return Err(err);
            }
        }

        if let Ok(mut queue) = self.queue.lock() {
            queue.push(op);
        }
        self.publish_state();
        self.wake.notify_one();
        Ok(id)
    }

    /// Best-effort drain: attempts every operation that is eligible as of
    /// invocation time. Operations enqueued during the run wait for the next
    /// drain. Concurrent calls join the in-flight drain rather than starting
    /// a second one over the same operations.
    pub async fn sync_now(&self) -> Result<()> {
        self.initialize().await?;
        let _guard = self.drain_lock.lock().await;

        let now = Utc::now();
        let mut eligible = self.eligible_operations(now);
        if eligible.is_empty() {
            return Ok(());
        }

        self.set_status(SyncPhase::Syncing, None);
        self.publish_state();

        // A rescheduled operation whose delay has elapsed goes back to
        // pending before it is dispatched again, so readers of the store
        // never see an eligible operation still marked failed_retryable.
        for op in eligible.iter_mut() {
            if op.status == OperationStatus::FailedRetryable {
                self.transition(&op.id, OperationStatus::Pending, None, op.last_error.clone());
                op.status = OperationStatus::Pending;
                op.next_attempt_at = None;
            }
        }

        let groups = group_by_target(eligible);
        debug!(
            "[ClipSync] Draining {} group(s), concurrency cap {}",
            groups.len(),
            self.config.max_concurrency
        );

        let failures: StdMutex<Vec<String>> = StdMutex::new(Vec::new());
        stream::iter(groups)
            .map(|group| self.drain_group(group, &failures))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        let last_failure = failures.lock().ok().and_then(|f| f.last().cloned());
        let fully_drained = self
            .queue
            .lock()
            .map(|q| q.iter().all(|op| op.status.is_terminal()))
            .unwrap_or(false);

        {
            let mut status = self.status.lock().map_err(poisoned_lock)?;
            if fully_drained {
                status.last_synced_at = Some(Utc::now());
            }
            status.phase = if last_failure.is_some() {
                SyncPhase::Error
            } else {
                SyncPhase::Idle
            };
            status.last_error = last_failure;
        }
        self.persist_summary();
        self.publish_state();
        Ok(())
    }

    async fn drain_group(&self, group: Vec<Operation>, failures: &StdMutex<Vec<String>>) {
        for mut op in group {
            let attempt = op.attempt_count + 1;
            let marked = self.store.update_status(
                &op.id,
                OperationStatus::InFlight,
                StatusPatch {
                    attempt_count: Some(attempt),
                    last_error: Some(None),
                    ..StatusPatch::default()
                },
            );
            match marked {
                Ok(true) => {}
                Ok(false) => {
                    // Cleared since the snapshot was taken; drop the mirror copy.
                    self.remove_from_mirror(&op.id);
                    continue;
                }
                Err(err) => {
                    warn!("[ClipSync] Skipping {} (store write failed): {}", op.id, err);
                    record_failure(failures, err.to_string());
                    return;
                }
            }
            op.attempt_count = attempt;
            op.status = OperationStatus::InFlight;
            self.update_mirror(&op.id, |m| {
                m.status = OperationStatus::InFlight;
                m.attempt_count = attempt;
                m.last_error = None;
            });
            self.publish_state();

            let outcome = self.executor.execute(&op).await;
            match outcome {
                Outcome::Success(_) => {
                    match self.store.remove(&op.id) {
                        // A false here means the operation was cleared while
                        // in flight: the outcome is simply discarded.
                        Ok(_) => {}
                        Err(err) => {
                            warn!("[ClipSync] Failed to purge {}: {}", op.id, err);
                            record_failure(failures, err.to_string());
                        }
                    }
                    self.remove_from_mirror(&op.id);
                    debug!(
                        "[ClipSync] Operation {} ({:?}) succeeded on attempt {}",
                        op.id, op.kind, attempt
                    );
                    self.publish_state();
                }
                Outcome::RetryableFailure(reason) => {
                    if attempt >= self.config.max_attempts {
                        let message = format!(
                            "Retry budget exhausted after {} attempts: {}",
                            attempt, reason
                        );
                        self.transition(&op.id, OperationStatus::FailedPermanent, None, Some(message.clone()));
                        warn!("[ClipSync] Operation {} failed permanently: {}", op.id, message);
                        record_failure(failures, message);
                        // Terminal outcome observed; successors in this group
                        // may proceed.
                        continue;
                    }

                    let delay = backoff_with_jitter(
                        attempt,
                        self.config.base_backoff_ms,
                        self.config.max_backoff_ms,
                    );
                    let next_attempt_at = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::milliseconds(self.config.max_backoff_ms as i64));
                    self.transition(
                        &op.id,
                        OperationStatus::FailedRetryable,
                        Some(next_attempt_at),
                        Some(reason.clone()),
                    );
                    debug!(
                        "[ClipSync] Operation {} attempt {} failed (retry at {}): {}",
                        op.id, attempt, next_attempt_at, reason
                    );
                    record_failure(failures, reason);
                    // The rest of this group depends on an outcome we don't
                    // have yet; it must not run ahead of this operation.
                    return;
                }
                Outcome::PermanentFailure(reason) => {
                    self.transition(&op.id, OperationStatus::FailedPermanent, None, Some(reason.clone()));
                    warn!(
                        "[ClipSync] Operation {} ({:?}) failed permanently: {}",
                        op.id, op.kind, reason
                    );
                    record_failure(failures, reason);
                }
            }
        }
    }

    /// Persist a transition, mirror it, then notify, in that order.
    fn transition(
        &self,
        id: &str,
        status: OperationStatus,
        next_attempt_at: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) {
        let persisted = self.store.update_status(
            id,
            status,
            StatusPatch {
                next_attempt_at: Some(next_attempt_at),
                last_error: Some(last_error.clone()),
                ..StatusPatch::default()
            },
        );
        match persisted {
            Ok(true) => {
                self.update_mirror(id, |m| {
                    m.status = status;
                    m.next_attempt_at = next_attempt_at;
                    m.last_error = last_error.clone();
                });
                self.publish_state();
            }
            // Cleared while in flight: outcome discarded.
            Ok(false) => self.remove_from_mirror(id),
            Err(err) => warn!("[ClipSync] Failed to persist transition for {}: {}", id, err),
        }
    }

    /// Forcibly discard every non-succeeded operation that is not currently
    /// executing. Explicit user-requested abandonment, not a normal path.
    pub async fn clear_pending_operations(&self) -> Result<()> {
        self.initialize().await?;

        let ids: Vec<String> = self
            .queue
            .lock()
            .map(|q| {
                q.iter()
                    .filter(|op| op.status != OperationStatus::InFlight)
                    .map(|op| op.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for id in &ids {
            self.store.remove(id)?;
        }
        if let Ok(mut queue) = self.queue.lock() {
            queue.retain(|op| !ids.contains(&op.id));
        }
        {
            let mut status = self.status.lock().map_err(poisoned_lock)?;
            status.phase = SyncPhase::Idle;
            status.last_error = None;
        }
        self.persist_summary();
        self.publish_state();
        debug!("[ClipSync] Cleared {} pending operation(s)", ids.len());
        Ok(())
    }

    /// Current observable snapshot.
    pub fn sync_state(&self) -> SyncState {
        self.current_state()
    }

    /// Count of operations not yet confirmed by the server (everything the
    /// store still holds, including retained permanent failures).
    pub fn pending_operation_count(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Permanently failed operations retained for user-visible resolution.
    pub fn failed_operations(&self) -> Vec<Operation> {
        self.queue
            .lock()
            .map(|q| {
                q.iter()
                    .filter(|op| op.status == OperationStatus::FailedPermanent)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscribe to state changes. The listener is dropped with the handle.
    pub fn on_sync_state_change(
        &self,
        listener: impl Fn(&SyncState) + Send + Sync + 'static,
    ) -> Subscription {
        self.hub.subscribe(listener)
    }

    /// Earliest scheduled retry among rescheduled operations, for the
    /// background loop's sleep computation.
    pub fn next_attempt_eta(&self) -> Option<DateTime<Utc>> {
        self.queue
            .lock()
            .ok()?
            .iter()
            .filter(|op| !op.status.is_terminal())
            .filter_map(|op| op.next_attempt_at)
            .min()
    }

    /// Whether any operation is eligible to execute right now.
    pub fn has_due_work(&self) -> bool {
        !self.eligible_operations(Utc::now()).is_empty()
    }

    /// Signal the background loop that there is new work (enqueue does this
    /// automatically; connectivity-regained handlers call it too).
    pub fn wakeup(&self) {
        self.wake.notify_one();
    }

    /// Resolves on the next wakeup signal.
    pub async fn wait_for_wakeup(&self) {
        self.wake.notified().await;
    }

    fn eligible_operations(&self, now: DateTime<Utc>) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .queue
            .lock()
            .map(|q| {
                q.iter()
                    .filter(|op| {
                        matches!(
                            op.status,
                            OperationStatus::Pending | OperationStatus::FailedRetryable
                        ) && op.kind != OperationKind::Unknown
                            && op.next_attempt_at.map_or(true, |at| at <= now)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Strict submission order. The sort is stable, so operations created
        // within the same millisecond keep their queue insertion order.
        ops.sort_by_key(|op| op.created_at);
        ops
    }

    fn update_mirror(&self, id: &str, apply: impl FnOnce(&mut Operation)) {
        if let Ok(mut queue) = self.queue.lock() {
            if let Some(op) = queue.iter_mut().find(|op| op.id == id) {
                apply(op);
            }
        }
    }

    fn remove_from_mirror(&self, id: &str) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.retain(|op| op.id != id);
        }
    }

    fn set_status(&self, phase: SyncPhase, last_error: Option<String>) {
        if let Ok(mut status) = self.status.lock() {
            status.phase = phase;
            status.last_error = last_error;
        }
    }

    fn current_state(&self) -> SyncState {
        let status = match self.status.lock() {
            Ok(status) => status.clone(),
            Err(_) => EngineStatus {
                phase: SyncPhase::Error,
                last_synced_at: None,
                last_error: Some("engine status lock poisoned".to_string()),
            },
        };
        SyncState {
            phase: status.phase,
            last_synced_at: status.last_synced_at,
            pending_count: self.pending_operation_count(),
            last_error: status.last_error,
        }
    }

    fn publish_state(&self) {
        self.hub.publish(self.current_state());
    }

    fn persist_summary(&self) {
        let summary = {
            let Ok(status) = self.status.lock() else {
                return;
            };
            SyncSummary {
                phase: status.phase,
                last_synced_at: status.last_synced_at,
            }
        };
        if let Err(err) = self.store.save_summary(&summary) {
            warn!("[ClipSync] Failed to persist summary: {}", err);
        }
    }
}

fn record_failure(failures: &StdMutex<Vec<String>>, reason: String) {
    if let Ok(mut failures) = failures.lock() {
        failures.push(reason);
    }
}

fn poisoned_lock<T>(_: std::sync::PoisonError<T>) -> SyncError {
    SyncError::storage_unavailable("engine status lock poisoned")
}

/// Partition eligible operations (already in submission order) into ordered
/// groups by target. Operations without a target each form their own group.
fn group_by_target(ops: Vec<Operation>) -> Vec<Vec<Operation>> {
    let mut groups: Vec<Vec<Operation>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for op in ops {
        match op.ordering_key() {
            Some(key) => match index.get(&key) {
                Some(&i) => groups[i].push(op),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![op]);
                }
            },
            None => groups.push(vec![op]),
        }
    }
    groups
}

#[cfg(test)]
mod tests;
