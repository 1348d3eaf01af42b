use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{SyncEngine, SyncEngineConfig};
use crate::errors::{Result, SyncError};
use crate::executor::{NetworkExecutor, Outcome};
use crate::operation::{Operation, OperationKind, OperationStatus, SyncPhase};
use crate::store::{QueueStore, StatusPatch, SyncSummary};

/// In-memory stand-in for the durable store, shareable across engine
/// instances to simulate a restart over the same persisted queue.
#[derive(Default)]
struct MemoryStore {
    ops: Mutex<Vec<Operation>>,
    summary: Mutex<Option<SyncSummary>>,
    unavailable: AtomicBool,
    load_calls: AtomicUsize,
    transitions: Mutex<Vec<(String, OperationStatus)>>,
}

impl MemoryStore {
    fn seeded(ops: Vec<Operation>) -> Arc<Self> {
        let store = Self::default();
        *store.ops.lock().unwrap() = ops;
        Arc::new(store)
    }

    fn stored(&self) -> Vec<Operation> {
        self.ops.lock().unwrap().clone()
    }

    /// Persisted status transitions for one operation, in write order.
    fn transitions_for(&self, id: &str) -> Vec<OperationStatus> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(op_id, _)| op_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(SyncError::storage_unavailable("storage disabled"));
        }
        Ok(())
    }
}

impl QueueStore for MemoryStore {
    fn append(&self, op: &Operation) -> Result<()> {
        self.check_available()?;
        let mut ops = self.ops.lock().unwrap();
        if let Some(existing) = ops
            .iter()
            .find(|o| o.idempotency_key == op.idempotency_key && !o.status.is_terminal())
        {
            return Err(SyncError::DuplicateOperation {
                existing_id: existing.id.clone(),
            });
        }
        ops.push(op.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        self.check_available()?;
        let mut ops = self.ops.lock().unwrap();
        let before = ops.len();
        ops.retain(|op| op.id != id);
        Ok(ops.len() != before)
    }

    fn update_status(&self, id: &str, status: OperationStatus, patch: StatusPatch) -> Result<bool> {
        self.check_available()?;
        let mut ops = self.ops.lock().unwrap();
        let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
            return Ok(false);
        };
        self.transitions
            .lock()
            .unwrap()
            .push((id.to_string(), status));
        op.status = status;
        if let Some(attempts) = patch.attempt_count {
            op.attempt_count = attempts;
        }
        if let Some(next) = patch.next_attempt_at {
            op.next_attempt_at = next;
        }
        if let Some(error) = patch.last_error {
            op.last_error = error;
        }
        Ok(true)
    }

    fn load_all(&self) -> Result<Vec<Operation>> {
        self.load_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;
        Ok(self.stored())
    }

    fn load_summary(&self) -> Result<Option<SyncSummary>> {
        Ok(self.summary.lock().unwrap().clone())
    }

    fn save_summary(&self, summary: &SyncSummary) -> Result<()> {
        self.check_available()?;
        *self.summary.lock().unwrap() = Some(summary.clone());
        Ok(())
    }
}

/// Executor with a scripted outcome queue; once exhausted every call
/// succeeds. Records the exact operations it saw, in dispatch order.
#[derive(Default)]
struct ScriptedExecutor {
    script: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedExecutor {
    fn with_script(outcomes: Vec<Outcome>) -> Arc<Self> {
        let executor = Self::default();
        *executor.script.lock().unwrap() = outcomes.into();
        Arc::new(executor)
    }

    fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkExecutor for ScriptedExecutor {
    async fn execute(&self, op: &Operation) -> Outcome {
        self.calls.lock().unwrap().push(op.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Success(json!({"ok": true})))
    }
}

/// Simulates an ambiguous first delivery: the server applies the effect but
/// the response is lost, then deduplicates the retry by idempotency key.
#[derive(Default)]
struct AmbiguousOnceExecutor {
    effects: Mutex<HashMap<String, usize>>,
    failed_once: Mutex<HashSet<String>>,
}

#[async_trait]
impl NetworkExecutor for AmbiguousOnceExecutor {
    async fn execute(&self, op: &Operation) -> Outcome {
        let mut effects = self.effects.lock().unwrap();
        effects.entry(op.idempotency_key.clone()).or_insert_with(|| 1);

        let mut failed = self.failed_once.lock().unwrap();
        if failed.insert(op.idempotency_key.clone()) {
            Outcome::retryable("connection reset while reading response")
        } else {
            Outcome::Success(json!({"deduplicated": true}))
        }
    }
}

fn test_config() -> SyncEngineConfig {
    SyncEngineConfig {
        max_attempts: 8,
        // Zero base delay keeps retries eligible without sleeping through
        // real backoff in tests; jitter adds at most 1ms.
        base_backoff_ms: 0,
        max_backoff_ms: 10,
        max_concurrency: 2,
    }
}

fn engine_with(
    store: Arc<MemoryStore>,
    executor: Arc<dyn NetworkExecutor>,
) -> SyncEngine {
    SyncEngine::new(store, executor, test_config())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn enqueue_persists_before_returning() {
    let store = Arc::new(MemoryStore::default());
    let engine = engine_with(store.clone(), Arc::new(ScriptedExecutor::default()));
    engine.initialize().await.unwrap();

    let id = engine
        .enqueue(OperationKind::Favorite, json!({"clip_id": "c1"}))
        .unwrap();

    let stored = store.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
    assert_eq!(stored[0].status, OperationStatus::Pending);
    assert_eq!(engine.pending_operation_count(), 1);
}

#[tokio::test]
async fn drain_converges_to_zero_and_purges_the_store() {
    let store = Arc::new(MemoryStore::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();

    engine.enqueue(OperationKind::Vote, json!({"clip_id": "c1", "vote": 1})).unwrap();
    engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c2"})).unwrap();
    engine
        .enqueue(OperationKind::SubmitClip, json!({"clip_url": "https://clips.tv/x"}))
        .unwrap();

    engine.sync_now().await.unwrap();

    assert_eq!(engine.pending_operation_count(), 0);
    assert!(store.stored().is_empty());
    assert_eq!(executor.calls().len(), 3);
    let state = engine.sync_state();
    assert_eq!(state.phase, SyncPhase::Idle);
    assert!(state.last_synced_at.is_some());
}

#[tokio::test]
async fn fails_twice_then_succeeds_with_attempt_count_three() {
    let store = Arc::new(MemoryStore::default());
    let executor = ScriptedExecutor::with_script(vec![
        Outcome::retryable("503 from upstream"),
        Outcome::retryable("timeout"),
    ]);
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();
    engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c1"})).unwrap();

    engine.sync_now().await.unwrap();
    assert_eq!(engine.pending_operation_count(), 1);
    settle().await;

    engine.sync_now().await.unwrap();
    assert_eq!(engine.pending_operation_count(), 1);
    settle().await;

    engine.sync_now().await.unwrap();
    assert_eq!(engine.pending_operation_count(), 0);

    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].attempt_count, 3);
    assert!(store.stored().is_empty());
}

#[tokio::test]
async fn operations_on_one_target_dispatch_in_submission_order() {
    let store = Arc::new(MemoryStore::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();

    let first = engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c1"})).unwrap();
    let second = engine.enqueue(OperationKind::Unfavorite, json!({"clip_id": "c1"})).unwrap();
    engine.enqueue(OperationKind::Vote, json!({"clip_id": "c9", "vote": -1})).unwrap();

    engine.sync_now().await.unwrap();

    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    let pos_first = calls.iter().position(|op| op.id == first).unwrap();
    let pos_second = calls.iter().position(|op| op.id == second).unwrap();
    assert!(pos_first < pos_second);
}

#[tokio::test]
async fn retryable_failure_holds_back_the_rest_of_its_group() {
    let store = Arc::new(MemoryStore::default());
    let executor = ScriptedExecutor::with_script(vec![Outcome::retryable("offline")]);
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();

    engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c1"})).unwrap();
    engine.enqueue(OperationKind::Unfavorite, json!({"clip_id": "c1"})).unwrap();

    engine.sync_now().await.unwrap();

    // Only the head of the group was attempted; the dependent operation
    // never ran ahead of it.
    assert_eq!(executor.calls().len(), 1);
    let stored = store.stored();
    assert_eq!(stored[0].status, OperationStatus::FailedRetryable);
    assert!(stored[0].next_attempt_at.is_some());
    assert_eq!(stored[1].status, OperationStatus::Pending);
    assert_eq!(engine.sync_state().phase, SyncPhase::Error);
}

#[tokio::test]
async fn elapsed_backoff_demotes_to_pending_before_redispatch() {
    let store = Arc::new(MemoryStore::default());
    let executor = ScriptedExecutor::with_script(vec![Outcome::retryable("503")]);
    let engine = engine_with(store.clone(), executor);
    engine.initialize().await.unwrap();

    let id = engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c1"})).unwrap();

    engine.sync_now().await.unwrap();
    settle().await;
    engine.sync_now().await.unwrap();

    // The store never holds an eligible operation still marked
    // failed_retryable: it is demoted to pending before redispatch.
    assert_eq!(
        store.transitions_for(&id),
        vec![
            OperationStatus::InFlight,
            OperationStatus::FailedRetryable,
            OperationStatus::Pending,
            OperationStatus::InFlight,
        ]
    );
    assert_eq!(engine.pending_operation_count(), 0);
}

#[tokio::test]
async fn retry_budget_exhaustion_becomes_failed_permanent() {
    let store = Arc::new(MemoryStore::default());
    let executor = ScriptedExecutor::with_script(vec![
        Outcome::retryable("502"),
        Outcome::retryable("502"),
        Outcome::retryable("502"),
    ]);
    let engine = SyncEngine::new(
        store.clone(),
        executor.clone(),
        SyncEngineConfig {
            max_attempts: 2,
            ..test_config()
        },
    );
    engine.initialize().await.unwrap();
    engine.enqueue(OperationKind::Comment, json!({"clip_id": "c1", "content": "gg"})).unwrap();

    engine.sync_now().await.unwrap();
    settle().await;
    engine.sync_now().await.unwrap();
    settle().await;
    // Terminal now; further drains must not execute it again.
    engine.sync_now().await.unwrap();

    assert_eq!(executor.calls().len(), 2);
    let failed = engine.failed_operations();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OperationStatus::FailedPermanent);
    assert!(failed[0]
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("Retry budget exhausted")));
    // Retained for the UI, still counted as not-succeeded.
    assert_eq!(engine.pending_operation_count(), 1);
}

#[tokio::test]
async fn permanent_failure_is_not_retried_and_stays_visible() {
    let store = Arc::new(MemoryStore::default());
    let executor = ScriptedExecutor::with_script(vec![Outcome::permanent("404 clip not found")]);
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();
    engine.enqueue(OperationKind::Vote, json!({"clip_id": "gone", "vote": 1})).unwrap();

    engine.sync_now().await.unwrap();
    settle().await;
    engine.sync_now().await.unwrap();

    assert_eq!(executor.calls().len(), 1);
    assert_eq!(engine.failed_operations().len(), 1);
    assert_eq!(store.stored()[0].status, OperationStatus::FailedPermanent);
}

#[tokio::test]
async fn restart_demotes_in_flight_operations_and_retries_them() {
    let mut op = Operation::new(OperationKind::Favorite, json!({"clip_id": "c1"}));
    op.status = OperationStatus::InFlight;
    op.attempt_count = 1;
    let store = MemoryStore::seeded(vec![op.clone()]);

    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();

    assert_eq!(store.stored()[0].status, OperationStatus::Pending);
    assert_eq!(engine.pending_operation_count(), 1);

    engine.sync_now().await.unwrap();
    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, op.id);
    assert_eq!(calls[0].attempt_count, 2);
    assert_eq!(engine.pending_operation_count(), 0);
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let engine = engine_with(store.clone(), Arc::new(ScriptedExecutor::default()));

    engine.initialize().await.unwrap();
    engine.initialize().await.unwrap();

    assert_eq!(store.load_calls.load(AtomicOrdering::SeqCst), 1);
}

#[tokio::test]
async fn initialize_failure_degrades_then_recovers_on_retry() {
    let store = Arc::new(MemoryStore::default());
    store.unavailable.store(true, AtomicOrdering::SeqCst);
    let engine = engine_with(store.clone(), Arc::new(ScriptedExecutor::default()));

    assert!(matches!(
        engine.initialize().await,
        Err(SyncError::StorageUnavailable(_))
    ));
    assert_eq!(engine.sync_state().phase, SyncPhase::Error);

    store.unavailable.store(false, AtomicOrdering::SeqCst);
    engine.initialize().await.unwrap();
    assert_eq!(engine.sync_state().phase, SyncPhase::Idle);
}

#[tokio::test]
async fn enqueue_rejects_loudly_when_storage_is_unavailable() {
    let store = Arc::new(MemoryStore::default());
    let engine = engine_with(store.clone(), Arc::new(ScriptedExecutor::default()));
    engine.initialize().await.unwrap();

    store.unavailable.store(true, AtomicOrdering::SeqCst);
    let result = engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c1"}));

    assert!(matches!(result, Err(SyncError::StorageUnavailable(_))));
    let state = engine.sync_state();
    assert_eq!(state.phase, SyncPhase::Error);
    assert!(state.last_error.is_some());
}

#[tokio::test]
async fn duplicate_active_idempotency_key_returns_existing_id() {
    let op = Operation::new(OperationKind::Favorite, json!({"clip_id": "c1"}));
    let store = MemoryStore::seeded(vec![op.clone()]);
    let engine = engine_with(store.clone(), Arc::new(ScriptedExecutor::default()));
    engine.initialize().await.unwrap();

    // Force the same key the seeded operation holds.
    let mut duplicate = Operation::new(OperationKind::Favorite, json!({"clip_id": "c1"}));
    duplicate.idempotency_key = op.idempotency_key.clone();
    let result = store.append(&duplicate);
    match result {
        Err(SyncError::DuplicateOperation { existing_id }) => assert_eq!(existing_id, op.id),
        other => panic!("expected DuplicateOperation, got {:?}", other),
    }
}

#[tokio::test]
async fn clear_pending_discards_queued_and_failed_operations() {
    let store = Arc::new(MemoryStore::default());
    let executor = ScriptedExecutor::with_script(vec![Outcome::permanent("400 validation")]);
    let engine = engine_with(store.clone(), executor);
    engine.initialize().await.unwrap();

    engine.enqueue(OperationKind::Vote, json!({"clip_id": "c1", "vote": 1})).unwrap();
    engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c2"})).unwrap();
    engine.sync_now().await.unwrap();
    assert_eq!(engine.failed_operations().len(), 1);

    engine.clear_pending_operations().await.unwrap();

    assert_eq!(engine.pending_operation_count(), 0);
    assert!(store.stored().is_empty());
    let state = engine.sync_state();
    assert_eq!(state.phase, SyncPhase::Idle);
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn unknown_kind_stub_is_never_dispatched() {
    let mut stub = Operation::new(OperationKind::Unknown, json!({"mystery": true}));
    stub.status = OperationStatus::FailedPermanent;
    stub.last_error = Some("Unsupported operation kind 'boost'".to_string());
    let store = MemoryStore::seeded(vec![stub]);

    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(store, executor.clone());
    engine.initialize().await.unwrap();
    engine.sync_now().await.unwrap();

    assert!(executor.calls().is_empty());
    assert_eq!(engine.pending_operation_count(), 1);
    assert_eq!(engine.failed_operations().len(), 1);
}

#[tokio::test]
async fn ambiguous_retry_applies_the_server_effect_once() {
    let store = Arc::new(MemoryStore::default());
    let executor = Arc::new(AmbiguousOnceExecutor::default());
    let engine = engine_with(store.clone(), executor.clone());
    engine.initialize().await.unwrap();

    engine.enqueue(OperationKind::Comment, json!({"clip_id": "c1", "content": "hi"})).unwrap();

    engine.sync_now().await.unwrap();
    settle().await;
    engine.sync_now().await.unwrap();

    assert_eq!(engine.pending_operation_count(), 0);
    let effects = executor.effects.lock().unwrap();
    assert_eq!(effects.len(), 1);
    assert!(effects.values().all(|&count| count == 1));
}

#[tokio::test]
async fn observers_see_pending_count_changes() {
    let store = Arc::new(MemoryStore::default());
    let engine = engine_with(store, Arc::new(ScriptedExecutor::default()));
    engine.initialize().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let _sub = engine.on_sync_state_change(move |state| {
        seen_in.lock().unwrap().push(state.pending_count);
    });

    engine.enqueue(OperationKind::Favorite, json!({"clip_id": "c1"})).unwrap();
    settle().await;
    engine.sync_now().await.unwrap();
    settle().await;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&1));
    assert_eq!(*seen.last().unwrap(), 0);
}
