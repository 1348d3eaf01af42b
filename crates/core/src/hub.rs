//! Fan-out of sync state changes to UI observers.
//!
//! Listeners live in an explicit id → callback registry; subscribing returns
//! an unsubscribe handle. Dispatch is deferred to the next task tick and
//! coalesced, so a burst of transitions inside one drain produces one
//! notification carrying the latest state instead of one per operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::operation::SyncState;

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    latest: Mutex<Option<SyncState>>,
    dispatch_armed: AtomicBool,
}

impl HubInner {
    fn dispatch(&self) {
        // Disarm before reading, so a publish racing with this dispatch
        // schedules a fresh one rather than being dropped.
        self.dispatch_armed.store(false, Ordering::SeqCst);
        let state = match self.latest.lock() {
            Ok(mut latest) => latest.take(),
            Err(_) => None,
        };
        let Some(state) = state else {
            return;
        };

        // Snapshot outside the lock: a callback may subscribe or unsubscribe
        // without deadlocking, and removing one listener mid-notification
        // never skips the others.
        let snapshot: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(&state);
        }
    }
}

/// Observer registry shared by the engine and its subscribers.
#[derive(Clone, Default)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. The returned handle unsubscribes on drop.
    pub fn subscribe(&self, listener: impl Fn(&SyncState) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Queue a state change for deferred delivery. Consecutive publishes
    /// before the dispatch tick coalesce into one notification with the
    /// latest state.
    pub fn publish(&self, state: SyncState) {
        if let Ok(mut latest) = self.inner.latest.lock() {
            *latest = Some(state);
        }
        if self.inner.dispatch_armed.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    inner.dispatch();
                });
            }
            // No runtime (engine driven from sync test code): deliver inline.
            Err(_) => inner.dispatch(),
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Unsubscribe handle returned by [`SubscriptionHub::subscribe`].
pub struct Subscription {
    hub: Weak<HubInner>,
    id: u64,
}

impl Subscription {
    /// Explicitly remove the listener. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::SyncPhase;
    use std::sync::atomic::AtomicUsize;

    fn state(pending: usize) -> SyncState {
        SyncState {
            phase: SyncPhase::Idle,
            last_synced_at: None,
            pending_count: pending,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn burst_of_publishes_coalesces_into_one_notification() {
        let hub = SubscriptionHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let calls_in = Arc::clone(&calls);
        let seen_in = Arc::clone(&seen);
        let _sub = hub.subscribe(move |s| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            seen_in.lock().unwrap().push(s.pending_count);
        });

        hub.publish(state(3));
        hub.publish(state(2));
        hub.publish(state(1));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn unsubscribing_one_listener_during_notification_keeps_the_other() {
        let hub = SubscriptionHub::new();
        let second_calls = Arc::new(AtomicUsize::new(0));

        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let victim_slot = Arc::clone(&victim);
        let _killer = hub.subscribe(move |_| {
            // Unsubscribe the other listener from inside a callback.
            victim_slot.lock().unwrap().take();
        });
        let second_calls_in = Arc::clone(&second_calls);
        let sub = hub.subscribe(move |_| {
            second_calls_in.fetch_add(1, Ordering::SeqCst);
        });
        *victim.lock().unwrap() = Some(sub);

        hub.publish(state(1));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        // This round still delivered to every snapshotted listener.
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(hub.listener_count(), 1);

        hub.publish(state(0));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_notifications() {
        let hub = SubscriptionHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let sub = hub.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(state(1));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        hub.publish(state(0));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
