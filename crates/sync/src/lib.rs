//! Process-wide façade over the ClipStream offline sync engine.
//!
//! Host applications call [`configure`] once at startup, then reach the
//! shared [`SyncManager`] from anywhere through [`get_sync_manager`].

pub mod manager;
pub mod scheduler;

use std::sync::{Arc, Mutex, OnceLock};

use clipstream_core::{Result, SyncError};

pub use clipstream_core::{
    Operation, OperationKind, OperationStatus, Outcome, Subscription, SyncEngineConfig, SyncPhase,
    SyncState,
};
pub use clipstream_remote::{AccessTokenProvider, StaticTokenProvider};
pub use manager::{ConfigureError, StorageConfig, SyncManager, SyncManagerConfig};

static SYNC_MANAGER: OnceLock<Mutex<Option<Arc<SyncManager>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Option<Arc<SyncManager>>> {
    SYNC_MANAGER.get_or_init(|| Mutex::new(None))
}

/// Build the process-wide manager. Idempotent: a second call returns the
/// already-configured instance and ignores the new config.
pub fn configure(
    config: SyncManagerConfig,
) -> std::result::Result<Arc<SyncManager>, ConfigureError> {
    let mut slot = registry().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = slot.as_ref() {
        return Ok(Arc::clone(existing));
    }
    let manager = Arc::new(SyncManager::new(config)?);
    *slot = Some(Arc::clone(&manager));
    Ok(manager)
}

/// The shared manager, or `NotConfigured` if [`configure`] has not run yet.
pub fn get_sync_manager() -> Result<Arc<SyncManager>> {
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .map(Arc::clone)
        .ok_or(SyncError::NotConfigured)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SyncManagerConfig {
        SyncManagerConfig {
            storage: StorageConfig::InMemory,
            base_url: "http://127.0.0.1:1".to_string(),
            tokens: Arc::new(StaticTokenProvider::new("tok")),
            engine: SyncEngineConfig::default(),
        }
    }

    #[test]
    fn facade_hands_out_one_shared_instance() {
        assert!(matches!(
            get_sync_manager(),
            Err(SyncError::NotConfigured)
        ));

        let first = configure(test_config()).expect("configure");
        let second = configure(test_config()).expect("reconfigure is idempotent");
        let fetched = get_sync_manager().expect("configured");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &fetched));
    }
}
