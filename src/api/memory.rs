use super::{SaveReceipt, SyncService, SyncStatus};
use crate::session::{Result, SessionError, Snapshot};

use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-process record store, used for offline sessions.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Snapshot>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_record(snapshot: Snapshot) -> Self {
        let store = MemoryStore::default();
        store.put(snapshot);
        store
    }

    pub fn put(&self, snapshot: Snapshot) {
        self.lock().insert(snapshot.session_id.clone(), snapshot);
    }

    pub fn get(&self, session_id: &str) -> Option<Snapshot> {
        self.lock().get(session_id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every following save fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Snapshot>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SyncService for MemoryStore {
    fn load(&self, session_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.get(session_id))
    }

    fn save(&self, snapshot: &Snapshot, status: SyncStatus) -> Result<SaveReceipt> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SessionError::Persistence("store unavailable".to_owned()));
        }

        self.put(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!(
            "stored session {} ({} trials)",
            snapshot.session_id,
            snapshot.trials.len()
        );
        Ok(SaveReceipt {
            status,
            finished_battery: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(id: &str, trial: u64) -> Snapshot {
        serde_json::from_value(json!({"sessionId": id, "currentTrial": trial})).unwrap()
    }

    #[test]
    fn test_save_replaces_whole_record() {
        let store = MemoryStore::new();
        assert!(store.load("s1").unwrap().is_none());

        store.save(&snapshot("s1", 1), SyncStatus::Saving).unwrap();
        store.save(&snapshot("s1", 4), SyncStatus::Finished).unwrap();

        assert_eq!(store.load("s1").unwrap().unwrap().current_trial, 4);
        assert_eq!(store.save_count(), 2);
    }

    #[test]
    fn test_failing_store() {
        let store = MemoryStore::with_record(snapshot("s1", 1));
        store.set_failing(true);

        let err = store.save(&snapshot("s1", 9), SyncStatus::Saving).unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.get("s1").unwrap().current_trial, 1);
        assert_eq!(store.save_count(), 0);
    }
}
