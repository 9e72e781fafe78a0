mod expfactory;
mod memory;

use serde::{Deserialize, Serialize};

use crate::session::{Result, Snapshot};

pub use expfactory::{user_agent, Config, ExpFactory};
pub use memory::MemoryStore;

/// Status sent alongside a saved record. The server closes the result once
/// it receives `FINISHED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    Saving,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    pub status: SyncStatus,
    pub finished_battery: bool,
}

/// Key-value store of session records addressed by session id.
pub trait SyncService: Send + Sync {
    /// `None` when the store has no record for the session yet.
    fn load(&self, session_id: &str) -> Result<Option<Snapshot>>;
    /// Whole-record replace.
    fn save(&self, snapshot: &Snapshot, status: SyncStatus) -> Result<SaveReceipt>;
}
