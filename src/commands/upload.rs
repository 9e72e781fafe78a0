use crate::api::{SyncService, SyncStatus};
use crate::session::{Result, Snapshot};

use log::info;
use std::sync::Arc;

/// Sends a snapshot file to the store, replacing whatever it held for that
/// session.
pub struct Upload {
    api_service: Arc<dyn SyncService>,
    snapshot: Snapshot,
    status: SyncStatus,
}

impl Upload {
    pub fn new(api_service: Arc<dyn SyncService>, filepath: &str, finished: bool) -> Result<Self> {
        Ok(Upload {
            api_service,
            snapshot: Snapshot::read_from(filepath)?,
            status: if finished {
                SyncStatus::Finished
            } else {
                SyncStatus::Saving
            },
        })
    }

    pub fn execute(&self) -> Result<()> {
        let receipt = self.api_service.save(&self.snapshot, self.status)?;
        info!("uploaded session {}", self.snapshot.session_id);
        println!(
            "Uploaded session {} ({} trials)",
            self.snapshot.session_id,
            self.snapshot.trials.len()
        );
        if receipt.finished_battery {
            println!("Battery finished");
        }
        Ok(())
    }
}
