use crate::api::SyncService;
use crate::session::Result;

use std::sync::Arc;

pub struct Show {
    api_service: Arc<dyn SyncService>,
    session_id: String,
}

impl Show {
    pub fn new(api_service: Arc<dyn SyncService>, session_id: String) -> Self {
        Show {
            api_service,
            session_id,
        }
    }

    pub fn execute(&self) -> Result<()> {
        match self.api_service.load(&self.session_id)? {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("session {} has no stored record", self.session_id),
        }
        Ok(())
    }
}
