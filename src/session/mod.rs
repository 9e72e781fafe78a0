mod clock;
mod error;
mod facade;
mod record;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, SessionError};
pub use facade::{SessionFacade, SessionState};
pub use record::SessionRecord;
pub use types::{EventEntry, SessionContext, Snapshot, TrialEntry};
