use log::{debug, error, info};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::clock::{Clock, SystemClock};
use super::error::{Result, SessionError};
use super::record::SessionRecord;
use super::types::{EventEntry, SessionContext, Snapshot, TrialEntry};
use crate::api::{SaveReceipt, SyncService, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Saving,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Saving => "saving",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One slot of the in-flight save count, released on drop even when the
/// save thread panics.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        InFlight(count.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The recording surface handed to whatever drives the experiment.
///
/// Owns one [`SessionRecord`] once loaded. Record and read calls made before
/// that fail with [`SessionError::NotReady`]. A save in flight does not block
/// further recording: it works on its own snapshot.
pub struct SessionFacade {
    session_id: String,
    context: SessionContext,
    service: Arc<dyn SyncService>,
    clock: Arc<dyn Clock>,
    record: Option<SessionRecord>,
    loading: bool,
    completed: bool,
    in_flight: Arc<AtomicUsize>,
}

impl SessionFacade {
    pub fn new(
        session_id: &str,
        service: Arc<dyn SyncService>,
        context: SessionContext,
    ) -> Result<Self> {
        if session_id.trim().is_empty() {
            return Err(SessionError::Initialization);
        }

        Ok(SessionFacade {
            session_id: session_id.to_owned(),
            context,
            service,
            clock: Arc::new(SystemClock),
            record: None,
            loading: false,
            completed: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Builds the facade and loads the record before returning, so callers
    /// can start recording right away.
    pub fn create(
        session_id: &str,
        service: Arc<dyn SyncService>,
        context: SessionContext,
    ) -> Result<Self> {
        let mut facade = SessionFacade::new(session_id, service, context)?;
        facade.load()?;
        Ok(facade)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fetches the stored record, or starts a fresh one when the store has
    /// none. Blocks until the store answers.
    pub fn load(&mut self) -> Result<()> {
        if self.record.is_some() {
            return Ok(());
        }

        self.loading = true;
        debug!("session {}: {}", self.session_id, self.state());
        let result = self.fetch_record();
        self.loading = false;

        self.record = Some(result?);
        debug!("session {}: {}", self.session_id, self.state());
        Ok(())
    }

    fn fetch_record(&self) -> Result<SessionRecord> {
        let stored = self.service.load(&self.session_id)?;
        let mut record =
            SessionRecord::initialize(&self.session_id, &self.context, self.clock.clone())?;
        if let Some(snapshot) = stored {
            record.hydrate(snapshot)?;
        }
        Ok(record)
    }

    pub fn state(&self) -> SessionState {
        match &self.record {
            None if self.loading => SessionState::Loading,
            None => SessionState::Uninitialized,
            Some(_) if self.in_flight.load(Ordering::SeqCst) > 0 => SessionState::Saving,
            Some(_) => SessionState::Ready,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn record(&self) -> Result<&SessionRecord> {
        let state = self.state();
        self.record
            .as_ref()
            .ok_or(SessionError::NotReady(state.name()))
    }

    fn record_mut(&mut self) -> Result<&mut SessionRecord> {
        let state = self.state();
        self.record
            .as_mut()
            .ok_or(SessionError::NotReady(state.name()))
    }

    pub fn record_trial_data(&mut self, payload: Value) -> Result<()> {
        self.record_mut()?.add_trial_data(payload);
        Ok(())
    }

    /// Sets a named answer, overwriting any earlier value for the key.
    pub fn record_unstructured_data(&mut self, key: &str, value: Value) -> Result<()> {
        self.record_mut()?.add_unstructured_data(key, value);
        Ok(())
    }

    pub fn record_event(&mut self, event_type: &str, value: Value) -> Result<()> {
        self.record_mut()?.add_event(event_type, value)
    }

    pub fn set_bonus(&mut self, bonus: f64) -> Result<()> {
        self.record_mut()?.set_bonus(bonus);
        Ok(())
    }

    pub fn trial_data(&self) -> Result<Vec<TrialEntry>> {
        Ok(self.record()?.trial_data())
    }

    pub fn event_data(&self) -> Result<Vec<EventEntry>> {
        Ok(self.record()?.event_data())
    }

    pub fn question_data(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.record()?.question_data())
    }

    pub fn current_trial(&self) -> Result<u64> {
        Ok(self.record()?.current_trial())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.record()?.serialize())
    }

    /// Sends a snapshot of the record taken now. Exactly one of the callbacks
    /// runs, on the save thread. Nothing is retried.
    pub fn save<C, E>(&self, on_complete: C, on_error: E) -> Result<JoinHandle<()>>
    where
        C: FnOnce(SaveReceipt) + Send + 'static,
        E: FnOnce(SessionError) + Send + 'static,
    {
        let snapshot = self.record()?.serialize();
        let status = if self.completed {
            SyncStatus::Finished
        } else {
            SyncStatus::Saving
        };

        let service = self.service.clone();
        let in_flight = InFlight::enter(&self.in_flight);

        let handle = thread::spawn(move || {
            let result = service.save(&snapshot, status);
            drop(in_flight);
            match result {
                Ok(receipt) => {
                    info!(
                        "session {} saved at trial {} ({:?})",
                        snapshot.session_id, snapshot.current_trial, receipt.status
                    );
                    on_complete(receipt);
                }
                Err(err) => {
                    error!("saving session {}: {}", snapshot.session_id, err);
                    on_error(err);
                }
            }
        });
        Ok(handle)
    }

    /// Signals the end of the session. Recording stays possible; later
    /// saves tell the server the session is finished.
    pub fn complete_session(&mut self) -> Result<()> {
        self.record()?;
        self.completed = true;
        info!("session {} complete", self.session_id);
        Ok(())
    }
}
