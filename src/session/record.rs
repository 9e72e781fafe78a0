use log::{debug, trace};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::clock::Clock;
use super::error::{Result, SessionError};
use super::types::{
    EventEntry, SessionContext, Snapshot, TrialEntry, INITIALIZED_EVENT, WINDOW_RESIZE_EVENT,
};

/// All data collected for one participant session.
///
/// Trials and events are append-only. Accessors hand out copies so the
/// ordering and counter invariants can only change through the `add_*`
/// methods.
pub struct SessionRecord {
    session_id: String,
    condition: u32,
    counterbalance: u32,
    assignment_id: String,
    worker_id: String,
    hit_id: String,
    current_trial: u64,
    bonus: f64,
    trials: Vec<TrialEntry>,
    unstructured_answers: BTreeMap<String, Value>,
    events: Vec<EventEntry>,
    user_agent: String,
    clock: Arc<dyn Clock>,
}

impl SessionRecord {
    /// Creates a fresh record and writes the `initialized` and
    /// `window_resize` events.
    pub fn initialize(
        session_id: &str,
        context: &SessionContext,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut record = SessionRecord::blank(session_id, context, clock)?;
        record.add_event(INITIALIZED_EVENT, Value::Null)?;
        let (width, height) = context.viewport;
        record.add_event(WINDOW_RESIZE_EVENT, json!([width, height]))?;
        debug!("session {} initialized", record.session_id);
        Ok(record)
    }

    fn blank(session_id: &str, context: &SessionContext, clock: Arc<dyn Clock>) -> Result<Self> {
        if session_id.trim().is_empty() {
            return Err(SessionError::Initialization);
        }

        Ok(SessionRecord {
            session_id: session_id.to_owned(),
            condition: context.condition,
            counterbalance: context.counterbalance,
            assignment_id: context.assignment_id.clone(),
            worker_id: context.worker_id.clone(),
            hit_id: context.hit_id.clone(),
            current_trial: 0,
            bonus: 0.0,
            trials: Vec::new(),
            unstructured_answers: BTreeMap::new(),
            events: Vec::new(),
            user_agent: context.user_agent.clone(),
            clock,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current_trial(&self) -> u64 {
        self.current_trial
    }

    pub fn bonus(&self) -> f64 {
        self.bonus
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn add_trial_data(&mut self, payload: Value) {
        let entry = TrialEntry {
            session_id: self.session_id.clone(),
            trial_index: self.current_trial,
            captured_at: self.clock.now_millis(),
            payload,
        };
        trace!("trial {} recorded", entry.trial_index);
        self.trials.push(entry);
        self.current_trial += 1;
    }

    pub fn add_unstructured_data(&mut self, key: &str, value: Value) {
        self.unstructured_answers.insert(key.to_owned(), value);
    }

    pub fn set_bonus(&mut self, bonus: f64) {
        self.bonus = bonus;
    }

    pub fn add_event(&mut self, event_type: &str, value: Value) -> Result<()> {
        let now = self.clock.now_millis();

        let (timestamp, interval) = match self.events.last() {
            _ if event_type == INITIALIZED_EVENT => (now, 0),
            // wall clock stepping backwards must not reorder the log
            Some(last) => {
                let timestamp = now.max(last.timestamp);
                (timestamp, timestamp - last.timestamp)
            }
            None => return Err(SessionError::OutOfSequence(event_type.to_owned())),
        };

        trace!("event {} (+{}ms)", event_type, interval);
        self.events.push(EventEntry {
            event_type: event_type.to_owned(),
            value,
            timestamp,
            interval,
        });
        Ok(())
    }

    pub fn trial_data(&self) -> Vec<TrialEntry> {
        self.trials.clone()
    }

    pub fn event_data(&self) -> Vec<EventEntry> {
        self.events.clone()
    }

    pub fn question_data(&self) -> BTreeMap<String, Value> {
        self.unstructured_answers.clone()
    }

    pub fn serialize(&self) -> Snapshot {
        Snapshot {
            session_id: self.session_id.clone(),
            condition: self.condition,
            counterbalance: self.counterbalance,
            assignment_id: self.assignment_id.clone(),
            worker_id: self.worker_id.clone(),
            hit_id: self.hit_id.clone(),
            current_trial: self.current_trial,
            bonus: self.bonus,
            trials: self.trials.clone(),
            unstructured_answers: self.unstructured_answers.clone(),
            events: self.events.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Replaces the record's state with a persisted snapshot of the same
    /// session. A snapshot without events keeps the current event log.
    pub fn hydrate(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.session_id != self.session_id {
            return Err(SessionError::Mismatch {
                expected: self.session_id.clone(),
                found: snapshot.session_id,
            });
        }
        if snapshot.current_trial != snapshot.trials.len() as u64 {
            return Err(SessionError::InvalidSnapshot(format!(
                "currentTrial is {} but {} trials are stored",
                snapshot.current_trial,
                snapshot.trials.len()
            )));
        }
        if let Some((i, trial)) = snapshot
            .trials
            .iter()
            .enumerate()
            .find(|(i, trial)| trial.trial_index != *i as u64)
        {
            return Err(SessionError::InvalidSnapshot(format!(
                "trial {} has index {}",
                i, trial.trial_index
            )));
        }

        self.condition = snapshot.condition;
        self.counterbalance = snapshot.counterbalance;
        self.assignment_id = snapshot.assignment_id;
        self.worker_id = snapshot.worker_id;
        self.hit_id = snapshot.hit_id;
        self.current_trial = snapshot.current_trial;
        self.bonus = snapshot.bonus;
        self.trials = snapshot.trials;
        self.unstructured_answers = snapshot.unstructured_answers;
        if !snapshot.events.is_empty() {
            self.events = snapshot.events;
        }
        self.user_agent = snapshot.user_agent;

        debug!(
            "session {} hydrated at trial {}",
            self.session_id, self.current_trial
        );
        Ok(())
    }
}
