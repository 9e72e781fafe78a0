use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::error::Result;

pub const INITIALIZED_EVENT: &str = "initialized";
pub const WINDOW_RESIZE_EVENT: &str = "window_resize";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialEntry {
    pub session_id: String,
    pub trial_index: u64,
    pub captured_at: u64,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntry {
    pub event_type: String,
    #[serde(default)]
    pub value: Value,
    pub timestamp: u64,
    pub interval: u64,
}

/// Everything the environment hands the record when it is created.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub condition: u32,
    pub counterbalance: u32,
    pub assignment_id: String,
    pub worker_id: String,
    pub hit_id: String,
    pub user_agent: String,
    pub viewport: (u32, u32),
}

impl Default for SessionContext {
    fn default() -> Self {
        SessionContext {
            condition: 0,
            counterbalance: 0,
            assignment_id: String::new(),
            worker_id: String::new(),
            hit_id: String::new(),
            user_agent: String::new(),
            viewport: (1024, 768),
        }
    }
}

/// Point-in-time copy of a session record, in the shape sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session_id: String,
    #[serde(default)]
    pub condition: u32,
    #[serde(default)]
    pub counterbalance: u32,
    #[serde(default)]
    pub assignment_id: String,
    #[serde(default)]
    pub worker_id: String,
    #[serde(default)]
    pub hit_id: String,
    #[serde(default)]
    pub current_trial: u64,
    #[serde(default)]
    pub bonus: f64,
    #[serde(default)]
    pub trials: Vec<TrialEntry>,
    #[serde(default)]
    pub unstructured_answers: BTreeMap<String, Value>,
    #[serde(default)]
    pub events: Vec<EventEntry>,
    #[serde(default)]
    pub user_agent: String,
}

impl Snapshot {
    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Snapshot> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)? + "\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_wire_keys() {
        let snapshot = Snapshot {
            session_id: "abc".to_owned(),
            condition: 1,
            counterbalance: 2,
            assignment_id: "A1".to_owned(),
            worker_id: "W1".to_owned(),
            hit_id: "H1".to_owned(),
            current_trial: 1,
            bonus: 0.5,
            trials: vec![TrialEntry {
                session_id: "abc".to_owned(),
                trial_index: 0,
                captured_at: 10,
                payload: json!({"score": 5}),
            }],
            unstructured_answers: BTreeMap::from([("age".to_owned(), json!(31))]),
            events: vec![EventEntry {
                event_type: INITIALIZED_EVENT.to_owned(),
                value: Value::Null,
                timestamp: 10,
                interval: 0,
            }],
            user_agent: "ua".to_owned(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["sessionId"], "abc");
        assert_eq!(value["assignmentId"], "A1");
        assert_eq!(value["currentTrial"], 1);
        assert_eq!(value["trials"][0]["trialIndex"], 0);
        assert_eq!(value["trials"][0]["capturedAt"], 10);
        assert_eq!(value["unstructuredAnswers"]["age"], 31);
        assert_eq!(value["events"][0]["eventType"], "initialized");
        assert_eq!(value["events"][0]["value"], Value::Null);
        assert_eq!(value["userAgent"], "ua");
    }

    #[test]
    fn test_snapshot_missing_fields_default() {
        let snapshot: Snapshot = serde_json::from_str(r#"{"sessionId": "xyz"}"#).unwrap();
        assert_eq!(snapshot.session_id, "xyz");
        assert_eq!(snapshot.current_trial, 0);
        assert!(snapshot.events.is_empty());
        assert!(snapshot.unstructured_answers.is_empty());
    }

    #[test]
    fn test_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let snapshot: Snapshot =
            serde_json::from_value(json!({"sessionId": "file", "bonus": 1.25})).unwrap();
        snapshot.write_to(&path).unwrap();

        assert_eq!(Snapshot::read_from(&path).unwrap(), snapshot);
        assert!(Snapshot::read_from(dir.path().join("missing.json")).is_err());
    }
}
