use serde::Deserialize;
use serde_json::Value;

/// One step of a recording script, one JSON value per line.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ScriptLine {
    Trial(Value),
    Answer {
        key: String,
        value: Value,
    },
    Event {
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default)]
        value: Value,
    },
    Bonus(f64),
    Wait(u64),
    Save,
    Complete,
}
