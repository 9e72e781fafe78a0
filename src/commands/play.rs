use crate::session::{EventEntry, Result, Snapshot, TrialEntry};

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

enum Mark {
    Event(EventEntry),
    Trial(TrialEntry),
}

impl Mark {
    fn timestamp(&self) -> u64 {
        match self {
            Mark::Event(event) => event.timestamp,
            Mark::Trial(trial) => trial.captured_at,
        }
    }

    fn describe(&self) -> String {
        match self {
            Mark::Event(event) if event.value.is_null() => format!("event {}", event.event_type),
            Mark::Event(event) => format!("event {} {}", event.event_type, event.value),
            Mark::Trial(trial) => format!("trial {} {}", trial.trial_index, trial.payload),
        }
    }
}

/// Yields each mark with the delay since the previous one.
struct RelativeTimeIter<I: Iterator<Item = Mark>>(I, Option<u64>);

impl<I: Iterator<Item = Mark>> Iterator for RelativeTimeIter<I> {
    type Item = (u64, Mark);

    fn next(&mut self) -> Option<Self::Item> {
        let prev_timestamp = self.1;

        self.0.next().map(|mark| {
            let ts = mark.timestamp();
            let delay = match prev_timestamp {
                None => 0, // first mark, start right away
                Some(prev) => ts.saturating_sub(prev),
            };
            self.1 = Some(ts);
            (delay, mark)
        })
    }
}

/// Replays a saved session's events and trials on the terminal.
pub struct Play {
    snapshot: Snapshot,
    speed: f64,
}

impl Play {
    pub fn new(filename: &str, speed: f64) -> Result<Self> {
        Ok(Play {
            snapshot: Snapshot::read_from(filename)?,
            speed,
        })
    }

    fn timeline(&self) -> RelativeTimeIter<std::vec::IntoIter<Mark>> {
        let mut marks: Vec<Mark> = self
            .snapshot
            .events
            .iter()
            .cloned()
            .map(Mark::Event)
            .chain(self.snapshot.trials.iter().cloned().map(Mark::Trial))
            .collect();
        marks.sort_by_key(Mark::timestamp);
        RelativeTimeIter(marks.into_iter(), None)
    }

    pub fn execute(&self) -> Result<()> {
        self.execute_to(&mut io::stdout())
    }

    pub fn execute_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "Session {}", self.snapshot.session_id)?;
        for (delay, mark) in self.timeline() {
            if self.speed > 0.0 && delay > 0 {
                thread::sleep(Duration::from_secs_f64(delay as f64 / 1000.0 / self.speed));
            }
            writeln!(out, "+{:>6}ms {}", delay, mark.describe())?;
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        serde_json::from_value(json!({
            "sessionId": "play",
            "trials": [
                {"sessionId": "play", "trialIndex": 0, "capturedAt": 1500, "payload": {"key": "f"}}
            ],
            "events": [
                {"eventType": "initialized", "value": null, "timestamp": 1000, "interval": 0},
                {"eventType": "window_resize", "value": [800, 600], "timestamp": 1000, "interval": 0},
                {"eventType": "blur", "value": null, "timestamp": 2000, "interval": 1000}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_timeline_delays() {
        let play = Play {
            snapshot: snapshot(),
            speed: 0.0,
        };
        let delays: Vec<u64> = play.timeline().map(|(delay, _)| delay).collect();
        assert_eq!(delays, vec![0, 0, 500, 500]);
    }

    #[test]
    fn test_play() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("play.json");
        snapshot().write_to(&path).unwrap();

        let play = Play::new(path.to_str().unwrap(), 0.0).unwrap();
        let mut out = Vec::new();
        play.execute_to(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Session play");
        assert_eq!(lines[1], "+     0ms event initialized");
        assert_eq!(lines[2], "+     0ms event window_resize [800,600]");
        assert_eq!(lines[3], "+   500ms trial 0 {\"key\":\"f\"}");
        assert_eq!(lines[4], "+   500ms event blur");
    }
}
