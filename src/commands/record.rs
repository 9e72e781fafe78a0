use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, trace};

use crate::commands::types::ScriptLine;
use crate::session::{Result, SessionError, SessionFacade};

/// Drives a session from a script of plugin calls, the way stimulus plugins
/// would during a live experiment.
pub struct Record {
    script: String,
    output: Option<String>,
    facade: SessionFacade,
    pending: Vec<JoinHandle<()>>,
    failed_saves: Arc<AtomicUsize>,
}

impl Record {
    pub fn new(script: String, output: Option<String>, facade: SessionFacade) -> Result<Self> {
        if !Path::new(&script).exists() {
            return Err(SessionError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("script {} does not exist", script),
            )));
        }

        Ok(Record {
            script,
            output,
            facade,
            pending: Vec::new(),
            failed_saves: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Replays the script. Saves already started are always waited for and
    /// the output file is written even when a step fails; the first error is
    /// returned afterwards.
    pub fn execute(&mut self) -> Result<()> {
        println!("Recording session {}", self.facade.session_id());

        let replayed = self.replay();

        let total = self.pending.len();
        for handle in self.pending.drain(..) {
            if handle.join().is_err() {
                self.failed_saves.fetch_add(1, Ordering::SeqCst);
            }
        }

        let written = match &self.output {
            Some(output) => self
                .facade
                .snapshot()
                .and_then(|snapshot| snapshot.write_to(output))
                .map(|_| println!("Record finished. Result saved to file {}", output)),
            None => Ok(()),
        };

        replayed?;
        written?;
        match self.failed_saves.load(Ordering::SeqCst) {
            0 => Ok(()),
            failed => Err(SessionError::Persistence(format!(
                "{} of {} saves failed",
                failed, total
            ))),
        }
    }

    fn replay(&mut self) -> Result<()> {
        let reader = BufReader::new(File::open(&self.script)?);
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let step: ScriptLine = serde_json::from_str(&line).map_err(|e| {
                error!("{}:{}: {}", self.script, n + 1, e);
                e
            })?;
            trace!("step {}: {:?}", n + 1, step);
            self.apply(step)?;
        }
        Ok(())
    }

    fn apply(&mut self, step: ScriptLine) -> Result<()> {
        match step {
            ScriptLine::Trial(payload) => self.facade.record_trial_data(payload),
            ScriptLine::Answer { key, value } => self.facade.record_unstructured_data(&key, value),
            ScriptLine::Event { event_type, value } => {
                self.facade.record_event(&event_type, value)
            }
            ScriptLine::Bonus(amount) => self.facade.set_bonus(amount),
            ScriptLine::Wait(ms) => {
                thread::sleep(Duration::from_millis(ms));
                Ok(())
            }
            ScriptLine::Save => {
                let failed_saves = self.failed_saves.clone();
                let handle = self.facade.save(
                    |receipt| {
                        if receipt.finished_battery {
                            println!("Battery finished");
                        }
                    },
                    move |_| {
                        failed_saves.fetch_add(1, Ordering::SeqCst);
                    },
                )?;
                self.pending.push(handle);
                Ok(())
            }
            ScriptLine::Complete => self.facade.complete_session(),
        }
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `1280x800`.
pub fn parse_viewport(s: &str) -> Option<(u32, u32)> {
    let (width, height) = s.trim().split_once(|c: char| c == 'x' || c == 'X')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryStore, SaveReceipt, SyncService, SyncStatus};
    use crate::session::{SessionContext, Snapshot};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::Mutex;
    use serde_json::json;
    use std::fs;

    fn write_script(dir: &Path, lines: &[&str]) -> String {
        let path = dir.join("script.jsonl");
        fs::write(&path, lines.join("\n")).unwrap();
        path.to_str().unwrap().to_owned()
    }

    #[test]
    fn test_parse_viewport() {
        assert_eq!(parse_viewport("1280x800"), Some((1280, 800)));
        assert_eq!(parse_viewport(" 640X480 "), Some((640, 480)));
        assert_eq!(parse_viewport("1280"), None);
        assert_eq!(parse_viewport("wide x tall"), None);
    }

    #[test]
    fn test_record_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            &[
                r#"{"answer": {"key": "consent", "value": true}}"#,
                r#"{"trial": {"stimulus": "a.wav", "response": 1}}"#,
                r#"{"event": {"type": "blur"}}"#,
                "",
                r#"{"answer": {"key": "consent", "value": "withdrawn"}}"#,
                r#"{"trial": {"stimulus": "b.wav", "response": 2}}"#,
                r#"{"bonus": 0.25}"#,
                r#""save""#,
                r#""complete""#,
                r#""save""#,
            ],
        );
        let output = dir.path().join("out.json");

        let store = Arc::new(MemoryStore::new());
        let facade =
            SessionFacade::create("rec-1", store.clone(), SessionContext::default()).unwrap();
        let mut record =
            Record::new(script, Some(output.to_str().unwrap().to_owned()), facade).unwrap();
        record.execute().unwrap();

        assert_eq!(store.save_count(), 2);
        let saved = store.get("rec-1").unwrap();
        let written = Snapshot::read_from(&output).unwrap();
        assert_eq!(written.current_trial, 2);
        assert_eq!(written.trials[1].payload["stimulus"], "b.wav");
        assert_eq!(written.unstructured_answers["consent"], json!("withdrawn"));
        assert_eq!(written.events[2].event_type, "blur");
        assert_eq!(written.bonus, 0.25);
        assert_eq!(saved.current_trial, 2);
        assert!(record.facade.is_completed());
    }

    #[test]
    fn test_record_reports_failed_saves() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), &[r#"{"trial": 1}"#, r#""save""#]);

        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let facade = SessionFacade::create("rec-2", store, SessionContext::default()).unwrap();
        let err = Record::new(script, None, facade).unwrap().execute().unwrap_err();
        assert!(err.is_persistence());
    }

    #[test]
    fn test_record_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), &[r#"{"trial": 1}"#, "{not json"]);

        let store = Arc::new(MemoryStore::new());
        let facade = SessionFacade::create("rec-3", store, SessionContext::default()).unwrap();
        let mut record = Record::new(script, None, facade).unwrap();
        assert!(matches!(record.execute(), Err(SessionError::Json(_))));
        assert_eq!(record.facade.current_trial().unwrap(), 1);
    }

    /// Lets a save through only after the test has seen it start.
    struct HeldStore {
        started: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
        inner: MemoryStore,
    }

    impl SyncService for HeldStore {
        fn load(&self, _: &str) -> Result<Option<Snapshot>> {
            Ok(None)
        }

        fn save(&self, snapshot: &Snapshot, status: SyncStatus) -> Result<SaveReceipt> {
            self.started.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.save(snapshot, status)
        }
    }

    #[test]
    fn test_record_bad_line_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), &[r#"{"trial": 1}"#, r#""save""#, "{not json"]);
        let output = dir.path().join("out.json");

        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel();
        let store = Arc::new(HeldStore {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
            inner: MemoryStore::new(),
        });
        let facade =
            SessionFacade::create("rec-5", store.clone(), SessionContext::default()).unwrap();
        let mut record =
            Record::new(script, Some(output.to_str().unwrap().to_owned()), facade).unwrap();

        let releaser = thread::spawn(move || {
            started_rx.recv().unwrap();
            thread::sleep(Duration::from_millis(50));
            release_tx.send(()).unwrap();
        });

        assert!(matches!(record.execute(), Err(SessionError::Json(_))));
        releaser.join().unwrap();

        assert!(record.pending.is_empty());
        assert_eq!(store.inner.save_count(), 1);
        assert_eq!(store.inner.get("rec-5").unwrap().current_trial, 1);
        assert_eq!(Snapshot::read_from(&output).unwrap().current_trial, 1);
    }

    #[test]
    fn test_record_missing_script() {
        let store = Arc::new(MemoryStore::new());
        let facade = SessionFacade::create("rec-4", store, SessionContext::default()).unwrap();
        assert!(Record::new("/nonexistent/script.jsonl".to_owned(), None, facade).is_err());
    }
}
