use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use hippogym_core::Result;
use hippogym_core::experiment::Recorder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where and how trial records are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Root directory. Recording is disabled when unset.
    pub dir: Option<PathBuf>,
    /// Start a new file at every episode boundary instead of one file per trial.
    pub per_episode: bool,
}

/// A single recorded line in a JSONL file.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Wall-clock timestamp when the event was recorded.
    pub ts: String,
    #[serde(flatten)]
    pub event: Value,
}

/// Writes one JSON line per record and flushes immediately, so a worker
/// aborted mid-trial keeps everything recorded before the abort.
pub struct JsonlRecorder {
    dir: PathBuf,
    per_episode: bool,
    episode: u32,
    writer: Option<File>,
}

impl JsonlRecorder {
    /// Create `<root>/<trial_id>/` and open the first file in it.
    pub fn create(root: &Path, trial_id: &str, per_episode: bool) -> Result<Self> {
        let dir = root.join(trial_id);
        std::fs::create_dir_all(&dir)?;
        let mut recorder = Self {
            dir,
            per_episode,
            episode: 0,
            writer: None,
        };
        recorder.open()?;
        Ok(recorder)
    }

    pub fn current_path(&self) -> PathBuf {
        if self.per_episode {
            self.dir.join(format!("episode_{:04}.jsonl", self.episode))
        } else {
            self.dir.join("trial.jsonl")
        }
    }

    fn open(&mut self) -> Result<()> {
        let path = self.current_path();
        self.writer = Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?,
        );
        tracing::debug!(path = %path.display(), "recorder: opened file");
        Ok(())
    }
}

impl Recorder for JsonlRecorder {
    fn record(&mut self, event: Value) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let line = serde_json::to_string(&RecordedEvent {
            ts: Utc::now().to_rfc3339(),
            event,
        })?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.episode += 1;
        if self.per_episode {
            self.close()?;
            self.open()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .expect("should read recording")
            .lines()
            .map(|l| serde_json::from_str(l).expect("line should be JSON"))
            .collect()
    }

    #[test]
    fn records_are_flushed_per_line() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = JsonlRecorder::create(tmp.path(), "t1", false).unwrap();
        rec.record(json!({"kind": "message", "event": {"ACTION": "left"}})).unwrap();

        // Visible before close.
        let lines = read_lines(&tmp.path().join("t1/trial.jsonl"));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "message");
        assert!(lines[0]["ts"].is_string());
    }

    #[test]
    fn per_episode_opens_new_file_on_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = JsonlRecorder::create(tmp.path(), "t2", true).unwrap();
        rec.record(json!({"kind": "step", "n": 0})).unwrap();
        rec.reset().unwrap();
        rec.record(json!({"kind": "step", "n": 1})).unwrap();
        rec.record(json!({"kind": "step", "n": 2})).unwrap();
        rec.close().unwrap();

        assert_eq!(read_lines(&tmp.path().join("t2/episode_0000.jsonl")).len(), 1);
        assert_eq!(read_lines(&tmp.path().join("t2/episode_0001.jsonl")).len(), 2);
    }

    #[test]
    fn whole_trial_file_survives_resets() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = JsonlRecorder::create(tmp.path(), "t3", false).unwrap();
        rec.record(json!({"n": 0})).unwrap();
        rec.reset().unwrap();
        rec.record(json!({"n": 1})).unwrap();
        assert_eq!(read_lines(&rec.current_path()).len(), 2);
    }

    #[test]
    fn record_after_close_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = JsonlRecorder::create(tmp.path(), "t4", false).unwrap();
        rec.close().unwrap();
        rec.record(json!({"late": true})).unwrap();
        assert!(read_lines(&tmp.path().join("t4/trial.jsonl")).is_empty());
    }

    #[test]
    fn jsonl_line_is_single_line() {
        let event = RecordedEvent {
            ts: "2026-02-23T12:00:00+00:00".into(),
            event: json!({"text": "multi\nline"}),
        };
        let line = serde_json::to_string(&event).expect("should serialize");
        assert!(!line.contains('\n'));
    }
}
