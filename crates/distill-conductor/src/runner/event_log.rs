//! Structured event log for pipeline runs.
//!
//! Writes append-only JSONL to `{intermediate}/runs/{run_id}.jsonl`.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A run event. Serialized as tagged JSON (`"type": "run_start"`, etc.).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        run_id: String,
        stage: String,
        records: usize,
    },
    RecordStart {
        video_id: String,
        stage: String,
    },
    RecordAnalyzed {
        video_id: String,
        segments_placed: usize,
        segments_dropped: usize,
        retries: u32,
        duration_ms: u64,
    },
    RecordUploaded {
        video_id: String,
        source_id: String,
        notebook: String,
        retries: u32,
        duration_ms: u64,
    },
    RecordSkipped {
        video_id: String,
        reason: String,
    },
    RecordFailed {
        video_id: String,
        stage: String,
        error_code: String,
        error: String,
        duration_ms: u64,
    },
    RunCompleted {
        stage: String,
        succeeded: usize,
        failed: usize,
    },
    RunAborted {
        stage: String,
        reason: String,
        not_started: usize,
    },
}

/// Wrapper that adds sequence number and timestamp to each event.
#[derive(Debug, Serialize)]
pub struct FullEvent {
    pub seq: u32,
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

/// Append-only JSONL event writer.
pub struct EventLogger {
    jsonl_path: Option<PathBuf>,
    seq: u32,
}

impl EventLogger {
    /// Path: `{runs_dir}/{run_id}.jsonl`.
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        Self {
            jsonl_path: Some(runs_dir.join(format!("{run_id}.jsonl"))),
            seq: 0,
        }
    }

    /// A logger that drops every event.
    pub fn disabled() -> Self {
        Self {
            jsonl_path: None,
            seq: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.jsonl_path.as_deref()
    }

    /// Record an event. Best-effort: write failures are logged and ignored.
    pub fn record(&mut self, event: Event) {
        let full = FullEvent {
            seq: self.seq,
            ts: distill_core::now_rfc3339(),
            event,
        };
        self.seq += 1;

        let Some(path) = &self.jsonl_path else {
            return;
        };
        if let Ok(line) = serde_json::to_string(&full) {
            if let Err(e) = append_line(path, &line) {
                tracing::debug!(path = %path.display(), error = %e, "event log write failed");
            }
        }
    }
}

/// Append a single line to a file, creating parent dirs if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
