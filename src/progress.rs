//! Ingest and embedding progress reporting.
//!
//! Reports observable progress during `mdrag update` and `mdrag compute`
//! so users see which files are being processed and how the embedding
//! pool is advancing. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A source file was chunked and upserted.
    FileProcessed { path: String, chunks: usize },
    /// A source file was unchanged and skipped.
    FileSkipped { path: String },
    /// The embedding pool handled one more chunk (success or skip);
    /// the total is indefinite.
    EmbeddingTick { done: u64 },
}

/// Reports pipeline progress. Implementations write to stderr
/// (human-readable or JSON lines).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::FileProcessed { path, chunks } => {
                format!("update {path}  {chunks} chunks\n")
            }
            ProgressEvent::FileSkipped { path } => format!("update {path}  unchanged\n"),
            ProgressEvent::EmbeddingTick { done } => {
                format!("embed  {} chunks handled\r", format_number(*done))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::FileProcessed { path, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "update",
                "path": path,
                "chunks": chunks
            }),
            ProgressEvent::FileSkipped { path } => serde_json::json!({
                "event": "progress",
                "phase": "update",
                "path": path,
                "skipped": true
            }),
            ProgressEvent::EmbeddingTick { done } => serde_json::json!({
                "event": "progress",
                "phase": "embed",
                "done": done
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Builds a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
