//! Index run progress reporting.
//!
//! Reports what an index run is doing, phase by phase, so users see how
//! much of the delta is left. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts. It is independent of `tracing` logging.

use std::io::{IsTerminal, Write};

use serde::Serialize;

/// A single progress event of an index run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum IndexProgressEvent {
    /// Walking the notes directory.
    Scanning { dir: String },
    /// Change detection finished.
    Classified {
        new: u64,
        modified: u64,
        unchanged: u64,
        deleted: u64,
    },
    /// `n` of `total` delta chunks embedded.
    Embedding { n: u64, total: u64 },
    /// `n` of `total` notes reconciled with the store.
    Reconciling { n: u64, total: u64 },
    Done,
}

/// Reports index progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Scanning { dir } => format!("index  scanning {}...\n", dir),
            IndexProgressEvent::Classified {
                new,
                modified,
                unchanged,
                deleted,
            } => format!(
                "index  {} new, {} modified, {} unchanged, {} deleted\n",
                format_number(*new),
                format_number(*modified),
                format_number(*unchanged),
                format_number(*deleted)
            ),
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Reconciling { n, total } => format!(
                "index  reconciling  {} / {} notes\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Done => "index  done\n".to_string(),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
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
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
