//! Clone and ingest progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Cloning repository `n` of `total`.
    Cloning { repo: String, n: u64, total: u64 },
    /// Walking the source tree for a collection. Total unknown.
    Discovering { collection: String },
    /// `n` of `total` entries embedded and stored.
    Embedding {
        collection: String,
        n: u64,
        total: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest motoko_docs  embedding  1,234 / 5,000 entries".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Cloning { repo, n, total } => {
                format!("clone {}  ({} / {})\n", repo, format_number(*n), format_number(*total))
            }
            ProgressEvent::Discovering { collection } => {
                format!("ingest {}  discovering...\n", collection)
            }
            ProgressEvent::Embedding {
                collection,
                n,
                total,
            } => format!(
                "ingest {}  embedding  {} / {} entries\n",
                collection,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Cloning { repo, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "cloning",
                "repo": repo,
                "n": n,
                "total": total
            }),
            ProgressEvent::Discovering { collection } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "collection": collection
            }),
            ProgressEvent::Embedding {
                collection,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "collection": collection,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
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
