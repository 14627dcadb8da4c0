//! Sequence-stamped dual-sink event log.
//!
//! Every call to [`EventLogger::record`] takes one lock that covers the sequence
//! increment, the plain-text write and the markup write, so both files list the
//! same lines in the same global order no matter how many workers are logging.
//!
//! Plain line format: `SSSS|EEE.EEEs|WW|message`
//! - `SSSS` sequence number, zero-padded to 4 digits, starting at 1
//! - `EEE.EEE` seconds since the logger was created
//! - `WW` worker id right-aligned in 2 columns, or `--` for coordinator events

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::errors::HarnessError;

/// Number of per-worker color classes in the markup header.
/// Worker ids beyond this wrap around the palette.
pub const PALETTE_SIZE: u32 = 6;

const MARKUP_HEADER: &str = r#"<!DOCTYPE html><html lang="en"><head><meta charset="utf-8">
<style>
 body{background:#dbdbdb;font-family:monospace;font-size:16px}
 pre{white-space:pre-wrap}
 .worker-1{color:#e74c3c}.worker-2{color:#27ae60}.worker-3{color:#e69138}
 .worker-4{color:#3498db}.worker-5{color:#9b59b6}.worker-6{color:#1abc9c}
 .error{color:#7f8c8d}.none{color:#000}
</style></head><body><pre>
"#;

const MARKUP_FOOTER: &str = "</pre></body></html>\n";

/// Closed set of event tags.
///
/// `Run*` events come from the coordinator, `Step*` events describe individual
/// steps (worker progress, per-task bookkeeping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    RunStart,
    RunDone,
    RunFinish,
    RunError,
    StepTodo,
    StepDone,
    StepStart,
    StepFinish,
    StepError,
}

impl EventCategory {
    pub fn label(&self) -> &'static str {
        match self {
            EventCategory::RunStart => "run-start",
            EventCategory::RunDone => "run-done",
            EventCategory::RunFinish => "run-finish",
            EventCategory::RunError => "run-error",
            EventCategory::StepTodo => "step-todo",
            EventCategory::StepDone => "step-done",
            EventCategory::StepStart => "step-start",
            EventCategory::StepFinish => "step-finish",
            EventCategory::StepError => "step-error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EventCategory::RunError | EventCategory::StepError)
    }

    pub fn all() -> Vec<EventCategory> {
        vec![
            EventCategory::RunStart,
            EventCategory::RunDone,
            EventCategory::RunFinish,
            EventCategory::RunError,
            EventCategory::StepTodo,
            EventCategory::StepDone,
            EventCategory::StepStart,
            EventCategory::StepFinish,
            EventCategory::StepError,
        ]
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded event. Totally ordered by `sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub sequence: u64,
    pub elapsed: Duration,
    pub worker_id: Option<u32>,
    pub category: EventCategory,
    pub message: String,
}

impl LogEvent {
    pub fn plain_line(&self) -> String {
        format_line(self.sequence, self.elapsed, self.worker_id, &self.message)
    }

    pub fn markup_line(&self) -> String {
        format!(
            "<span class=\"{}\">{}</span>",
            markup_class(self.category, self.worker_id),
            html_escape::encode_text(&self.plain_line())
        )
    }
}

/// Formats the plain-text form of an event.
pub fn format_line(
    sequence: u64,
    elapsed: Duration,
    worker_id: Option<u32>,
    message: &str,
) -> String {
    let wid = match worker_id {
        Some(id) => format!("{:>2}", id),
        None => "--".to_string(),
    };
    format!(
        "{:04}|{:7.3}s|{}|{}",
        sequence,
        elapsed.as_secs_f64(),
        wid,
        message
    )
}

/// Picks the markup class: errors first, then the worker's palette slot, else `none`.
pub fn markup_class(category: EventCategory, worker_id: Option<u32>) -> String {
    if category.is_error() {
        "error".to_string()
    } else if let Some(id) = worker_id {
        format!("worker-{}", id.saturating_sub(1) % PALETTE_SIZE + 1)
    } else {
        "none".to_string()
    }
}

struct Sinks {
    sequence: u64,
    plain: LineWriter<File>,
    markup: LineWriter<File>,
    counts: HashMap<EventCategory, u64>,
    finished: bool,
}

/// Append-only event log writing a plain-text file and an HTML file.
pub struct EventLogger {
    started: Instant,
    plain_path: PathBuf,
    markup_path: PathBuf,
    sinks: Mutex<Sinks>,
}

impl EventLogger {
    /// Truncates (or creates) both files, writes the markup header and resets
    /// the sequence counter and start instant.
    pub fn create(
        plain_path: impl Into<PathBuf>,
        markup_path: impl Into<PathBuf>,
    ) -> Result<Self, HarnessError> {
        let plain_path = plain_path.into();
        let markup_path = markup_path.into();

        let plain = open_sink(&plain_path)?;
        let mut markup = open_sink(&markup_path)?;
        markup
            .write_all(MARKUP_HEADER.as_bytes())
            .and_then(|_| markup.flush())
            .map_err(|source| HarnessError::LogSink {
                path: markup_path.clone(),
                source,
            })?;

        Ok(Self {
            started: Instant::now(),
            plain_path,
            markup_path,
            sinks: Mutex::new(Sinks {
                sequence: 0,
                plain,
                markup,
                counts: HashMap::new(),
                finished: false,
            }),
        })
    }

    /// Records one event in both sinks.
    ///
    /// Sink write failures are reported through `tracing` and never propagate.
    /// Events recorded after [`finish`](Self::finish) are not written, do not
    /// consume a sequence number and yield `None`.
    pub fn record(
        &self,
        category: EventCategory,
        message: impl Into<String>,
        worker_id: Option<u32>,
    ) -> Option<LogEvent> {
        let message = message.into();
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);

        if sinks.finished {
            warn!(
                category = %category,
                message = %message,
                "Event recorded after the log was finalized; dropping it"
            );
            return None;
        }

        let event = LogEvent {
            sequence: sinks.sequence + 1,
            elapsed: self.started.elapsed(),
            worker_id,
            category,
            message,
        };

        sinks.sequence = event.sequence;
        *sinks.counts.entry(category).or_insert(0) += 1;

        if let Err(e) = writeln!(sinks.plain, "{}", event.plain_line()) {
            error!(path = ?self.plain_path, error = %e, "Failed to write event log line");
        }
        if let Err(e) = writeln!(sinks.markup, "{}", event.markup_line()) {
            error!(path = ?self.markup_path, error = %e, "Failed to write markup log line");
        }

        debug!(
            sequence = event.sequence,
            category = %category,
            worker_id = ?worker_id,
            "{}",
            event.message
        );

        Some(event)
    }

    /// Appends the markup footer and flushes both sinks. Idempotent.
    pub fn finish(&self) -> Result<(), HarnessError> {
        let mut sinks = self.sinks.lock().unwrap_or_else(PoisonError::into_inner);
        if sinks.finished {
            return Ok(());
        }
        sinks.finished = true;

        sinks
            .markup
            .write_all(MARKUP_FOOTER.as_bytes())
            .and_then(|_| sinks.markup.flush())
            .map_err(|source| HarnessError::LogSink {
                path: self.markup_path.clone(),
                source,
            })?;
        sinks.plain.flush().map_err(|source| HarnessError::LogSink {
            path: self.plain_path.clone(),
            source,
        })
    }

    /// Number of events recorded so far (the last sequence number handed out).
    pub fn event_count(&self) -> u64 {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sequence
    }

    pub fn category_count(&self, category: EventCategory) -> u64 {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts
            .get(&category)
            .copied()
            .unwrap_or(0)
    }

    pub fn plain_path(&self) -> &Path {
        &self.plain_path
    }

    pub fn markup_path(&self) -> &Path {
        &self.markup_path
    }
}

fn open_sink(path: &Path) -> Result<LineWriter<File>, HarnessError> {
    let to_err = |source| HarnessError::LogSink {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_err)?;
    }
    File::create(path).map(LineWriter::new).map_err(to_err)
}
