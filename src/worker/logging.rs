//! Worker-side event stream and per-job log files.
//!
//! Events leave the worker as single JSON lines on stdout. Log records are
//! duplicated: one formatted line into the job's log file, and the same
//! line wrapped in a log event for the controller.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Local;

use crate::ipc::WorkerEvent;

/// Destination for worker events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &WorkerEvent);
}

/// Serializes events onto stdout, one JSON object per line.
pub struct StdoutEventSink {
    out: Mutex<io::Stdout>,
}

impl StdoutEventSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }
}

impl Default for StdoutEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for StdoutEventSink {
    /// Write one event line. Errors are swallowed; a vanished controller
    /// must not crash the job mid-flight.
    fn emit(&self, event: &WorkerEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(_) => return,
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}

/// Writes job log records in the historical file format:
/// `HH:MM:SS | LEVEL | thread | message`.
pub struct JobLogger {
    file: Mutex<File>,
    sink: Arc<dyn EventSink>,
    task_id: String,
}

impl JobLogger {
    /// Open (or create) the log file and bind the event relay.
    pub fn new(log_file: &Path, sink: Arc<dyn EventSink>, task_id: &str) -> io::Result<Self> {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(log_file)?;
        Ok(Self {
            file: Mutex::new(file),
            sink,
            task_id: task_id.to_string(),
        })
    }

    pub fn info(&self, message: &str) {
        self.log("INFO", message);
    }

    pub fn warning(&self, message: &str) {
        self.log("WARNING", message);
    }

    pub fn error(&self, message: &str) {
        self.log("ERROR", message);
    }

    /// Relay one line of OCR tool output verbatim.
    pub fn tool_line(&self, line: &str) {
        self.log("INFO", line);
    }

    fn log(&self, level: &str, message: &str) {
        let thread = std::thread::current();
        let line = format!(
            "{} | {} | {} | {}",
            Local::now().format("%H:%M:%S"),
            level,
            thread.name().unwrap_or("worker"),
            message
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }
        self.sink.emit(&WorkerEvent::Log {
            task_id: self.task_id.clone(),
            message: line,
        });
    }
}
