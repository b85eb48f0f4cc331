//! Wire types exchanged with worker processes.
//!
//! The controller writes one [`JobConfig`] JSON line to a worker's stdin.
//! The worker answers with newline-delimited JSON events on stdout: any
//! number of `log` and `status` events followed by exactly one `done` event.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything a worker needs to process one PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub task_id: String,
    pub input_pdf: PathBuf,
    pub output_pdf: PathBuf,
    pub log_file: PathBuf,
    pub temp_dir: PathBuf,
    pub force_ocr: bool,
    pub use_gpu: bool,
    pub optimize_for_size: bool,
}

/// Final report emitted by a worker inside its `done` event.
///
/// All fields are present even on failure; sizes and deltas default to zero
/// when the underlying measurement never happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(default)]
    pub success: bool,
    /// Error description, empty when the job succeeded.
    #[serde(default)]
    pub error: String,
    /// Produced output path, empty when the job never got that far.
    #[serde(default)]
    pub output_pdf: String,
    /// Whether the scratch-directory fallback rerouted the job.
    #[serde(default)]
    pub used_fallback: bool,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub input_size: u64,
    #[serde(default)]
    pub output_size: u64,
    /// Output size divided by input size, zero when the input size is unknown.
    #[serde(default)]
    pub size_ratio: f64,
    #[serde(default)]
    pub rss_start: u64,
    #[serde(default)]
    pub rss_end: u64,
    #[serde(default)]
    pub cpu_user_delta: f64,
    #[serde(default)]
    pub cpu_system_delta: f64,
    /// ISO-8601 start timestamp with second precision.
    #[serde(default)]
    pub start_stamp: String,
    /// ISO-8601 end timestamp with second precision.
    #[serde(default)]
    pub end_stamp: String,
}

/// One event on the worker's stdout stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A log line to relay into the task's rolling log.
    Log { task_id: String, message: String },
    /// Free-form worker state hint. Display only; the controller's own
    /// lifecycle tracking is authoritative.
    Status { task_id: String, status: String },
    /// Terminal report. The worker exits shortly after sending this.
    Done {
        task_id: String,
        #[serde(flatten)]
        report: JobReport,
    },
}

impl WorkerEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Log { task_id, .. } => task_id,
            Self::Status { task_id, .. } => task_id,
            Self::Done { task_id, .. } => task_id,
        }
    }
}
