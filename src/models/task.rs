//! Task records for batch OCR processing.
//!
//! Each queued PDF becomes a task with a stable identifier, preallocated
//! output and scratch locations, and counters fed by worker log events.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::ipc::JobReport;
use crate::progress::ProgressEstimator;

/// Lifecycle state of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    /// Termination requested but the worker has not exited yet.
    Canceling,
    Canceled,
    Done { fallback: bool },
    Skipped { fallback: bool },
    Failed,
}

impl TaskStatus {
    /// Human-readable status label.
    pub fn label(&self) -> String {
        match self {
            Self::Queued => "Queued".to_string(),
            Self::Running => "Running".to_string(),
            Self::Canceling => "Canceling...".to_string(),
            Self::Canceled => "Canceled".to_string(),
            Self::Done { fallback: false } => "Done".to_string(),
            Self::Done { fallback: true } => "Done (tmp fallback)".to_string(),
            Self::Skipped { fallback: false } => "Skipped (Already Searchable)".to_string(),
            Self::Skipped { fallback: true } => {
                "Skipped (Already Searchable) (tmp fallback)".to_string()
            }
            Self::Failed => "Failed".to_string(),
        }
    }

    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Done { .. } | Self::Skipped { .. } | Self::Failed
        )
    }

    /// Whether a new batch would pick this task up again.
    pub fn is_pending_for_start(&self) -> bool {
        matches!(self, Self::Queued | Self::Failed | Self::Canceled)
    }

    /// Whether the task counts as unfinished for queue-state persistence.
    pub fn persists_as_queued(&self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::Canceling)
    }

    /// Whether the task finished without an error.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Skipped { .. })
    }
}

/// Counters extracted from worker log output while a task runs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaskMetrics {
    /// Pages the OCR tool reported skipping because text already exists.
    pub skip_page_hits: u32,
    /// Page count parsed from the tool's hOCR parsing banner.
    pub hocr_pages: u32,
    /// Highest CPU percentage observed for the worker process.
    pub peak_cpu_percent: f32,
    /// Highest resident set size observed for the worker process.
    pub peak_rss_bytes: u64,
}

fn hocr_pages_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Parsing\s+(\d+)\s+pages?\s+with HocrParser").unwrap()
    })
}

impl TaskMetrics {
    /// Update counters from a single relayed log line.
    pub fn absorb_log_line(&mut self, message: &str) {
        let lowered = message.to_lowercase();
        if lowered.contains("skipping all processing on this page") {
            self.skip_page_hits += 1;
        }
        if lowered.contains("parsing") && lowered.contains("with hocrparser") {
            if let Some(captures) = hocr_pages_pattern().captures(message) {
                if let Some(pages) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                    self.hocr_pages = pages;
                }
            }
        }
    }

    /// Record a resource sample, keeping running maxima.
    pub fn record_sample(&mut self, cpu_percent: f32, rss_bytes: u64) {
        if cpu_percent > self.peak_cpu_percent {
            self.peak_cpu_percent = cpu_percent;
        }
        if rss_bytes > self.peak_rss_bytes {
            self.peak_rss_bytes = rss_bytes;
        }
    }
}

/// A single queued PDF and everything known about its processing.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Short hex identifier, stable for the task's lifetime.
    pub id: String,
    /// Source PDF path.
    pub input: PathBuf,
    /// Planned output path inside the sibling output directory.
    pub output: PathBuf,
    /// Private scratch directory for the worker.
    pub scratch_dir: PathBuf,
    /// Per-task log file, assigned when a batch admits the task.
    pub log_file: Option<PathBuf>,
    pub status: TaskStatus,
    /// Batch generation the task last ran under. Events carrying a stale
    /// generation are ignored.
    pub generation: u64,
    /// Displayed progress percentage, 0..=100.
    pub progress: u8,
    /// Whether this task has been tallied into the batch completion count.
    pub counted: bool,
    /// Last free-form status text reported by the worker. Display only.
    pub worker_hint: Option<String>,
    /// Result column text: an error message or the produced output path.
    pub result_note: String,
    pub metrics: TaskMetrics,
    /// Final report from the worker, if one arrived.
    pub report: Option<JobReport>,
    /// Wall-clock progress estimator, live while the task runs.
    pub estimator: Option<ProgressEstimator>,
}

/// Generate a short task identifier: the first 12 hex digits of a UUIDv4.
pub fn new_task_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

impl TaskRecord {
    pub fn new(id: String, input: PathBuf, output: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            id,
            input,
            output,
            scratch_dir,
            log_file: None,
            status: TaskStatus::Queued,
            generation: 0,
            progress: 0,
            counted: false,
            worker_hint: None,
            result_note: String::new(),
            metrics: TaskMetrics::default(),
            report: None,
            estimator: None,
        }
    }

    /// Reset run state so the task can be admitted into a new batch.
    pub fn reset_for_batch(&mut self, generation: u64) {
        self.status = TaskStatus::Queued;
        self.generation = generation;
        self.progress = 0;
        self.counted = false;
        self.worker_hint = None;
        self.result_note = String::new();
        self.metrics = TaskMetrics::default();
        self.report = None;
        self.estimator = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_shape() {
        let id = new_task_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_task_id());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(TaskStatus::Canceling.label(), "Canceling...");
        assert_eq!(TaskStatus::Done { fallback: false }.label(), "Done");
        assert_eq!(
            TaskStatus::Done { fallback: true }.label(),
            "Done (tmp fallback)"
        );
        assert_eq!(
            TaskStatus::Skipped { fallback: false }.label(),
            "Skipped (Already Searchable)"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Done { fallback: true }.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Canceling.is_terminal());

        assert!(TaskStatus::Failed.is_pending_for_start());
        assert!(TaskStatus::Canceled.is_pending_for_start());
        assert!(!TaskStatus::Running.is_pending_for_start());
        assert!(!TaskStatus::Done { fallback: false }.is_pending_for_start());

        assert!(TaskStatus::Canceling.persists_as_queued());
        assert!(!TaskStatus::Failed.persists_as_queued());
    }

    #[test]
    fn test_metrics_extraction() {
        let mut metrics = TaskMetrics::default();
        metrics.absorb_log_line("INFO - Skipping all processing on this page");
        metrics.absorb_log_line("some other line");
        metrics.absorb_log_line("skipping ALL processing on this PAGE too");
        assert_eq!(metrics.skip_page_hits, 2);

        metrics.absorb_log_line("Parsing 17 pages with HocrParser");
        assert_eq!(metrics.hocr_pages, 17);
        metrics.absorb_log_line("Parsing 1 page with HocrParser");
        assert_eq!(metrics.hocr_pages, 1);
    }

    #[test]
    fn test_metrics_hocr_requires_exact_case() {
        // The page count is only read when the original casing matches the
        // tool's banner, mirroring how the pattern is anchored.
        let mut metrics = TaskMetrics::default();
        metrics.absorb_log_line("parsing 9 pages with hocrparser");
        assert_eq!(metrics.hocr_pages, 0);
    }

    #[test]
    fn test_record_sample_keeps_peaks() {
        let mut metrics = TaskMetrics::default();
        metrics.record_sample(12.5, 1000);
        metrics.record_sample(8.0, 4000);
        metrics.record_sample(20.0, 2000);
        assert_eq!(metrics.peak_cpu_percent, 20.0);
        assert_eq!(metrics.peak_rss_bytes, 4000);
    }

    #[test]
    fn test_reset_for_batch() {
        let mut task = TaskRecord::new(
            "abc123def456".to_string(),
            PathBuf::from("/data/in.pdf"),
            PathBuf::from("/data/OCR_Output/in.pdf"),
            PathBuf::from("/tmp/ocrbatch_jobs/abc123def456"),
        );
        task.status = TaskStatus::Failed;
        task.progress = 40;
        task.counted = true;
        task.result_note = "boom".to_string();
        task.metrics.skip_page_hits = 3;

        task.reset_for_batch(7);

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.generation, 7);
        assert_eq!(task.progress, 0);
        assert!(!task.counted);
        assert!(task.result_note.is_empty());
        assert_eq!(task.metrics, TaskMetrics::default());
    }
}
