//! Batch scheduler: admission control, the controller tick, and cancellation.
//!
//! The [`Controller`] owns the task table outright. Workers run as isolated
//! processes behind the [`WorkerLauncher`] seam and only communicate through
//! per-task event channels; every state transition happens here, on the
//! controller's tick. Presentation layers read immutable snapshots.

pub mod launcher;

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{
    format_bytes, log_root, scratch_root, JobOptions, OcrMode, MAX_INPUT_FILE_BYTES,
    MAX_QUEUE_ITEMS, OUTPUT_DIR_NAME,
};
use crate::ipc::{JobConfig, JobReport, WorkerEvent};
use crate::metrics::ResourceProbe;
use crate::models::{new_task_id, TaskMetrics, TaskRecord, TaskStatus};
use crate::progress::{estimate_seconds, ProgressEstimator};

pub use launcher::{ProcessWorkerLauncher, SpawnError, WorkerHandle, WorkerLauncher};

/// Cadence of the controller tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Rolling controller log entries retained for display.
const ROLLING_LOG_CAP: usize = 20_000;

/// Output filename collision suffixes tried before giving up.
const MAX_OUTPUT_SUFFIX: u32 = 100_000;

/// Why a batch could not be started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartBatchError {
    #[error("some jobs are already running")]
    AlreadyRunning,
    #[error("no pending tasks to process")]
    NothingToDo,
}

/// Why the queue could not be cleared.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClearError {
    #[error("cancel active jobs before clearing the list")]
    JobsRunning,
}

/// Outcome of adding paths to the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    pub added: usize,
    /// Inputs over the byte cap, skipped with a log line each.
    pub skipped_large: usize,
    /// True when the queue cap cut the batch of additions short.
    pub queue_limit_hit: bool,
}

/// One line in the controller's rolling log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Task the line belongs to, if any.
    pub task_id: Option<String>,
    pub line: String,
}

/// Read-only view of one task for presentation layers.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub log_file: Option<PathBuf>,
    pub status: TaskStatus,
    pub progress: u8,
    pub result_note: String,
    pub metrics: TaskMetrics,
    pub report: Option<JobReport>,
}

/// Aggregate batch counters for presentation layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub queued: usize,
    pub running: usize,
    pub finished: usize,
    pub total: usize,
    /// Mean progress across the active generation, 0..=100.
    pub percent: u8,
    pub batch_running: bool,
}

/// Single-writer scheduler over the task table.
pub struct Controller {
    tasks: Vec<TaskRecord>,
    by_id: HashMap<String, usize>,
    by_input: HashMap<PathBuf, usize>,
    handles: HashMap<String, Box<dyn WorkerHandle>>,
    launcher: Arc<dyn WorkerLauncher>,
    probe: Box<dyn ResourceProbe>,
    options: JobOptions,
    generation: u64,
    batch_running: bool,
    total: usize,
    finished: usize,
    worker_limit: usize,
    batch_options: JobOptions,
    batch_log_dir: Option<PathBuf>,
    batch_percent: u8,
    log_root: PathBuf,
    max_input_bytes: u64,
    log: VecDeque<LogEntry>,
    outbox: Vec<LogEntry>,
}

impl Controller {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        probe: Box<dyn ResourceProbe>,
        options: JobOptions,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            by_id: HashMap::new(),
            by_input: HashMap::new(),
            handles: HashMap::new(),
            launcher,
            probe,
            batch_options: options.clone(),
            options,
            generation: 0,
            batch_running: false,
            total: 0,
            finished: 0,
            worker_limit: 1,
            batch_log_dir: None,
            batch_percent: 0,
            log_root: log_root(),
            max_input_bytes: MAX_INPUT_FILE_BYTES,
            log: VecDeque::new(),
            outbox: Vec::new(),
        }
    }

    /// Override the root directory batch log directories are created under.
    pub fn with_log_root(mut self, dir: PathBuf) -> Self {
        self.log_root = dir;
        self
    }

    /// Options applied to the next batch. Changing them never affects a
    /// generation that is already running.
    pub fn options_mut(&mut self) -> &mut JobOptions {
        &mut self.options
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Add discovered PDFs to the queue, deduplicating against entries
    /// already present and skipping oversized inputs.
    pub fn enqueue_paths(&mut self, paths: &[PathBuf]) -> EnqueueReport {
        let mut report = EnqueueReport::default();
        for path in paths {
            if self.tasks.len() >= MAX_QUEUE_ITEMS {
                report.queue_limit_hit = true;
                break;
            }
            if self.by_input.contains_key(path) {
                continue;
            }
            let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size > self.max_input_bytes {
                report.skipped_large += 1;
                self.append_log(
                    None,
                    format!(
                        "Skipped oversized PDF ({}): {}",
                        format_bytes(size),
                        path.display()
                    ),
                );
                continue;
            }

            let id = new_task_id();
            let output = planned_output_path(path);
            let scratch = scratch_root().join(&id);
            let task = TaskRecord::new(id.clone(), path.clone(), output, scratch);
            let idx = self.tasks.len();
            self.by_id.insert(id, idx);
            self.by_input.insert(path.clone(), idx);
            self.tasks.push(task);
            report.added += 1;
        }
        report
    }

    /// Drop every task. Refused while any worker is live.
    pub fn clear(&mut self) -> Result<usize, ClearError> {
        if self.tasks.iter().any(|t| t.status == TaskStatus::Running) {
            return Err(ClearError::JobsRunning);
        }
        let dropped = self.tasks.len();
        self.tasks.clear();
        self.by_id.clear();
        self.by_input.clear();
        self.handles.clear();
        self.total = 0;
        self.finished = 0;
        self.batch_running = false;
        self.batch_percent = 0;
        self.append_log(None, "Cleared queued tasks.".to_string());
        Ok(dropped)
    }

    /// Start a new run generation over every pending task.
    pub async fn start_batch(&mut self) -> Result<(), StartBatchError> {
        if self.tasks.iter().any(|t| t.status == TaskStatus::Running) {
            return Err(StartBatchError::AlreadyRunning);
        }
        let pending: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| self.tasks[i].status.is_pending_for_start())
            .collect();
        if pending.is_empty() {
            return Err(StartBatchError::NothingToDo);
        }

        self.generation += 1;
        self.total = pending.len();
        self.finished = 0;
        self.batch_running = true;
        self.batch_options = self.options.clone();
        self.worker_limit = self
            .batch_options
            .resolve_worker_limit()
            .min(pending.len() as u32)
            .max(1) as usize;

        let stamp = format!("{}_{}", batch_dir_stem(), &new_task_id()[..8]);
        let dir = self.log_root.join(stamp);
        if let Err(err) = fs::create_dir_all(&dir) {
            tracing::warn!("Cannot create batch log directory {}: {}", dir.display(), err);
        }
        self.batch_log_dir = Some(dir);

        let generation = self.generation;
        for idx in pending {
            self.tasks[idx].reset_for_batch(generation);
        }

        self.append_log(
            None,
            format!(
                "Starting batch: {} file(s), {} parallel workers, {} mode, {}, {}.",
                self.total,
                self.worker_limit,
                if self.batch_options.ocr_mode == OcrMode::Force {
                    "force OCR"
                } else {
                    "smart OCR"
                },
                if self.batch_options.use_gpu {
                    "GPU plugin enabled"
                } else {
                    "CPU mode"
                },
                if self.batch_options.optimize_for_size {
                    "size optimization enabled"
                } else {
                    "standard size profile"
                },
            ),
        );

        self.admit().await;
        self.refresh_batch_progress();
        Ok(())
    }

    /// One controller tick: progress, event drain, liveness sweep, admission,
    /// aggregate refresh. Never blocks on worker I/O.
    pub async fn tick(&mut self) {
        self.advance_progress();
        self.drain_events().await;
        self.sweep_dead().await;
        self.admit().await;
        self.refresh_batch_progress();
    }

    /// Cancel one task. Queued tasks are canceled in place; running ones are
    /// terminated (with kill escalation) and their artifacts cleaned up.
    /// Returns once the process, if any, is confirmed dead.
    pub async fn cancel(&mut self, task_id: &str) {
        let Some(&idx) = self.by_id.get(task_id) else {
            return;
        };
        match self.tasks[idx].status {
            TaskStatus::Queued => {
                let task = &mut self.tasks[idx];
                task.status = TaskStatus::Canceled;
                task.progress = 0;
                task.result_note = "Canceled before start".to_string();
                task.estimator = None;
                self.mark_batch_progress(idx);
            }
            TaskStatus::Running => {
                self.tasks[idx].status = TaskStatus::Canceling;
                let input = self.tasks[idx].input.clone();
                self.append_log(None, format!("Cancel requested for {}", input.display()));
                if let Some(mut handle) = self.handles.remove(task_id) {
                    handle.terminate().await;
                }
                self.cleanup_task_files(idx);
                let task = &mut self.tasks[idx];
                task.status = TaskStatus::Canceled;
                task.progress = 0;
                task.result_note = "Canceled by user".to_string();
                task.estimator = None;
                self.append_task_log_line(idx, "Task canceled by user.");
                self.mark_batch_progress(idx);
            }
            _ => {}
        }
    }

    /// Cancel every queued or running task.
    pub async fn cancel_all(&mut self) {
        let ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Running))
            .map(|t| t.id.clone())
            .collect();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Input paths of tasks that count as unfinished for persistence.
    pub fn pending_inputs(&self) -> Vec<PathBuf> {
        self.tasks
            .iter()
            .filter(|t| t.status.persists_as_queued())
            .map(|t| t.input.clone())
            .collect()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            queued: self.count(TaskStatus::Queued),
            running: self.count(TaskStatus::Running),
            finished: self.finished,
            total: self.total,
            percent: self.batch_percent,
            batch_running: self.batch_running,
        }
    }

    pub fn task_views(&self) -> Vec<TaskView> {
        self.tasks
            .iter()
            .map(|t| TaskView {
                id: t.id.clone(),
                input: t.input.clone(),
                output: t.output.clone(),
                log_file: t.log_file.clone(),
                status: t.status,
                progress: t.progress,
                result_note: t.result_note.clone(),
                metrics: t.metrics,
                report: t.report.clone(),
            })
            .collect()
    }

    pub fn is_batch_running(&self) -> bool {
        self.batch_running
    }

    pub fn any_failed(&self) -> bool {
        self.tasks.iter().any(|t| t.status == TaskStatus::Failed)
    }

    /// Drain log lines appended since the last call.
    pub fn take_log(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.outbox)
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    fn advance_progress(&mut self) {
        let now = Instant::now();
        let running: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| self.tasks[i].status == TaskStatus::Running)
            .collect();
        for idx in running {
            let pid = self
                .handles
                .get(&self.tasks[idx].id)
                .and_then(|h| h.pid());
            let sample = pid.and_then(|pid| self.probe.sample(pid));
            let task = &mut self.tasks[idx];
            if let Some(estimator) = task.estimator.as_mut() {
                task.progress = estimator.advance(task.progress, now);
            }
            if let Some(sample) = sample {
                task.metrics.record_sample(sample.cpu_percent, sample.rss_bytes);
            }
        }
    }

    async fn drain_events(&mut self) {
        let mut events: Vec<(String, WorkerEvent)> = Vec::new();
        for (id, handle) in self.handles.iter_mut() {
            while let Some(event) = handle.try_next_event() {
                events.push((id.clone(), event));
            }
        }
        for (id, event) in events {
            self.handle_event(&id, event).await;
        }
    }

    async fn handle_event(&mut self, task_id: &str, event: WorkerEvent) {
        let Some(&idx) = self.by_id.get(task_id) else {
            return;
        };
        match event {
            WorkerEvent::Log { message, .. } => {
                self.tasks[idx].metrics.absorb_log_line(&message);
                self.append_log(Some(task_id.to_string()), message);
            }
            WorkerEvent::Status { status, .. } => {
                self.tasks[idx].worker_hint = Some(status);
            }
            WorkerEvent::Done { report, .. } => {
                if report.success {
                    if !report.output_pdf.is_empty() {
                        self.tasks[idx].output = PathBuf::from(&report.output_pdf);
                    }
                    let note = report.output_pdf.clone();
                    self.finalize(idx, true, note, Some(report)).await;
                } else {
                    let error = if report.error.is_empty() {
                        "Unknown OCR error".to_string()
                    } else {
                        report.error.clone()
                    };
                    self.finalize(idx, false, error, Some(report)).await;
                }
            }
        }
    }

    async fn sweep_dead(&mut self) {
        let mut dead: Vec<usize> = Vec::new();
        for (pos, task) in self.tasks.iter().enumerate() {
            if task.status != TaskStatus::Running {
                continue;
            }
            match self.handles.get_mut(&task.id) {
                Some(handle) => {
                    if !handle.is_alive() {
                        dead.push(pos);
                    }
                }
                None => dead.push(pos),
            }
        }
        for idx in dead {
            self.finalize(
                idx,
                false,
                "Worker process exited unexpectedly.".to_string(),
                None,
            )
            .await;
        }
    }

    async fn admit(&mut self) {
        if !self.batch_running {
            return;
        }
        loop {
            let running = self.count(TaskStatus::Running);
            if running >= self.worker_limit {
                return;
            }
            let generation = self.generation;
            let Some(idx) = (0..self.tasks.len()).find(|&i| {
                self.tasks[i].status == TaskStatus::Queued && self.tasks[i].generation == generation
            }) else {
                return;
            };
            self.start_task(idx).await;
        }
    }

    /// Validate and spawn one queued task. Validation failures finalize the
    /// task as `Failed` without a worker ever existing.
    async fn start_task(&mut self, idx: usize) {
        let input = self.tasks[idx].input.clone();
        if !input.exists() {
            self.append_log(None, format!("Input file not found: {}", input.display()));
            self.finalize(idx, false, "Input file missing".to_string(), None)
                .await;
            return;
        }
        let input_size = fs::metadata(&input).map(|m| m.len()).unwrap_or(0);
        if input_size > self.max_input_bytes {
            self.append_log(
                None,
                format!(
                    "Input too large ({}): {}",
                    format_bytes(input_size),
                    input.display()
                ),
            );
            self.finalize(
                idx,
                false,
                format!("Input exceeds limit ({} max)", format_bytes(self.max_input_bytes)),
                None,
            )
            .await;
            return;
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let output = match next_output_path(&input.parent_or_cwd().join(OUTPUT_DIR_NAME), &stem) {
            Ok(output) => output,
            Err(err) => {
                self.append_log(
                    None,
                    format!(
                        "Failed to prepare output path for {}: {}",
                        input.display(),
                        err
                    ),
                );
                self.finalize(idx, false, format!("Output path setup failed: {}", err), None)
                    .await;
                return;
            }
        };

        let id = self.tasks[idx].id.clone();
        let log_dir = self
            .batch_log_dir
            .clone()
            .unwrap_or_else(|| self.log_root.clone());
        let log_file = log_dir.join(format!("{}_{}.log", safe_file_part(&stem), id));
        let scratch = scratch_root().join(&id);

        let config = JobConfig {
            task_id: id.clone(),
            input_pdf: input.clone(),
            output_pdf: output.clone(),
            log_file: log_file.clone(),
            temp_dir: scratch.clone(),
            force_ocr: self.batch_options.ocr_mode == OcrMode::Force,
            use_gpu: self.batch_options.use_gpu,
            optimize_for_size: self.batch_options.optimize_for_size,
        };

        match self.launcher.launch(&config, self.batch_options.priority).await {
            Ok(handle) => {
                let pid = handle.pid();
                self.handles.insert(id, handle);
                let task = &mut self.tasks[idx];
                task.output = output;
                task.log_file = Some(log_file);
                task.scratch_dir = scratch;
                task.status = TaskStatus::Running;
                task.progress = 1;
                task.result_note = "In progress...".to_string();
                task.estimator = Some(ProgressEstimator::new(
                    estimate_seconds(Some(input_size)),
                    Instant::now(),
                ));
                self.append_log(
                    None,
                    match pid {
                        Some(pid) => format!("Started {} (PID {})", input.display(), pid),
                        None => format!("Started {}", input.display()),
                    },
                );
            }
            Err(err) => {
                self.append_log(
                    None,
                    format!("Failed to start worker for {}: {}", input.display(), err),
                );
                self.finalize(idx, false, format!("Worker spawn failed: {}", err), None)
                    .await;
            }
        }
    }

    /// Apply the single terminal transition for a task. Later calls for the
    /// same task are no-ops.
    async fn finalize(
        &mut self,
        idx: usize,
        success: bool,
        result_note: String,
        report: Option<JobReport>,
    ) {
        if self.tasks[idx].status.is_terminal() {
            return;
        }
        let fallback = report.as_ref().map(|r| r.used_fallback).unwrap_or(false);
        {
            let task = &mut self.tasks[idx];
            task.report = report;
            task.status = if success {
                let skipped = task.metrics.hocr_pages == 0 && task.metrics.skip_page_hits > 0;
                if skipped {
                    TaskStatus::Skipped { fallback }
                } else {
                    TaskStatus::Done { fallback }
                }
            } else {
                TaskStatus::Failed
            };
            task.progress = if success { 100 } else { 0 };
            task.result_note = result_note;
            task.estimator = None;
        }
        let id = self.tasks[idx].id.clone();
        if let Some(mut handle) = self.handles.remove(&id) {
            handle.release().await;
        }
        self.append_summary_to_task_log(idx);
        self.mark_batch_progress(idx);
    }

    fn mark_batch_progress(&mut self, idx: usize) {
        let task = &mut self.tasks[idx];
        if task.generation == self.generation && !task.counted {
            task.counted = true;
            self.finished += 1;
        }
        self.refresh_batch_progress();
        if self.batch_running && self.finished >= self.total {
            self.batch_running = false;
            self.append_log(None, "Batch completed.".to_string());
        }
    }

    fn refresh_batch_progress(&mut self) {
        let generation = self.generation;
        let mut sum: u64 = 0;
        let mut count: u64 = 0;
        for task in &self.tasks {
            if task.generation != generation {
                continue;
            }
            count += 1;
            sum += if task.status.is_terminal() {
                100
            } else {
                task.progress as u64
            };
        }
        self.batch_percent = if count == 0 { 0 } else { (sum / count) as u8 };
    }

    /// Remove a canceled task's scratch directory and partial output.
    fn cleanup_task_files(&mut self, idx: usize) {
        let task = &self.tasks[idx];
        if crate::worker::paths::scratch_dir_is_safe_for_cleanup(&task.scratch_dir) {
            let _ = fs::remove_dir_all(&task.scratch_dir);
        }
        let output_root = task.input.parent_or_cwd().join(OUTPUT_DIR_NAME);
        let output = task.output.clone();
        let is_pdf = output
            .extension()
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf && is_path_within(&output_root, &output) {
            let is_symlink = fs::symlink_metadata(&output)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(true);
            if !is_symlink && output.exists() {
                let _ = fs::remove_file(&output);
            }
        }
    }

    /// Best-effort controller-side summary appended to the task's log file.
    fn append_summary_to_task_log(&self, idx: usize) {
        let task = &self.tasks[idx];
        let Some(log_file) = task.log_file.as_ref() else {
            return;
        };
        let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(log_file) else {
            return;
        };
        let _ = writeln!(file, "Controller-observed metrics for task {}:", task.id);
        let _ = writeln!(
            file,
            "  Peak CPU: {:.1}% | Peak RSS: {} bytes",
            task.metrics.peak_cpu_percent, task.metrics.peak_rss_bytes
        );
        let _ = writeln!(
            file,
            "  Skip-page hits: {} | hOCR pages: {}",
            task.metrics.skip_page_hits, task.metrics.hocr_pages
        );
    }

    fn append_task_log_line(&self, idx: usize, line: &str) {
        let task = &self.tasks[idx];
        if let Some(log_file) = task.log_file.as_ref() {
            if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(log_file) {
                let _ = writeln!(file, "{}", line);
            }
        }
    }

    fn append_log(&mut self, task_id: Option<String>, line: String) {
        let entry = LogEntry { task_id, line };
        if self.log.len() == ROLLING_LOG_CAP {
            self.log.pop_front();
        }
        self.log.push_back(entry.clone());
        self.outbox.push(entry);
    }
}

/// Planned output location shown before a batch allocates the real one.
fn planned_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    input
        .parent_or_cwd()
        .join(OUTPUT_DIR_NAME)
        .join(format!("{}.pdf", stem))
}

/// Allocate a collision-free output path inside the output directory,
/// refusing symlinked directories outright.
fn next_output_path(target_dir: &Path, stem: &str) -> std::io::Result<PathBuf> {
    let dir_is_symlink = fs::symlink_metadata(target_dir)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if dir_is_symlink {
        return Err(symlink_dir_error(target_dir));
    }
    fs::create_dir_all(target_dir)?;
    if fs::symlink_metadata(target_dir)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        return Err(symlink_dir_error(target_dir));
    }

    let free = |candidate: &Path| fs::symlink_metadata(candidate).is_err();
    let candidate = target_dir.join(format!("{}.pdf", stem));
    if free(&candidate) {
        return Ok(candidate);
    }
    for idx in 2..=MAX_OUTPUT_SUFFIX {
        let alt = target_dir.join(format!("{}_{}.pdf", stem, idx));
        if free(&alt) {
            return Ok(alt);
        }
    }
    Err(std::io::Error::other(
        "could not allocate safe output filename",
    ))
}

fn symlink_dir_error(dir: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        format!("refusing symlink output directory: {}", dir.display()),
    )
}

fn is_path_within(base: &Path, path: &Path) -> bool {
    let (Ok(base), Ok(path)) = (fs::canonicalize(base), parent_canonical(path)) else {
        return false;
    };
    path.starts_with(&base)
}

/// Canonicalize a file path that may not exist yet via its parent.
fn parent_canonical(path: &Path) -> std::io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(_) => {
            let parent = path
                .parent()
                .ok_or_else(|| std::io::Error::other("no parent"))?;
            let name = path
                .file_name()
                .ok_or_else(|| std::io::Error::other("no file name"))?;
            Ok(fs::canonicalize(parent)?.join(name))
        }
    }
}

fn batch_dir_stem() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "batch".to_string())
}

/// Strip path separators and other risky characters from a filename part.
fn safe_file_part(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

trait ParentOrCwd {
    fn parent_or_cwd(&self) -> PathBuf;
}

impl ParentOrCwd for Path {
    fn parent_or_cwd(&self) -> PathBuf {
        match self.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        }
    }
}
