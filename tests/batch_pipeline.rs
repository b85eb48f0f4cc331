//! End-to-end batch flow over the public API with a scripted launcher.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ocrbatch::config::{JobOptions, ParallelMode};
use ocrbatch::ipc::{JobConfig, JobReport, WorkerEvent};
use ocrbatch::metrics::NullProbe;
use ocrbatch::models::TaskStatus;
use ocrbatch::scheduler::{Controller, SpawnError, WorkerHandle, WorkerLauncher};
use ocrbatch::state::StateStore;

/// Worker that reports success on the first event poll.
struct InstantWorker {
    event: Option<WorkerEvent>,
    alive: bool,
}

#[async_trait]
impl WorkerHandle for InstantWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn try_next_event(&mut self) -> Option<WorkerEvent> {
        let event = self.event.take();
        if event.is_some() {
            self.alive = false;
        }
        event
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn terminate(&mut self) {
        self.alive = false;
    }

    async fn release(&mut self) {
        self.alive = false;
    }
}

#[derive(Default)]
struct InstantLauncher {
    launched: Mutex<Vec<JobConfig>>,
}

#[async_trait]
impl WorkerLauncher for InstantLauncher {
    async fn launch(
        &self,
        config: &JobConfig,
        _priority: ocrbatch::config::PriorityMode,
    ) -> Result<Box<dyn WorkerHandle>, SpawnError> {
        self.launched.lock().expect("launched").push(config.clone());
        let report = JobReport {
            success: true,
            output_pdf: config.output_pdf.to_string_lossy().into_owned(),
            duration_seconds: 0.5,
            ..JobReport::default()
        };
        Ok(Box::new(InstantWorker {
            event: Some(WorkerEvent::Done {
                task_id: config.task_id.clone(),
                report,
            }),
            alive: true,
        }))
    }
}

fn write_pdfs(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("page{:02}.pdf", i));
            fs::write(&path, b"%PDF-1.4 fixture").expect("write pdf");
            fs::canonicalize(&path).expect("canonicalize")
        })
        .collect()
}

#[tokio::test]
async fn batch_runs_every_task_to_done() {
    let dir = tempfile::tempdir().expect("tempdir");
    let launcher = Arc::new(InstantLauncher::default());

    let mut options = JobOptions::default();
    options.parallel = ParallelMode::Fixed(2);
    let mut controller = Controller::new(launcher.clone(), Box::new(NullProbe), options)
        .with_log_root(dir.path().join("logs"));

    let inputs = write_pdfs(dir.path(), 3);
    let report = controller.enqueue_paths(&inputs);
    assert_eq!(report.added, 3);

    controller.start_batch().await.expect("start batch");
    for _ in 0..50 {
        controller.tick().await;
        if !controller.is_batch_running() {
            break;
        }
    }

    assert!(!controller.is_batch_running());
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.finished, 3);
    assert_eq!(snapshot.percent, 100);
    assert!(!controller.any_failed());

    let views = controller.task_views();
    assert_eq!(views.len(), 3);
    for view in &views {
        assert_eq!(view.status, TaskStatus::Done { fallback: false });
        assert_eq!(view.progress, 100);
        // The allocated output lives in the sibling output directory.
        assert!(view.output.parent().expect("parent").ends_with("OCR_Output"));
    }
    assert_eq!(launcher.launched.lock().expect("launched").len(), 3);
}

#[tokio::test]
async fn unfinished_queue_survives_a_save_and_restore() {
    let dir = tempfile::tempdir().expect("tempdir");
    let launcher = Arc::new(InstantLauncher::default());
    let mut controller = Controller::new(
        launcher.clone(),
        Box::new(NullProbe),
        JobOptions::default(),
    )
    .with_log_root(dir.path().join("logs"));

    let inputs = write_pdfs(dir.path(), 2);
    controller.enqueue_paths(&inputs);

    let store = StateStore::new(dir.path().join("queue_state.json"));
    store
        .save(&controller.pending_inputs(), controller.options())
        .expect("save");

    let candidate = store.load().expect("load").expect("candidate");
    assert_eq!(candidate.paths, inputs);

    // Finish the batch; an empty pending set removes the state file.
    controller.start_batch().await.expect("start batch");
    for _ in 0..50 {
        controller.tick().await;
        if !controller.is_batch_running() {
            break;
        }
    }
    store
        .save(&controller.pending_inputs(), controller.options())
        .expect("save empty");
    assert!(!store.path().exists());
}
