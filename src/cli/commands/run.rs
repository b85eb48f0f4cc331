//! The `run` command: discover, queue, and OCR PDFs to completion.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::helpers::{self, display_path, format_duration};
use crate::config::{format_bytes, OcrMode, ParallelMode, PathDisplayMode, PriorityMode};
use crate::discovery;
use crate::metrics::SysinfoProbe;
use crate::scheduler::{Controller, ProcessWorkerLauncher, TaskView, TICK_INTERVAL};
use crate::state::StateStore;

/// How often the unfinished queue is persisted while a batch runs.
const STATE_SAVE_INTERVAL: Duration = Duration::from_secs(8);

#[allow(clippy::too_many_arguments)]
pub async fn cmd_run(
    paths: &[PathBuf],
    recursive: bool,
    force_ocr: bool,
    gpu: bool,
    optimize_size: bool,
    workers: Option<&str>,
    priority: Option<PriorityMode>,
    path_display: Option<PathDisplayMode>,
    no_resume: bool,
    yes: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let store = StateStore::default_location();
    let mut options = crate::config::JobOptions::default();
    let mut restored: Vec<PathBuf> = Vec::new();

    if no_resume {
        store.discard();
    } else {
        match store.load() {
            Ok(Some(candidate)) => {
                let accept = yes || prompt_restore(candidate.paths.len())?;
                if accept {
                    options = candidate.options;
                    restored = candidate.paths;
                    println!("Restored {} queued file(s).", restored.len());
                } else {
                    store.discard();
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!("Ignoring saved queue state: {}", err),
        }
    }

    // Explicit flags override whatever a restored session carried.
    if force_ocr {
        options.ocr_mode = OcrMode::Force;
    }
    if gpu {
        options.use_gpu = true;
    }
    if optimize_size {
        options.optimize_for_size = true;
    }
    if let Some(workers) = workers {
        options.parallel = ParallelMode::from_state_str(workers);
    }
    if let Some(priority) = priority {
        options.priority = priority;
    }
    if let Some(display) = path_display {
        options.path_display = display;
    }
    let display_mode = options.path_display;

    for tool in helpers::check_dependencies() {
        if tool.required && tool.path.is_none() {
            println!(
                "{} {} not found on PATH; jobs will fail until it is installed",
                style("warning:").yellow().bold(),
                tool.name
            );
        }
    }

    let found = discovery::discover_pdfs(paths, recursive);
    if found.hit_file_cap {
        println!(
            "{} discovery stopped at the file cap; not everything was picked up",
            style("warning:").yellow().bold()
        );
    }
    if found.hit_depth_cap {
        println!(
            "{} some directories were too deeply nested and were skipped",
            style("warning:").yellow().bold()
        );
    }

    let mut inputs = restored;
    inputs.extend(found.paths);
    if inputs.is_empty() {
        println!("No PDF files found.");
        return Ok(());
    }

    let mut controller = Controller::new(
        Arc::new(ProcessWorkerLauncher),
        Box::new(SysinfoProbe::new()),
        options,
    );
    let added = controller.enqueue_paths(&inputs);
    println!("Queued {} PDF file(s).", added.added);
    if added.skipped_large > 0 {
        println!(
            "{} skipped {} file(s) over the size limit",
            style("warning:").yellow().bold(),
            added.skipped_large
        );
    }
    if added.queue_limit_hit {
        println!(
            "{} queue is full; the remaining files were not added",
            style("warning:").yellow().bold(),
        );
    }
    if added.added == 0 {
        println!("Nothing to do.");
        return Ok(());
    }

    if let Err(err) = store.save(&controller.pending_inputs(), controller.options()) {
        tracing::warn!("Could not save queue state: {}", err);
    }

    controller.start_batch().await?;
    drain_controller_log(&mut controller, None, verbose, display_mode);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut last_save = Instant::now();
    let mut interrupted = false;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                bar.suspend(|| println!("Interrupted; canceling active jobs..."));
                // Persist the unfinished set before cancellation collapses it.
                if let Err(err) = store.save(&controller.pending_inputs(), controller.options()) {
                    tracing::warn!("Could not save queue state: {}", err);
                }
                controller.cancel_all().await;
                drain_controller_log(&mut controller, Some(&bar), verbose, display_mode);
                interrupted = true;
                break;
            }
            _ = ticker.tick() => {
                controller.tick().await;
                drain_controller_log(&mut controller, Some(&bar), verbose, display_mode);

                let snapshot = controller.snapshot();
                bar.set_position(snapshot.percent as u64);
                bar.set_message(format!(
                    "{} running, {}/{} finished",
                    snapshot.running, snapshot.finished, snapshot.total
                ));

                if last_save.elapsed() >= STATE_SAVE_INTERVAL {
                    if let Err(err) = store.save(&controller.pending_inputs(), controller.options()) {
                        tracing::warn!("Could not save queue state: {}", err);
                    }
                    last_save = Instant::now();
                }
                if !snapshot.batch_running {
                    break;
                }
            }
        }
    }
    bar.finish_and_clear();

    if !interrupted {
        if let Err(err) = store.save(&controller.pending_inputs(), controller.options()) {
            tracing::warn!("Could not save queue state: {}", err);
        }
    }

    print_summary(&controller.task_views(), display_mode);

    if controller.any_failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn prompt_restore(count: usize) -> anyhow::Result<bool> {
    print!(
        "Restore {} queued file(s) from the previous session? [y/N] ",
        count
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"))
}

/// Print controller log lines without tearing the progress bar. Worker log
/// relays are high volume and only shown in verbose mode.
fn drain_controller_log(
    controller: &mut Controller,
    bar: Option<&ProgressBar>,
    verbose: bool,
    _display_mode: PathDisplayMode,
) {
    for entry in controller.take_log() {
        if entry.task_id.is_some() && !verbose {
            continue;
        }
        match bar {
            Some(bar) => bar.suspend(|| println!("{}", entry.line)),
            None => println!("{}", entry.line),
        }
    }
}

fn print_summary(views: &[TaskView], display_mode: PathDisplayMode) {
    println!();
    println!(
        "{:<44} {:<34} {:>8} {:>7} {:>10}  {}",
        style("File").bold(),
        style("Status").bold(),
        style("Time").bold(),
        style("Ratio").bold(),
        style("Peak RSS").bold(),
        style("Result").bold()
    );
    let mut ok = 0usize;
    let mut failed = 0usize;
    for view in views {
        let label = view.status.label();
        let status = if view.status.is_success() {
            style(label).green()
        } else if view.status == crate::models::TaskStatus::Failed {
            style(label).red()
        } else {
            style(label).dim()
        };
        let (duration, ratio) = match &view.report {
            Some(report) => (
                format_duration(report.duration_seconds),
                if report.size_ratio > 0.0 {
                    format!("{:.2}x", report.size_ratio)
                } else {
                    "-".to_string()
                },
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        let peak = if view.metrics.peak_rss_bytes > 0 {
            format_bytes(view.metrics.peak_rss_bytes)
        } else {
            "-".to_string()
        };
        println!(
            "{:<44} {:<34} {:>8} {:>7} {:>10}  {}",
            display_path(&view.input, display_mode),
            status,
            duration,
            ratio,
            peak,
            view.result_note
        );
        if view.status.is_success() {
            ok += 1;
        } else if view.status == crate::models::TaskStatus::Failed {
            failed += 1;
        }
    }
    println!();
    println!(
        "{} succeeded, {} failed, {} total.",
        style(ok).green(),
        if failed > 0 {
            style(failed).red()
        } else {
            style(failed).dim()
        },
        views.len()
    );
}
