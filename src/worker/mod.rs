//! Worker-process entry point.
//!
//! The hidden `worker` subcommand lands here: one job configuration arrives
//! as a JSON line on stdin, events leave as NDJSON on stdout, and the process
//! exits once the `done` event is written. Everything received from the
//! controller is treated as untrusted and re-validated before use.

pub mod logging;
pub mod metrics;
pub mod ocr;
pub mod paths;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;

use crate::config::MAX_INPUT_FILE_BYTES;
use crate::ipc::{JobConfig, JobReport, WorkerEvent};
use crate::metrics::SysinfoProbe;
use logging::{EventSink, JobLogger, StdoutEventSink};
use ocr::JobError;

/// Process one job configuration read from stdin.
pub fn run_from_stdin() -> anyhow::Result<()> {
    let mut line = String::new();
    std::io::stdin().read_to_string(&mut line)?;
    let sink: Arc<dyn EventSink> = Arc::new(StdoutEventSink::new());
    run_job_line(&line, sink);
    Ok(())
}

/// Parse and run a job, reporting malformed payloads as a failure event.
fn run_job_line(line: &str, sink: Arc<dyn EventSink>) {
    match serde_json::from_str::<JobConfig>(line.trim()) {
        Ok(config) => run_job(config, sink),
        Err(err) => {
            emit_config_failure(&sink, "task", &format!("Invalid task configuration: {}", err));
        }
    }
}

/// Run one job with the standard limits and PATH-resolved tool.
pub fn run_job(config: JobConfig, sink: Arc<dyn EventSink>) {
    let tool = which::which("ocrmypdf").ok();
    run_job_inner(config, sink, MAX_INPUT_FILE_BYTES, tool);
}

fn run_job_inner(
    config: JobConfig,
    sink: Arc<dyn EventSink>,
    max_input_bytes: u64,
    tool: Option<PathBuf>,
) {
    let task_id = paths::sanitize_task_id(&config.task_id);

    if let Err(err) = paths::validate_output_path(&config.output_pdf) {
        emit_config_failure(
            &sink,
            &task_id,
            &format!("Invalid task configuration: {}", err),
        );
        return;
    }
    let log_file = paths::safe_log_path(&config.log_file, &task_id);
    let temp_dir = paths::safe_scratch_dir(&config.temp_dir, &task_id);

    let logger = match JobLogger::new(&log_file, sink.clone(), &task_id) {
        Ok(logger) => logger,
        Err(err) => {
            emit_config_failure(
                &sink,
                &task_id,
                &format!("Invalid task configuration: cannot open log file: {}", err),
            );
            return;
        }
    };

    let mut probe = SysinfoProbe::new();
    let started = Instant::now();
    let start_stamp = now_stamp();
    let start_usage = metrics::snapshot(&mut probe);
    let input_size = file_size(&config.input_pdf);

    if input_size > max_input_bytes {
        let error = format!(
            "Input file is too large ({} bytes). Limit is {} bytes.",
            input_size, max_input_bytes
        );
        logger.error(&error);
        emit_status(&sink, &task_id, "Failed");
        sink.emit(&WorkerEvent::Done {
            task_id: task_id.clone(),
            report: JobReport {
                success: false,
                error,
                output_pdf: config.output_pdf.to_string_lossy().into_owned(),
                input_size,
                rss_start: start_usage.rss_bytes,
                rss_end: start_usage.rss_bytes,
                start_stamp,
                end_stamp: now_stamp(),
                ..JobReport::default()
            },
        });
        return;
    }

    logger.info(&format!("Task {} started.", task_id));
    logger.info(&format!("Input PDF: {}", config.input_pdf.display()));
    logger.info(&format!("Output PDF: {}", config.output_pdf.display()));
    logger.info(&format!(
        "OCR mode: {}",
        if config.force_ocr {
            "Force OCR all pages"
        } else {
            "Smart skip existing text"
        }
    ));
    logger.info(&format!(
        "OCR backend: {}",
        if config.use_gpu {
            "EasyOCR GPU plugin"
        } else {
            "CPU defaults"
        }
    ));
    logger.info(&format!(
        "Output size profile: {}",
        if config.optimize_for_size {
            "Balanced compression (smaller output)"
        } else {
            "Standard"
        }
    ));
    emit_status(&sink, &task_id, "Running");

    let mut success = false;
    let mut used_fallback = false;
    let mut error_message = String::new();

    match tool {
        None => {
            error_message = "ocrmypdf command was not found in PATH.".to_string();
            logger.error(&error_message);
            emit_status(&sink, &task_id, "Failed");
        }
        Some(bin) => match run_direct(&bin, &config, &logger) {
            Ok(()) => success = true,
            Err(err) if ocr::should_fallback_to_scratch(&config.input_pdf, &err) => {
                used_fallback = true;
                logger.warning(&format!(
                    "Permission/mount issue detected. Retrying via {}",
                    temp_dir.display()
                ));
                match run_fallback(&bin, &config, &temp_dir, &logger) {
                    Ok(()) => success = true,
                    Err(fallback_err) => {
                        error_message = format_error(&fallback_err, config.use_gpu);
                        logger.error(&format!(
                            "Fallback OCR failed for {}: {}",
                            config.input_pdf.display(),
                            fallback_err
                        ));
                    }
                }
            }
            Err(err) => {
                error_message = format_error(&err, config.use_gpu);
                if config.use_gpu {
                    logger.error(
                        "GPU plugin run failed. CUDA/plugin may be missing; retry with GPU disabled.",
                    );
                }
                logger.error(&format!(
                    "OCR failed for {}: {}",
                    config.input_pdf.display(),
                    err
                ));
            }
        },
    }

    let duration = started.elapsed().as_secs_f64();
    let end_stamp = now_stamp();
    let end_usage = metrics::snapshot(&mut probe);
    let output_size = if success {
        file_size(&config.output_pdf)
    } else {
        0
    };
    let ratio = if input_size > 0 {
        output_size as f64 / input_size as f64
    } else {
        0.0
    };
    let cpu_user_delta = (end_usage.cpu_user - start_usage.cpu_user).max(0.0);
    let cpu_system_delta = (end_usage.cpu_system - start_usage.cpu_system).max(0.0);

    logger.info(&format!("Task start: {}", start_stamp));
    logger.info(&format!("Task end: {}", end_stamp));
    logger.info(&format!("Duration: {:.2} seconds", duration));
    logger.info(&format!("Input size: {} bytes", input_size));
    logger.info(&format!("Output size: {} bytes", output_size));
    logger.info(&format!("Output/Input size ratio: {:.4}", ratio));
    logger.info(&format!("Process RSS start: {} bytes", start_usage.rss_bytes));
    logger.info(&format!("Process RSS end: {} bytes", end_usage.rss_bytes));
    logger.info(&format!("Process CPU user delta: {:.4}", cpu_user_delta));
    logger.info(&format!("Process CPU system delta: {:.4}", cpu_system_delta));
    if used_fallback {
        logger.info("Used /tmp fallback: yes");
    }

    sink.emit(&WorkerEvent::Done {
        task_id: task_id.clone(),
        report: JobReport {
            success,
            error: error_message,
            output_pdf: config.output_pdf.to_string_lossy().into_owned(),
            used_fallback,
            duration_seconds: duration,
            input_size,
            output_size,
            size_ratio: ratio,
            rss_start: start_usage.rss_bytes,
            rss_end: end_usage.rss_bytes,
            cpu_user_delta,
            cpu_system_delta,
            start_stamp,
            end_stamp,
        },
    });

    cleanup_scratch(&temp_dir);
}

fn run_direct(bin: &Path, config: &JobConfig, logger: &JobLogger) -> Result<(), JobError> {
    if let Some(parent) = config.output_pdf.parent() {
        fs::create_dir_all(parent)?;
    }
    ocr::run_ocr(
        bin,
        &config.input_pdf,
        &config.output_pdf,
        config.force_ocr,
        config.use_gpu,
        config.optimize_for_size,
        logger,
    )
}

/// Copy the input into scratch space, run there, and move the result onto
/// the real output path.
fn run_fallback(
    bin: &Path,
    config: &JobConfig,
    temp_dir: &Path,
    logger: &JobLogger,
) -> Result<(), JobError> {
    fs::create_dir_all(temp_dir)?;
    let name = config
        .input_pdf
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "input has no name"))?;
    let stem = config
        .input_pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let temp_input = temp_dir.join(name);
    let temp_output = temp_dir.join(format!("{}_ocr.pdf", stem));
    fs::copy(&config.input_pdf, &temp_input)?;
    ocr::run_ocr(
        bin,
        &temp_input,
        &temp_output,
        config.force_ocr,
        config.use_gpu,
        config.optimize_for_size,
        logger,
    )?;
    if let Some(parent) = config.output_pdf.parent() {
        fs::create_dir_all(parent)?;
    }
    ocr::move_file(&temp_output, &config.output_pdf)?;
    Ok(())
}

fn format_error(err: &JobError, use_gpu: bool) -> String {
    let mut message = format!("{}: {}", err.kind_name(), err);
    if use_gpu {
        message.push_str(" GPU plugin failed; disable GPU Acceleration and retry on CPU.");
    }
    message
}

/// Remove the scratch directory, but only when it verifies as living inside
/// the scratch root.
fn cleanup_scratch(temp_dir: &Path) {
    if paths::scratch_dir_is_safe_for_cleanup(temp_dir) {
        let _ = fs::remove_dir_all(temp_dir);
    }
}

fn emit_status(sink: &Arc<dyn EventSink>, task_id: &str, status: &str) {
    sink.emit(&WorkerEvent::Status {
        task_id: task_id.to_string(),
        status: status.to_string(),
    });
}

fn emit_config_failure(sink: &Arc<dyn EventSink>, task_id: &str, error: &str) {
    let stamp = now_stamp();
    sink.emit(&WorkerEvent::Done {
        task_id: task_id.to_string(),
        report: JobReport {
            success: false,
            error: error.to_string(),
            start_stamp: stamp.clone(),
            end_stamp: stamp,
            ..JobReport::default()
        },
    });
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// ISO-8601 local timestamp with second precision.
fn now_stamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
