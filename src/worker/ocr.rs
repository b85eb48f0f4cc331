//! Driving the ocrmypdf command line.
//!
//! The tool runs with stdout captured and stderr streamed line by line into
//! the job log, so page-level notices reach the controller while the job is
//! still running. The last stretch of stderr is retained as error detail.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;

use super::logging::JobLogger;

/// Lines of tool stderr retained for failure details.
const ERROR_TAIL_LINES: usize = 30;

/// Failures while preparing for or running the OCR tool.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("ocrmypdf executable is not available in PATH.")]
    ToolMissing,
    #[error("ocrmypdf failed with exit code {code}: {details}")]
    ToolFailed { code: i32, details: String },
    #[error("ocrmypdf failed with exit code {code}.")]
    ToolFailedNoOutput { code: i32 },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Exception-style prefix for user-facing error text.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ToolMissing | Self::ToolFailed { .. } | Self::ToolFailedNoOutput { .. } => {
                "RuntimeError"
            }
            Self::Io(err) => match err.kind() {
                std::io::ErrorKind::PermissionDenied => "PermissionError",
                std::io::ErrorKind::NotFound => "FileNotFoundError",
                _ => "OSError",
            },
        }
    }
}

fn tool_failure(code: i32, details: String) -> JobError {
    if details.is_empty() {
        JobError::ToolFailedNoOutput { code }
    } else {
        JobError::ToolFailed { code, details }
    }
}

/// Assemble the ocrmypdf argument list for one run.
pub fn build_ocr_args(
    input: &Path,
    output: &Path,
    force_ocr: bool,
    use_gpu: bool,
    optimize_for_size: bool,
    include_plugin: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--jobs".into(),
        "1".into(),
        "--rotate-pages".into(),
        "--deskew".into(),
    ];
    if force_ocr {
        args.push("--force-ocr".into());
    } else {
        args.push("--skip-text".into());
    }
    if use_gpu {
        // The EasyOCR plugin requires the sandwich renderer (no hOCR support).
        args.push("--pdf-renderer".into());
        args.push("sandwich".into());
    } else {
        args.push("--ocr-engine".into());
        args.push("tesseract".into());
    }
    if optimize_for_size {
        for arg in ["-O", "2", "--jpeg-quality", "75", "--png-quality", "70"] {
            args.push(arg.into());
        }
    }
    if include_plugin {
        args.push("--plugin".into());
        args.push("ocrmypdf_easyocr".into());
    }
    args.push(input.as_os_str().to_os_string());
    args.push(output.as_os_str().to_os_string());
    args
}

/// Registration clash seen when the EasyOCR plugin is loaded both through
/// its package entry point and the explicit `--plugin` flag.
pub fn is_duplicate_plugin_error(details: &str) -> bool {
    let lowered = details.to_lowercase();
    lowered.contains("plugin already registered under a different name")
        && lowered.contains("ocrmypdf_easyocr")
}

/// Whether a failed job should be retried from scratch space. Only inputs
/// on managed mounts qualify, and only for permission-shaped failures.
pub fn should_fallback_to_scratch(input: &Path, error: &JobError) -> bool {
    if !input.to_string_lossy().starts_with("/mnt/") {
        return false;
    }
    if let JobError::Io(err) = error {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return true;
        }
    }
    const MARKERS: [&str; 5] = [
        "permission",
        "operation not permitted",
        "read-only file system",
        "access denied",
        "mount",
    ];
    let message = error.to_string().to_lowercase();
    MARKERS.iter().any(|marker| message.contains(marker))
}

/// Move a file, copying and deleting when a plain rename is not possible.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// Run the OCR tool over one input.
///
/// Any pre-existing output file is deleted first. In GPU mode the EasyOCR
/// plugin is requested explicitly; when that trips the duplicate-plugin
/// registration error the run is retried once without the flag.
pub fn run_ocr(
    bin: &Path,
    input: &Path,
    output: &Path,
    force_ocr: bool,
    use_gpu: bool,
    optimize_for_size: bool,
    logger: &JobLogger,
) -> Result<(), JobError> {
    if fs::metadata(output).is_ok() {
        fs::remove_file(output)?;
    }
    let include_plugin = use_gpu;
    let args = build_ocr_args(
        input,
        output,
        force_ocr,
        use_gpu,
        optimize_for_size,
        include_plugin,
    );
    match run_tool_once(bin, &args, logger) {
        Err(JobError::ToolFailed { details, .. })
            if include_plugin && is_duplicate_plugin_error(&details) =>
        {
            let retry_args =
                build_ocr_args(input, output, force_ocr, use_gpu, optimize_for_size, false);
            run_tool_once(bin, &retry_args, logger)
        }
        result => result,
    }
}

fn run_tool_once(bin: &Path, args: &[OsString], logger: &JobLogger) -> Result<(), JobError> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                JobError::ToolMissing
            } else {
                JobError::Io(err)
            }
        })?;

    // Drain stdout off-thread so neither pipe can fill up and stall the tool.
    let stdout_handle = child.stdout.take().map(|mut stdout| {
        std::thread::spawn(move || {
            let mut buffer = String::new();
            let _ = stdout.read_to_string(&mut buffer);
            buffer
        })
    });

    let mut tail: VecDeque<String> = VecDeque::with_capacity(ERROR_TAIL_LINES);
    if let Some(stderr) = child.stderr.take() {
        for line in BufReader::new(stderr).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            logger.tool_line(&line);
            if tail.len() == ERROR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    let status = child.wait()?;
    let stdout_text = stdout_handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    if status.success() {
        return Ok(());
    }

    let joined = tail.into_iter().collect::<Vec<_>>().join("\n");
    let mut details = joined.trim().to_string();
    if details.is_empty() {
        details = stdout_text.trim().to_string();
    }
    Err(tool_failure(exit_code(&status), details))
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
