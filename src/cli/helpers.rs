//! Shared helper functions for CLI commands.

use std::path::{Path, PathBuf};

use crate::config::PathDisplayMode;

/// Paths with more components than this get elided.
const ELIDE_THRESHOLD: usize = 4;

/// Render a task path according to the configured display mode.
pub fn display_path(path: &Path, mode: PathDisplayMode) -> String {
    match mode {
        PathDisplayMode::Full => path.display().to_string(),
        PathDisplayMode::Name => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        PathDisplayMode::Elided => elide(path),
    }
}

/// Shorten a long path to its anchor plus the last three components.
fn elide(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.len() <= ELIDE_THRESHOLD {
        return path.display().to_string();
    }
    let anchor = parts[0].trim_end_matches('/');
    let tail = parts[parts.len() - 3..].join("/");
    format!("{}/.../{}", anchor, tail)
}

/// Render a duration in seconds as a compact human figure.
pub fn format_duration(seconds: f64) -> String {
    if seconds <= 0.0 {
        return "-".to_string();
    }
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else {
        let minutes = (seconds / 60.0).floor() as u64;
        let rest = seconds - minutes as f64 * 60.0;
        format!("{}m{:02.0}s", minutes, rest)
    }
}

/// One external tool the OCR pipeline depends on.
pub struct DependencyStatus {
    pub name: &'static str,
    pub required: bool,
    /// Resolved executable, when one was found on PATH.
    pub path: Option<PathBuf>,
}

/// Probe PATH for the runtime dependencies.
///
/// Ghostscript ships under different names per platform, so any of its
/// known binaries counts.
pub fn check_dependencies() -> Vec<DependencyStatus> {
    let ghostscript = ["gs", "gswin64c", "gswin32c"]
        .iter()
        .find_map(|name| which::which(name).ok());
    vec![
        DependencyStatus {
            name: "ocrmypdf",
            required: true,
            path: which::which("ocrmypdf").ok(),
        },
        DependencyStatus {
            name: "tesseract",
            required: true,
            path: which::which("tesseract").ok(),
        },
        DependencyStatus {
            name: "ghostscript",
            required: true,
            path: ghostscript,
        },
        DependencyStatus {
            name: "qpdf",
            required: false,
            path: which::which("qpdf").ok(),
        },
    ]
}
