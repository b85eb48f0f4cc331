//! Runtime limits, filesystem roots, and batch option types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Worker ceiling applied when parallelism is resolved automatically.
pub const DEFAULT_WORKERS: u32 = 32;

/// Hard upper bound on concurrent worker processes.
pub const MAX_WORKERS: u32 = 64;

/// Largest input PDF accepted for processing (2 GiB).
pub const MAX_INPUT_FILE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Path discovery stops once this many PDFs have been collected.
pub const MAX_DISCOVERED_PDFS: usize = 20_000;

/// The queue refuses new entries past this count.
pub const MAX_QUEUE_ITEMS: usize = 20_000;

/// Recursive scans prune directories nested deeper than this.
pub const MAX_SCAN_DEPTH: usize = 16;

/// Queue-state files larger than this are treated as corrupt (2 MiB).
pub const MAX_STATE_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// At most this many queued paths are restored from a previous session.
pub const MAX_RESTORE_PATHS: usize = 5_000;

/// Output PDFs land in this directory next to each input file.
pub const OUTPUT_DIR_NAME: &str = "OCR_Output";

/// Root directory for batch directories and per-task log files.
///
/// Falls back gracefully: local data dir -> home dir -> current dir.
pub fn log_root() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocrbatch")
        .join("logs")
}

/// Root directory for per-task scratch space.
pub fn scratch_root() -> PathBuf {
    std::env::temp_dir().join("ocrbatch_jobs")
}

/// Render a byte count with a binary-unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Location of the persisted queue-state snapshot.
pub fn state_file_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocrbatch")
        .join("queue_state.json")
}

/// How pages that already carry a text layer are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    /// Skip pages that already have text.
    #[default]
    Smart,
    /// Rasterize and re-OCR every page.
    Force,
}

impl OcrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Smart => "smart",
            OcrMode::Force => "force",
        }
    }

    /// Parse a stored mode string, defaulting to smart for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s {
            "force" => OcrMode::Force,
            _ => OcrMode::Smart,
        }
    }
}

/// How the number of concurrent workers is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// Derive from CPU count, capped at [`DEFAULT_WORKERS`].
    Auto,
    /// Use the separately stored custom worker count.
    Custom,
    /// Use exactly this many workers.
    Fixed(u32),
}

impl Default for ParallelMode {
    fn default() -> Self {
        ParallelMode::Auto
    }
}

impl ParallelMode {
    /// Stored-state representation ("auto", "custom", or a number).
    pub fn as_state_str(&self) -> String {
        match self {
            ParallelMode::Auto => "auto".to_string(),
            ParallelMode::Custom => "custom".to_string(),
            ParallelMode::Fixed(n) => n.to_string(),
        }
    }

    /// Parse a stored-state string, defaulting to auto for unknown values.
    pub fn from_state_str(s: &str) -> Self {
        match s {
            "auto" => ParallelMode::Auto,
            "custom" => ParallelMode::Custom,
            other => match other.parse::<u32>() {
                Ok(n) => ParallelMode::Fixed(n),
                Err(_) => ParallelMode::Auto,
            },
        }
    }
}

/// OS scheduling priority applied to worker processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    /// Inherit the controller's priority.
    #[default]
    Normal,
    /// Nice the workers below interactive processes.
    Low,
    /// Lowest practical priority, plus idle I/O class where supported.
    Background,
}

impl PriorityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityMode::Normal => "normal",
            PriorityMode::Low => "low",
            PriorityMode::Background => "background",
        }
    }

    /// Parse a stored mode string, defaulting to normal for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s {
            "low" => PriorityMode::Low,
            "background" => PriorityMode::Background,
            _ => PriorityMode::Normal,
        }
    }

    /// Unix nice level for worker processes in this mode.
    pub fn nice_level(&self) -> i32 {
        match self {
            PriorityMode::Normal => 0,
            PriorityMode::Low => 10,
            PriorityMode::Background => 15,
        }
    }
}

/// How task input paths are rendered in status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PathDisplayMode {
    /// Shortened with a leading anchor and ellipsis.
    #[default]
    Elided,
    /// Full absolute path.
    Full,
    /// File name only.
    Name,
}

impl PathDisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathDisplayMode::Elided => "elided",
            PathDisplayMode::Full => "full",
            PathDisplayMode::Name => "name",
        }
    }

    /// Parse a stored mode string, defaulting to elided for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s {
            "full" => PathDisplayMode::Full,
            "name" => PathDisplayMode::Name,
            _ => PathDisplayMode::Elided,
        }
    }
}

/// Options applied to every task in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    pub ocr_mode: OcrMode,
    pub use_gpu: bool,
    pub optimize_for_size: bool,
    pub parallel: ParallelMode,
    pub custom_workers: u32,
    pub priority: PriorityMode,
    pub path_display: PathDisplayMode,
    /// File-manager preference carried through queue state for other frontends.
    pub file_manager_choice: String,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            ocr_mode: OcrMode::default(),
            use_gpu: false,
            optimize_for_size: false,
            parallel: ParallelMode::default(),
            custom_workers: DEFAULT_WORKERS,
            priority: PriorityMode::default(),
            path_display: PathDisplayMode::default(),
            file_manager_choice: "auto".to_string(),
        }
    }
}

impl JobOptions {
    /// Resolve the configured parallelism to a concrete worker count.
    ///
    /// Auto mode leaves two CPUs free for the rest of the system. The result
    /// is always clamped to `1..=MAX_WORKERS`.
    pub fn resolve_worker_limit(&self) -> u32 {
        let workers = match self.parallel {
            ParallelMode::Auto => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get() as u32)
                    .unwrap_or(8);
                DEFAULT_WORKERS.min(cpus.saturating_sub(2).max(1))
            }
            ParallelMode::Custom => self.custom_workers,
            ParallelMode::Fixed(n) => n,
        };
        workers.clamp(1, MAX_WORKERS)
    }
}
