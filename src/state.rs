//! Queue-state persistence between sessions.
//!
//! Unfinished queue entries and the batch options are written to a small
//! JSON file so an interrupted session can offer to restore them. The file
//! is written atomically with owner-only permissions and is distrusted on
//! load: symlinks, loose permissions, oversized or unparseable files all
//! disqualify it.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{
    state_file_path, JobOptions, OcrMode, ParallelMode, PathDisplayMode, PriorityMode,
    MAX_QUEUE_ITEMS, MAX_RESTORE_PATHS, MAX_STATE_FILE_BYTES, MAX_WORKERS,
};
use crate::discovery::is_pdf;

/// Failures while reading or writing the queue-state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("queue state IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue state is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("queue state file has unsafe permissions")]
    Insecure,
    #[error("queue state file is larger than {MAX_STATE_FILE_BYTES} bytes")]
    Oversized,
}

/// On-disk layout of the queue-state file.
#[derive(Debug, Serialize, Deserialize)]
struct QueueStateFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    queued_paths: Vec<String>,
    #[serde(default = "default_ocr_mode")]
    ocr_mode: String,
    #[serde(default)]
    use_gpu_acceleration: bool,
    #[serde(default)]
    optimize_for_size: bool,
    #[serde(default = "default_parallel_mode")]
    parallel_mode: String,
    #[serde(default = "default_custom_workers")]
    custom_workers: u32,
    #[serde(default = "default_priority_mode")]
    priority_mode: String,
    #[serde(default = "default_path_display_mode")]
    path_display_mode: String,
    #[serde(default = "default_file_manager_choice")]
    file_manager_choice: String,
}

fn default_version() -> u32 {
    1
}

fn default_ocr_mode() -> String {
    "smart".to_string()
}

fn default_parallel_mode() -> String {
    "auto".to_string()
}

fn default_custom_workers() -> u32 {
    crate::config::DEFAULT_WORKERS
}

fn default_priority_mode() -> String {
    "normal".to_string()
}

fn default_path_display_mode() -> String {
    "elided".to_string()
}

fn default_file_manager_choice() -> String {
    "auto".to_string()
}

impl QueueStateFile {
    fn from_snapshot(pending: &[PathBuf], options: &JobOptions) -> Self {
        Self {
            version: 1,
            queued_paths: pending
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            ocr_mode: options.ocr_mode.as_str().to_string(),
            use_gpu_acceleration: options.use_gpu,
            optimize_for_size: options.optimize_for_size,
            parallel_mode: options.parallel.as_state_str(),
            custom_workers: options.custom_workers,
            priority_mode: options.priority.as_str().to_string(),
            path_display_mode: options.path_display.as_str().to_string(),
            // A custom file manager never survives persistence; the command
            // it points at lives in per-user settings, not in this file.
            file_manager_choice: if options.file_manager_choice == "custom" {
                "auto".to_string()
            } else {
                options.file_manager_choice.clone()
            },
        }
    }

    fn into_options(self) -> JobOptions {
        let file_manager_choice = if self.file_manager_choice == "custom"
            || self.file_manager_choice.is_empty()
        {
            "auto".to_string()
        } else {
            self.file_manager_choice
        };
        JobOptions {
            ocr_mode: OcrMode::from_str(&self.ocr_mode),
            use_gpu: self.use_gpu_acceleration,
            optimize_for_size: self.optimize_for_size,
            parallel: ParallelMode::from_state_str(&self.parallel_mode),
            custom_workers: self.custom_workers.clamp(1, MAX_WORKERS),
            priority: PriorityMode::from_str(&self.priority_mode),
            path_display: PathDisplayMode::from_str(&self.path_display_mode),
            file_manager_choice,
        }
    }
}

/// A validated restore offer from a previous session.
#[derive(Debug)]
pub struct RestoreCandidate {
    /// Queued inputs that still exist and still look like PDFs.
    pub paths: Vec<PathBuf>,
    /// Batch options as they were when the state was saved, clamped to
    /// current limits.
    pub options: JobOptions,
}

/// Reads and writes the queue-state file at a fixed location.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store rooted at the per-user configuration directory.
    pub fn default_location() -> Self {
        Self::new(state_file_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the unfinished queue, or delete the file when nothing is
    /// pending. An existing file with unsafe permissions is left untouched.
    pub fn save(&self, pending: &[PathBuf], options: &JobOptions) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::symlink_metadata(&self.path) {
            Ok(metadata) => {
                if !metadata_is_secure(&metadata) {
                    tracing::debug!(
                        "Not overwriting queue state with unsafe permissions: {}",
                        self.path.display()
                    );
                    return Ok(());
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if pending.is_empty() {
            let _ = fs::remove_file(&self.path);
            return Ok(());
        }

        let payload = serde_json::to_string(&QueueStateFile::from_snapshot(pending, options))?;
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(payload.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Load and validate saved state.
    ///
    /// Returns `Ok(None)` when there is no file or nothing in it survives
    /// revalidation. Paths that vanished, stopped being files, or lost their
    /// `.pdf` extension since the save are dropped silently.
    pub fn load(&self) -> Result<Option<RestoreCandidate>, StateError> {
        let metadata = match fs::symlink_metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if !metadata_is_secure(&metadata) {
            return Err(StateError::Insecure);
        }
        if metadata.len() > MAX_STATE_FILE_BYTES {
            return Err(StateError::Oversized);
        }

        let text = fs::read_to_string(&self.path)?;
        let file: QueueStateFile = serde_json::from_str(&text)?;

        let restore_cap = MAX_RESTORE_PATHS.min(MAX_QUEUE_ITEMS);
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut paths: Vec<PathBuf> = Vec::new();
        for raw in file.queued_paths.iter().take(restore_cap) {
            let expanded = shellexpand::tilde(raw).into_owned();
            let candidate = match fs::canonicalize(Path::new(&expanded)) {
                Ok(candidate) => candidate,
                Err(_) => continue,
            };
            if !candidate.is_file() || !is_pdf(&candidate) {
                continue;
            }
            if seen.insert(candidate.clone()) {
                paths.push(candidate);
            }
        }
        if paths.is_empty() {
            return Ok(None);
        }
        Ok(Some(RestoreCandidate {
            paths,
            options: file.into_options(),
        }))
    }

    /// Remove the state file, ignoring a missing one.
    pub fn discard(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// A state file qualifies only when it is a regular file that nobody but
/// the owner can write.
fn metadata_is_secure(metadata: &fs::Metadata) -> bool {
    if metadata.file_type().is_symlink() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o022 != 0 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn sample_options() -> JobOptions {
        JobOptions {
            ocr_mode: OcrMode::Force,
            use_gpu: true,
            optimize_for_size: true,
            parallel: ParallelMode::Fixed(4),
            custom_workers: 10,
            priority: PriorityMode::Background,
            path_display: PathDisplayMode::Name,
            file_manager_choice: "auto".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf_a = dir.path().join("a.pdf");
        let pdf_b = dir.path().join("b.pdf");
        File::create(&pdf_a).expect("create");
        File::create(&pdf_b).expect("create");

        let store = StateStore::new(dir.path().join("queue_state.json"));
        store
            .save(&[pdf_a.clone(), pdf_b.clone()], &sample_options())
            .expect("save");

        let restored = store.load().expect("load").expect("candidate");
        assert_eq!(restored.paths.len(), 2);
        assert_eq!(restored.options.ocr_mode, OcrMode::Force);
        assert_eq!(restored.options.parallel, ParallelMode::Fixed(4));
        assert_eq!(restored.options.priority, PriorityMode::Background);
        assert!(restored.options.use_gpu);
    }

    #[test]
    fn test_empty_save_deletes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("a.pdf");
        File::create(&pdf).expect("create");

        let store = StateStore::new(dir.path().join("queue_state.json"));
        store.save(&[pdf], &JobOptions::default()).expect("save");
        assert!(store.path().exists());

        store.save(&[], &JobOptions::default()).expect("save empty");
        assert!(!store.path().exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("queue_state.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_unparseable_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue_state.json");
        fs::write(&path, "not json at all").expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).expect("chmod");
        }

        let store = StateStore::new(path);
        assert!(matches!(store.load(), Err(StateError::Serde(_))));
    }

    #[test]
    fn test_oversized_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue_state.json");
        let blob = vec![b' '; (MAX_STATE_FILE_BYTES + 1) as usize];
        fs::write(&path, blob).expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).expect("chmod");
        }

        let store = StateStore::new(path);
        assert!(matches!(store.load(), Err(StateError::Oversized)));
    }

    #[cfg(unix)]
    #[test]
    fn test_group_writable_file_is_insecure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue_state.json");
        fs::write(&path, "{}").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o664)).expect("chmod");

        let store = StateStore::new(path);
        assert!(matches!(store.load(), Err(StateError::Insecure)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_state_file_is_insecure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real.json");
        fs::write(&real, "{}").expect("write");
        let link = dir.path().join("queue_state.json");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let store = StateStore::new(link);
        assert!(matches!(store.load(), Err(StateError::Insecure)));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_leaves_insecure_file_alone() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("a.pdf");
        File::create(&pdf).expect("create");
        let path = dir.path().join("queue_state.json");
        fs::write(&path, "sentinel").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).expect("chmod");

        let store = StateStore::new(path.clone());
        store.save(&[pdf], &JobOptions::default()).expect("save");
        assert_eq!(fs::read_to_string(&path).expect("read"), "sentinel");
    }

    #[test]
    fn test_restore_drops_stale_and_foreign_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keep = dir.path().join("keep.pdf");
        File::create(&keep).expect("create");
        let text = dir.path().join("notes.txt");
        File::create(&text).expect("create");
        let gone = dir.path().join("gone.pdf");

        let state = serde_json::json!({
            "version": 1,
            "queued_paths": [
                keep.to_string_lossy(),
                keep.to_string_lossy(),
                text.to_string_lossy(),
                gone.to_string_lossy(),
            ],
        });
        let path = dir.path().join("queue_state.json");
        fs::write(&path, state.to_string()).expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).expect("chmod");
        }

        let store = StateStore::new(path);
        let restored = store.load().expect("load").expect("candidate");
        assert_eq!(restored.paths.len(), 1);
        assert!(restored.paths[0].ends_with("keep.pdf"));
        // Defaults cover the missing option fields.
        assert_eq!(restored.options.ocr_mode, OcrMode::Smart);
        assert_eq!(restored.options.parallel, ParallelMode::Auto);
    }

    #[test]
    fn test_restore_clamps_and_sanitizes_options() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("a.pdf");
        File::create(&pdf).expect("create");

        let state = serde_json::json!({
            "version": 1,
            "queued_paths": [pdf.to_string_lossy()],
            "ocr_mode": "mystery",
            "parallel_mode": "whatever",
            "custom_workers": 9999,
            "priority_mode": "turbo",
            "path_display_mode": "hex",
            "file_manager_choice": "custom",
        });
        let path = dir.path().join("queue_state.json");
        fs::write(&path, state.to_string()).expect("write");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).expect("chmod");
        }

        let store = StateStore::new(path);
        let restored = store.load().expect("load").expect("candidate");
        assert_eq!(restored.options.ocr_mode, OcrMode::Smart);
        assert_eq!(restored.options.parallel, ParallelMode::Auto);
        assert_eq!(restored.options.custom_workers, MAX_WORKERS);
        assert_eq!(restored.options.priority, PriorityMode::Normal);
        assert_eq!(restored.options.path_display, PathDisplayMode::Elided);
        assert_eq!(restored.options.file_manager_choice, "auto");
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_has_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("a.pdf");
        File::create(&pdf).expect("create");

        let store = StateStore::new(dir.path().join("queue_state.json"));
        store.save(&[pdf], &JobOptions::default()).expect("save");

        let mode = fs::metadata(store.path())
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
