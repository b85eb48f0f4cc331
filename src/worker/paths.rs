//! Validation of controller-supplied paths and identifiers.
//!
//! The worker treats its stdin config as untrusted: task identifiers are
//! whitelisted, log and scratch paths must stay inside their roots, and
//! symlinked outputs are refused outright.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::config::{log_root, scratch_root};
use crate::discovery::is_pdf;

/// Output locations the worker refuses to write.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputPathError {
    #[error("Output path must be a PDF.")]
    NotPdf,
    #[error("Refusing to overwrite symlink output file.")]
    SymlinkFile,
    #[error("Refusing symlink output directory.")]
    SymlinkDirectory,
}

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-f0-9]{8,32}$").unwrap())
}

/// Accept only short lowercase hex identifiers; anything else becomes "task".
///
/// The identifier ends up in log file names and scratch directory names, so
/// it must never carry separators or traversal fragments.
pub fn sanitize_task_id(value: &str) -> String {
    if task_id_pattern().is_match(value) {
        value.to_string()
    } else {
        "task".to_string()
    }
}

/// Resolve `.` and `..` segments without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() && !result.has_root() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Resolve symlinks in the longest existing prefix, then reattach the rest.
fn resolve_best_effort(path: &Path) -> PathBuf {
    let normalized = normalize_lexically(path);
    let mut existing = normalized.clone();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match fs::canonicalize(&existing) {
            Ok(canonical) => {
                let mut result = canonical;
                for part in tail.iter().rev() {
                    result.push(part);
                }
                return result;
            }
            Err(_) => match existing.file_name() {
                Some(name) => {
                    tail.push(name.to_os_string());
                    existing = existing
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                }
                None => return normalized,
            },
        }
    }
}

fn is_within(root: &Path, path: &Path) -> bool {
    let root = resolve_best_effort(root);
    let path = resolve_best_effort(path);
    path.starts_with(&root)
}

/// Keep the requested scratch directory only when it lives under the
/// scratch root; otherwise fall back to a fresh per-task directory.
pub fn safe_scratch_dir(requested: &Path, task_id: &str) -> PathBuf {
    let root = scratch_root();
    if is_within(&root, requested) {
        resolve_best_effort(requested)
    } else {
        root.join(task_id)
    }
}

/// Keep the requested log path only when its parent lives under the log
/// root; otherwise fall back to the shared worker-log directory.
pub fn safe_log_path(requested: &Path, task_id: &str) -> PathBuf {
    let root = log_root();
    match requested.parent() {
        Some(parent) if is_within(&root, parent) => requested.to_path_buf(),
        _ => root.join("worker_logs").join(format!("{}.log", task_id)),
    }
}

/// Refuse output paths that are not PDFs or that would write through a
/// symlink.
pub fn validate_output_path(path: &Path) -> Result<(), OutputPathError> {
    if !is_pdf(path) {
        return Err(OutputPathError::NotPdf);
    }
    let exists = fs::metadata(path).is_ok();
    let is_symlink = fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if exists && is_symlink {
        return Err(OutputPathError::SymlinkFile);
    }
    if let Some(parent) = path.parent() {
        let parent_exists = fs::metadata(parent).is_ok();
        let parent_symlink = fs::symlink_metadata(parent)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if parent_exists && parent_symlink {
            return Err(OutputPathError::SymlinkDirectory);
        }
    }
    Ok(())
}

/// Whether a scratch directory may be deleted recursively. Only directories
/// that really resolve into the scratch root qualify.
pub fn scratch_dir_is_safe_for_cleanup(dir: &Path) -> bool {
    let root = match fs::canonicalize(scratch_root()) {
        Ok(root) => root,
        Err(_) => return false,
    };
    let dir = match fs::canonicalize(dir) {
        Ok(dir) => dir,
        Err(_) => return false,
    };
    dir.starts_with(&root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_accepts_short_hex() {
        assert_eq!(sanitize_task_id("abc123def456"), "abc123def456");
        assert_eq!(sanitize_task_id("aaaaaaaa"), "aaaaaaaa");
    }

    #[test]
    fn test_sanitize_rejects_everything_else() {
        assert_eq!(sanitize_task_id(""), "task");
        assert_eq!(sanitize_task_id("abc"), "task");
        assert_eq!(sanitize_task_id("ABC123DEF456"), "task");
        assert_eq!(sanitize_task_id("../../etc/passwd"), "task");
        assert_eq!(sanitize_task_id("abc123def456 "), "task");
        assert_eq!(sanitize_task_id(&"a".repeat(33)), "task");
    }

    #[test]
    fn test_normalize_strips_traversal() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(
            normalize_lexically(Path::new("/a/../../b")),
            PathBuf::from("/b")
        );
    }

    #[test]
    fn test_scratch_dir_inside_root_kept() {
        let requested = scratch_root().join("abc123def456");
        assert_eq!(
            safe_scratch_dir(&requested, "abc123def456"),
            resolve_best_effort(&requested)
        );
    }

    #[test]
    fn test_scratch_dir_outside_root_replaced() {
        let replaced = safe_scratch_dir(Path::new("/somewhere/else"), "abc123def456");
        assert_eq!(replaced, scratch_root().join("abc123def456"));

        // Traversal back out of the root is caught after normalization.
        let sneaky = scratch_root().join("x/../../../etc");
        let replaced = safe_scratch_dir(&sneaky, "abc123def456");
        assert_eq!(replaced, scratch_root().join("abc123def456"));
    }

    #[test]
    fn test_log_path_inside_root_kept() {
        let requested = log_root().join("batch_x").join("doc_abc123def456.log");
        assert_eq!(safe_log_path(&requested, "abc123def456"), requested);
    }

    #[test]
    fn test_log_path_outside_root_replaced() {
        let replaced = safe_log_path(Path::new("/tmp/evil.log"), "abc123def456");
        assert_eq!(
            replaced,
            log_root().join("worker_logs").join("abc123def456.log")
        );
    }

    #[test]
    fn test_output_must_be_pdf() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            validate_output_path(&dir.path().join("out.txt")),
            Err(OutputPathError::NotPdf)
        );
        assert_eq!(validate_output_path(&dir.path().join("out.pdf")), Ok(()));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_refuses_symlink_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real.pdf");
        std::fs::File::create(&real).expect("create");
        let link = dir.path().join("link.pdf");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        assert_eq!(
            validate_output_path(&link),
            Err(OutputPathError::SymlinkFile)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_output_refuses_symlink_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        fs::create_dir(&real).expect("mkdir");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        assert_eq!(
            validate_output_path(&link.join("out.pdf")),
            Err(OutputPathError::SymlinkDirectory)
        );
    }

    #[test]
    fn test_cleanup_guard_rejects_outside_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!scratch_dir_is_safe_for_cleanup(dir.path()));
        assert!(!scratch_dir_is_safe_for_cleanup(Path::new(
            "/no/such/dir/at/all"
        )));
    }

    #[test]
    fn test_cleanup_guard_accepts_scratch_subdir() {
        let inside = scratch_root().join("cleanup-guard-test");
        if fs::create_dir_all(&inside).is_ok() {
            assert!(scratch_dir_is_safe_for_cleanup(&inside));
            let _ = fs::remove_dir_all(&inside);
        }
    }
}
