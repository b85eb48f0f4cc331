//! PDF discovery across files and directory trees.
//!
//! Expands user-supplied paths into a deduplicated, ordered list of PDF
//! files. Recursive scans refuse to follow symlinked directories and stop
//! at a fixed depth so a hostile or looping tree cannot wedge the queue.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{MAX_DISCOVERED_PDFS, MAX_SCAN_DEPTH};

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Canonical paths of every PDF found, in scan order.
    pub paths: Vec<PathBuf>,
    /// True when the file cap cut the scan short.
    pub hit_file_cap: bool,
    /// True when at least one directory was pruned for depth.
    pub hit_depth_cap: bool,
}

/// Expand the given roots into PDF paths using the standard caps.
pub fn discover_pdfs(roots: &[PathBuf], recursive: bool) -> DiscoveryReport {
    discover_with_caps(roots, recursive, MAX_DISCOVERED_PDFS, MAX_SCAN_DEPTH)
}

fn discover_with_caps(
    roots: &[PathBuf],
    recursive: bool,
    max_files: usize,
    max_depth: usize,
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    'roots: for raw in roots {
        let expanded = shellexpand::tilde(&raw.to_string_lossy()).into_owned();
        let root = PathBuf::from(expanded);
        let metadata = match fs::metadata(&root) {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        if metadata.is_file() {
            if is_pdf(&root) && push_pdf(&root, &mut seen, &mut report.paths) {
                if report.paths.len() >= max_files {
                    report.hit_file_cap = true;
                    break 'roots;
                }
            }
            continue;
        }
        if !metadata.is_dir() {
            continue;
        }

        let base = match fs::canonicalize(&root) {
            Ok(base) => base,
            Err(err) => {
                tracing::warn!("Skipping unreadable path {}: {}", root.display(), err);
                continue;
            }
        };

        let mut stack: Vec<(PathBuf, usize)> = vec![(base, 0)];
        while let Some((dir, depth)) = stack.pop() {
            if depth >= max_depth {
                report.hit_depth_cap = true;
                continue;
            }
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!("Skipping unreadable directory {}: {}", dir.display(), err);
                    continue;
                }
            };

            let mut files: Vec<PathBuf> = Vec::new();
            let mut subdirs: Vec<PathBuf> = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    subdirs.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                } else if file_type.is_symlink() {
                    // Symlinked files are allowed; symlinked directories are
                    // never descended into.
                    if fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
                        files.push(path);
                    }
                }
            }
            files.sort();
            subdirs.sort();

            for file in files {
                if is_pdf(&file) && push_pdf(&file, &mut seen, &mut report.paths) {
                    if report.paths.len() >= max_files {
                        report.hit_file_cap = true;
                        break 'roots;
                    }
                }
            }
            if recursive {
                for subdir in subdirs.into_iter().rev() {
                    stack.push((subdir, depth + 1));
                }
            }
        }
    }

    report
}

pub(crate) fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Canonicalize and record a PDF path. Returns true when it was new.
fn push_pdf(path: &Path, seen: &mut HashSet<PathBuf>, out: &mut Vec<PathBuf>) -> bool {
    let canonical = match fs::canonicalize(path) {
        Ok(canonical) => canonical,
        Err(_) => return false,
    };
    if seen.insert(canonical.clone()) {
        out.push(canonical);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(path: &Path) {
        File::create(path).expect("create file");
    }

    #[test]
    fn test_flat_directory_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("b.pdf"));
        touch(&dir.path().join("a.PDF"));
        touch(&dir.path().join("notes.txt"));

        let report = discover_pdfs(&[dir.path().to_path_buf()], false);
        let names: Vec<_> = report
            .paths
            .iter()
            .map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        assert_eq!(
            names,
            vec![Some("a.PDF".to_string()), Some("b.pdf".to_string())]
        );
        assert!(!report.hit_file_cap);
        assert!(!report.hit_depth_cap);
    }

    #[test]
    fn test_nested_files_need_recursive() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        touch(&dir.path().join("top.pdf"));
        touch(&dir.path().join("sub").join("deep.pdf"));

        let flat = discover_pdfs(&[dir.path().to_path_buf()], false);
        assert_eq!(flat.paths.len(), 1);

        let deep = discover_pdfs(&[dir.path().to_path_buf()], true);
        assert_eq!(deep.paths.len(), 2);
    }

    #[test]
    fn test_duplicate_roots_dedupe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("only.pdf");
        touch(&pdf);

        let report = discover_pdfs(&[dir.path().to_path_buf(), pdf.clone()], false);
        assert_eq!(report.paths.len(), 1);
    }

    #[test]
    fn test_missing_roots_are_ignored() {
        let report = discover_pdfs(&[PathBuf::from("/no/such/path/anywhere")], true);
        assert!(report.paths.is_empty());
    }

    #[test]
    fn test_file_cap_stops_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..5 {
            touch(&dir.path().join(format!("doc{}.pdf", i)));
        }

        let report = discover_with_caps(&[dir.path().to_path_buf()], false, 2, MAX_SCAN_DEPTH);
        assert_eq!(report.paths.len(), 2);
        assert!(report.hit_file_cap);
    }

    #[test]
    fn test_depth_cap_prunes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let near = dir.path().join("a");
        let far = near.join("b");
        fs::create_dir_all(&far).expect("mkdirs");
        touch(&near.join("near.pdf"));
        touch(&far.join("far.pdf"));

        let report = discover_with_caps(&[dir.path().to_path_buf()], true, 1000, 2);
        let names: Vec<_> = report
            .paths
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["near.pdf"]);
        assert!(report.hit_depth_cap);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directories_not_followed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        fs::create_dir(&real).expect("mkdir");
        touch(&real.join("x.pdf"));
        std::os::unix::fs::symlink(&real, dir.path().join("link")).expect("symlink");

        let report = discover_pdfs(&[dir.path().to_path_buf()], true);
        assert_eq!(report.paths.len(), 1);
    }
}
