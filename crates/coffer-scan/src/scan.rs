//! Recursive directory walk, producing a [`FileRecord`] per regular file.
//!
//! Paths are normalised to forward-slash, rooted at `/`, relative to
//! `base_path` — independent of the host's path separator, so manifests
//! produced on one platform restore cleanly on another. Unreadable
//! directories and files are collected into `read_errors` rather than
//! aborting the walk: a single permission-denied entry should not prevent
//! the rest of the tree from being backed up.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use coffer_manifest::FileRecord;
use globset::GlobSet;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::ScanError;

/// The outcome of walking a local tree: every readable file found, plus the
/// paths that could not be read (permission denied, broken symlink, etc.).
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: Vec<FileRecord>,
    pub read_errors: Vec<PathBuf>,
}

/// Converts a filesystem path, relative to `base_path`, into the POSIX-style
/// rooted form stored in manifests (`/a/b/c`), regardless of host OS
/// separator conventions.
fn to_internal_path(relative: &Path) -> String {
    let mut out = String::from("/");
    for (i, component) in relative.components().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

fn is_mount_point(entry: &DirEntry, parent_dev: Option<u64>) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let Ok(metadata) = entry.metadata() else {
            return false;
        };
        match parent_dev {
            Some(parent_dev) => metadata.dev() != parent_dev,
            None => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (entry, parent_dev);
        false
    }
}

#[cfg(unix)]
fn dev_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.dev())
}

#[cfg(not(unix))]
fn dev_of(_path: &Path) -> Option<u64> {
    None
}

fn epoch_seconds(time: std::io::Result<std::time::SystemTime>) -> f64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Recursively walks `base_path`, returning a [`FileRecord`] (with `hash`
/// unset — see [`crate::hash::hash_files`]) for every regular file not
/// excluded by `ignore_globs`, skipping mount points when
/// `visit_mountpoints` is `false`.
pub fn scan(base_path: &Path, ignore_globs: &GlobSet, visit_mountpoints: bool) -> ScanResult {
    let mut result = ScanResult::default();
    let base_dev = dev_of(base_path);

    let walker = WalkDir::new(base_path).into_iter().filter_entry(|entry| {
        let Ok(relative) = entry.path().strip_prefix(base_path) else {
            return true;
        };
        if relative.as_os_str().is_empty() {
            return true;
        }
        let internal_path = to_internal_path(relative);
        if ignore_globs.is_match(&internal_path) {
            return false;
        }
        if !visit_mountpoints && entry.file_type().is_dir() && is_mount_point(entry, base_dev) {
            return false;
        }
        true
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if let Some(path) = err.path() {
                    warn!(?path, error = %err, "could not walk entry, skipping");
                    result.read_errors.push(path.to_path_buf());
                }
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(base_path) else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(error) => {
                warn!(path = %entry.path().display(), %error, "could not stat file, skipping");
                result.read_errors.push(entry.path().to_path_buf());
                continue;
            }
        };

        if std::fs::File::open(entry.path()).is_err() {
            warn!(path = %entry.path().display(), "could not open file for reading, skipping");
            result.read_errors.push(entry.path().to_path_buf());
            continue;
        }

        let created = metadata.created().or_else(|_| metadata.modified());
        result.files.push(FileRecord {
            path: to_internal_path(relative),
            created: epoch_seconds(created),
            last_mod: epoch_seconds(metadata.modified()),
            hash: None,
            real_path: None,
            version_id: None,
            empty: false,
        });
    }

    result
}

/// Compiles `ignore_files` glob patterns (per `file_pipeline`/`ignore_files`
/// configuration) into a matchable set.
pub fn build_glob_set(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|source| ScanError::InvalidGlob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ScanError::InvalidGlob {
        pattern: patterns.join(","),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_all_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        let globs = build_glob_set(&[]).unwrap();
        let result = scan(dir.path(), &globs, true);

        let mut paths: Vec<_> = result.files.iter().map(|f| f.path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/a.txt".to_string(), "/sub/b.txt".to_string()]);
        assert!(result.read_errors.is_empty());
    }

    #[test]
    fn ignore_globs_exclude_matching_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"a").unwrap();
        fs::write(dir.path().join("skip.tmp"), b"b").unwrap();

        let globs = build_glob_set(&["*.tmp".to_string()]).unwrap();
        let result = scan(dir.path(), &globs, true);

        let paths: Vec<_> = result.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec!["/keep.txt".to_string()]);
    }

    #[test]
    fn empty_tree_yields_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let globs = build_glob_set(&[]).unwrap();
        let result = scan(dir.path(), &globs, true);
        assert!(result.files.is_empty());
    }
}
