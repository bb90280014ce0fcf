//! Comparing a freshly scanned tree against a prior manifest's file list.

use std::collections::HashMap;

use coffer_manifest::{ChangeStatus, DiffEntry, FileRecord};

/// Compares `current` (freshly scanned) against `prior_files` (the file
/// list of the manifest being backed up against), returning one
/// [`DiffEntry`] per path that changed, keyed by path for easy chunking
/// and lookup downstream.
///
/// - present in both, `last_mod` differs → `Changed`
/// - absent from `prior_files` → `New`
/// - present in `prior_files`, absent from `current` → `Deleted`
/// - present in both with equal `last_mod` → omitted entirely
#[must_use]
pub fn find_changes(current: &[FileRecord], prior_files: &[FileRecord]) -> HashMap<String, DiffEntry> {
    let mut prior_by_path: HashMap<&str, &FileRecord> =
        prior_files.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut changes = HashMap::new();

    for file in current {
        match prior_by_path.remove(file.path.as_str()) {
            Some(prior) if prior.last_mod == file.last_mod => {
                // Unchanged; omitted.
            }
            Some(_) => {
                changes.insert(
                    file.path.clone(),
                    DiffEntry {
                        record: file.clone(),
                        status: ChangeStatus::Changed,
                    },
                );
            }
            None => {
                changes.insert(
                    file.path.clone(),
                    DiffEntry {
                        record: file.clone(),
                        status: ChangeStatus::New,
                    },
                );
            }
        }
    }

    for (path, prior) in prior_by_path {
        changes.insert(
            path.to_string(),
            DiffEntry {
                record: (*prior).clone(),
                status: ChangeStatus::Deleted,
            },
        );
    }

    changes
}

/// Sorts diff entries (or file records) the way every commit/restore pass
/// in this system orders its work: lexicographically by `(dirname,
/// basename)`, so directories group together and output reads naturally.
#[must_use]
pub fn dirname_basename_key(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}
