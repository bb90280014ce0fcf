//! The manifest: a materialised file list, and the diff-fold algorithm
//! that produces it from a sequence of diffs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::record::{ChangeStatus, DiffEntry, FileRecord};

/// Identifies the diff-chain version a manifest was last folded up to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestRemoteDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// The materialised state of a backed-up tree at some point in its
/// history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub latest_remote_diff: LatestRemoteDiff,
    pub files: Vec<FileRecord>,
}

impl Manifest {
    /// An empty manifest, as returned when the diff chain has never been
    /// written to.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One diff object: an ordered batch of [`DiffEntry`] values plus the
/// version the object store assigned it when it was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub version_id: String,
    pub last_modified: String,
    pub entries: Vec<DiffEntry>,
}

/// Folds `diffs`, in order, into `files`.
///
/// For each diff: any path present in the diff (regardless of status)
/// replaces whatever record that path had in the running manifest — a
/// duplicate path in an incoming diff is treated as an update, matching
/// `deleted`/`changed`'s removal of the prior record. `new` and `changed`
/// entries are then re-added (with `status` dropped); `deleted` entries
/// are not.
#[must_use]
pub fn apply_diffs(diffs: &[Diff], files: &[FileRecord]) -> Vec<FileRecord> {
    let mut current = files.to_vec();

    for diff in diffs {
        let touched: HashSet<&str> = diff.entries.iter().map(DiffEntry::path).collect();
        current.retain(|record| !touched.contains(record.path.as_str()));

        current.extend(diff.entries.iter().filter_map(|entry| match entry.status {
            ChangeStatus::New | ChangeStatus::Changed => Some(entry.record.clone()),
            ChangeStatus::Deleted => None,
        }));
    }

    current
}

/// Rebuilds the manifest file list from `diffs`, up to and including the
/// diff whose `version_id` matches `version`. If `version` is `None`, all
/// diffs are applied (the current head).
pub fn rebuild(diffs: &[Diff], version: Option<&str>) -> Result<Vec<FileRecord>, ManifestError> {
    let prefix = match version {
        None => diffs,
        Some(v) => {
            let idx = diffs
                .iter()
                .position(|d| d.version_id == v)
                .ok_or_else(|| ManifestError::UnknownVersion(v.to_string()))?;
            &diffs[..=idx]
        }
    };
    Ok(apply_diffs(prefix, &[]))
}
