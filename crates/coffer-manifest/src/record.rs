//! The file record and diff-entry types that make up a manifest.

use serde::{Deserialize, Serialize};

/// One file, as recorded in a manifest.
///
/// For non-empty files, `real_path` names the path whose upload owns the
/// backing object (its own path, if this record is the dedup master for
/// its `hash`; another path's, if this record is a duplicate) and
/// `version_id` is that object's version. `empty` files have neither: the
/// object store cannot hold a zero-length object, so they are represented
/// purely as manifest metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub created: f64,
    pub last_mod: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty: bool,
}

impl FileRecord {
    /// True if this record is the dedup master for its hash: the one whose
    /// upload created the backing object, as opposed to a duplicate that
    /// merely references it.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.real_path.as_deref() == Some(self.path.as_str())
    }

    /// Points `self` at `master`'s backing object, making `self` a
    /// duplicate of it. Both records must share a `hash` for this to be
    /// meaningful; that invariant is the caller's responsibility (the
    /// deduplication pass in the commit engine only calls this after
    /// matching on hash).
    pub fn reference_duplicate_to(&mut self, master: &FileRecord) {
        self.real_path = master.real_path.clone();
        self.version_id = master.version_id.clone();
    }
}

/// The three kinds of change a diff entry can record. Move detection
/// (present in some prior implementations of this model) is deliberately
/// not represented: deduplication by content hash makes a dedicated
/// "moved" status unnecessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    New,
    Changed,
    Deleted,
}

/// A single line of a diff: a [`FileRecord`] tagged with why it is present
/// in this diff. `status` is stripped when the diff is folded into a
/// manifest (see [`crate::manifest::apply_diffs`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(flatten)]
    pub record: FileRecord,
    pub status: ChangeStatus,
}

impl DiffEntry {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.record.path
    }
}
