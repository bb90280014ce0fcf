//! The manifest model: file records, diffs, diff-folding, and
//! reconciliation between a local cache and the remote diff chain.

pub mod error;
pub mod manifest;
pub mod reconcile;
pub mod record;

pub use error::ManifestError;
pub use manifest::{Diff, LatestRemoteDiff, Manifest, apply_diffs, rebuild};
pub use reconcile::{DiffChainReader, ManifestCache, get_manifest};
pub use record::{ChangeStatus, DiffEntry, FileRecord};

/// Result type for manifest operations.
pub type Result<T> = std::result::Result<T, ManifestError>;
