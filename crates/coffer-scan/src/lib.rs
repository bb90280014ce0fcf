//! Local tree scanning, change detection, and content hashing.
//!
//! Produces the inputs the commit engine folds into a new diff: a directory
//! walk tagged with `{new, changed, deleted}` status against a prior
//! manifest, and content hashes for anything newly added or modified. Move
//! detection is deliberately not implemented here — deduplication by
//! content hash in the commit engine supersedes it.

pub mod diff;
pub mod error;
pub mod hash;
pub mod scan;

pub use diff::{dirname_basename_key, find_changes};
pub use error::ScanError;
pub use hash::{hash_file, hash_files};
pub use scan::{ScanResult, build_glob_set, scan};

/// Result type for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
