//! Storage-key hashing.
//!
//! Orthogonal to the content transform stack: replaces a file's logical
//! path with the hex SHA-256 digest of that path when selecting its remote
//! object key, so directory structure and file names are not visible to
//! anyone who can list the bucket. The manifest always retains the
//! original logical path; only the remote key is affected.

use sha2::{Digest, Sha256};

/// Computes the storage key for `path` under the `hash_names` transform.
#[must_use]
pub fn hash_path(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}
