//! Mapping a logical manifest path to the object-store key it is backed by.

use coffer_pipeline::TransformKind;

use crate::config::Config;

/// Computes the remote key a logical `path` (as it appears in a
/// [`FileRecord`](coffer_manifest::FileRecord)) is stored under: the literal
/// path beneath `remote_base_path`, or — if `transforms` includes
/// `hash_names` — the hex SHA-256 digest of the path beneath it instead, so
/// directory structure and file names are not visible to anyone who can
/// list the bucket.
#[must_use]
pub fn remote_key_for(config: &Config, path: &str, transforms: &[TransformKind]) -> String {
    let tail = if transforms.contains(&TransformKind::HashNames) {
        coffer_pipeline::hash_names::hash_path(path)
    } else {
        path.trim_start_matches('/').to_string()
    };
    format!("{}/{tail}", config.remote_base_path.trim_end_matches('/'))
}
