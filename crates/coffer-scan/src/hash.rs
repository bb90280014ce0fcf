//! Content hashing of new/changed files, ahead of deduplication.

use std::collections::HashMap;
use std::path::Path;

use coffer_manifest::{ChangeStatus, DiffEntry};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::ScanError;

/// Block size used when hashing file contents, matching the reference
/// implementation's `hash_file`.
const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Hashes the content of every `New`/`Changed` entry in `diff`, attaching
/// the hex SHA-256 digest to its [`FileRecord`](coffer_manifest::FileRecord).
/// `Deleted` entries are left untouched — there is nothing on disk left to
/// hash.
pub async fn hash_files(
    diff: &mut HashMap<String, DiffEntry>,
    base_path: &Path,
) -> Result<(), ScanError> {
    for entry in diff.values_mut() {
        if !matches!(entry.status, ChangeStatus::New | ChangeStatus::Changed) {
            continue;
        }
        let local_path = base_path.join(entry.record.path.trim_start_matches('/'));
        entry.record.hash = Some(hash_file(&local_path).await?);
    }
    Ok(())
}

/// Hashes a single file's contents in fixed-size blocks, matching the
/// reference implementation's chunked `sha256` pass.
pub async fn hash_file(path: &Path) -> Result<String, ScanError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_manifest::FileRecord;

    fn entry(path: &str, status: ChangeStatus) -> DiffEntry {
        DiffEntry {
            record: FileRecord {
                path: path.to_string(),
                created: 0.0,
                last_mod: 0.0,
                hash: None,
                real_path: None,
                version_id: None,
                empty: false,
            },
            status,
        }
    }

    #[tokio::test]
    async fn hashes_new_and_changed_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();

        let mut diff = HashMap::new();
        diff.insert("/a.txt".to_string(), entry("/a.txt", ChangeStatus::New));

        hash_files(&mut diff, dir.path()).await.unwrap();
        assert!(diff["/a.txt"].record.hash.is_some());
    }

    #[tokio::test]
    async fn deleted_entries_are_never_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let mut diff = HashMap::new();
        diff.insert("/gone.txt".to_string(), entry("/gone.txt", ChangeStatus::Deleted));

        hash_files(&mut diff, dir.path()).await.unwrap();
        assert!(diff["/gone.txt"].record.hash.is_none());
    }

    #[tokio::test]
    async fn identical_content_hashes_the_same() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"same content").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"same content").unwrap();

        let hash_a = hash_file(&dir.path().join("a.txt")).await.unwrap();
        let hash_b = hash_file(&dir.path().join("b.txt")).await.unwrap();
        assert_eq!(hash_a, hash_b);
    }
}
