//! A local-filesystem-backed [`ObjectStore`] that emulates per-key version
//! history.
//!
//! This is the reference adapter used by the engine's own test suite and as
//! a template for real adapters (S3, GCS, Azure Blob, ...), which are
//! external collaborators outside the scope of this crate. Each key becomes
//! a directory under `<base_dir>/objects/`; each write creates a new
//! `<version_id>.bin` plus a `<version_id>.meta.json` sidecar recording its
//! timestamp, so multiple versions of one key coexist exactly like a
//! versioned bucket.

use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::traits::{MultipartUpload, ObjectStore};
use crate::types::{GetResult, ObjectMeta, ObjectVersion, PutResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionMeta {
    #[serde(with = "time::serde::rfc3339")]
    last_modified: OffsetDateTime,
}

fn random_version_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

async fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path).await?;
    Ok(())
}

/// A local-filesystem-backed object store.
pub struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    /// Opens (creating if necessary) a store rooted at `base_dir`.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        ensure_dir(&base_dir.join("objects")).await?;
        ensure_dir(&Self::uploads_dir(&base_dir)).await?;
        debug!(?base_dir, "opened local object store");
        Ok(Self { base_dir })
    }

    fn uploads_dir(base_dir: &Path) -> PathBuf {
        base_dir.join(".uploads")
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.base_dir.join("objects").join(key)
    }

    async fn write_version(&self, key: &str, data: &[u8]) -> Result<PutResult, StoreError> {
        let dir = self.key_dir(key);
        ensure_dir(&dir).await?;
        let version_id = random_version_id();
        fs::write(dir.join(format!("{version_id}.bin")), data).await?;
        let meta = VersionMeta {
            last_modified: OffsetDateTime::now_utc(),
        };
        fs::write(
            dir.join(format!("{version_id}.meta.json")),
            serde_json::to_vec(&meta)?,
        )
        .await?;
        Ok(PutResult { version_id })
    }

    async fn resolve_version(&self, key: &str, version: Option<&str>) -> Result<String, StoreError> {
        match version {
            Some(v) => Ok(v.to_string()),
            None => {
                let versions = self.list_versions(key).await?;
                versions
                    .last()
                    .map(|v| v.version_id.clone())
                    .ok_or_else(|| StoreError::NoSuch { key: key.to_string() })
            }
        }
    }

    async fn read_meta(&self, key: &str, version: &str) -> Result<VersionMeta, StoreError> {
        let path = self.key_dir(key).join(format!("{version}.meta.json"));
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NoSuch { key: key.to_string() }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl ObjectStore for LocalStore {
    type Upload = LocalMultipartUpload;

    async fn verify_versioning(&self) -> Result<(), StoreError> {
        // Every key directory in this adapter inherently keeps every version
        // ever written, so versioning is always "enabled".
        Ok(())
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<PutResult, StoreError> {
        self.write_version(key, &data).await
    }

    async fn get_object(&self, key: &str, version: Option<&str>) -> Result<GetResult, StoreError> {
        let version_id = self.resolve_version(key, version).await?;
        let meta = self.read_meta(key, &version_id).await?;
        let path = self.key_dir(key).join(format!("{version_id}.bin"));
        let body = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NoSuch { key: key.to_string() }
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(GetResult {
            meta: ObjectMeta {
                version_id,
                content_length: body.len() as u64,
                last_modified: meta.last_modified,
            },
            body: Bytes::from(body),
        })
    }

    async fn head_object(&self, key: &str, version: Option<&str>) -> Result<ObjectMeta, StoreError> {
        let version_id = self.resolve_version(key, version).await?;
        let meta = self.read_meta(key, &version_id).await?;
        let path = self.key_dir(key).join(format!("{version_id}.bin"));
        let content_length = fs::metadata(&path).await?.len();
        Ok(ObjectMeta {
            version_id,
            content_length,
            last_modified: meta.last_modified,
        })
    }

    async fn ranged_download(
        &self,
        key: &str,
        version: &str,
        range: Range<u64>,
    ) -> Result<Bytes, StoreError> {
        let path = self.key_dir(key).join(format!("{version}.bin"));
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NoSuch { key: key.to_string() }
            } else {
                StoreError::Io(e)
            }
        })?;
        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let len = (range.end - range.start) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>, StoreError> {
        let dir = self.key_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(version_id) = name.strip_suffix(".meta.json") else {
                continue;
            };
            let meta = self.read_meta(key, version_id).await?;
            versions.push(ObjectVersion {
                key: key.to_string(),
                version_id: version_id.to_string(),
                last_modified: meta.last_modified,
            });
        }
        versions.sort_by_key(|v| v.last_modified);
        Ok(versions)
    }

    /// Keys may contain `/`, so a key's directory can be nested arbitrarily
    /// deep under `objects/`; a directory holding `*.meta.json` sidecars is
    /// a key's directory, identified by its path relative to `objects/`.
    async fn list_all_versions(&self) -> Result<Vec<ObjectVersion>, StoreError> {
        let objects_dir = self.base_dir.join("objects");
        let mut out = Vec::new();
        let mut stack = vec![objects_dir.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut subdirs = Vec::new();
            let mut is_key_dir = false;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    subdirs.push(entry.path());
                } else if entry.file_name().to_string_lossy().ends_with(".meta.json") {
                    is_key_dir = true;
                }
            }

            if is_key_dir {
                let relative = dir.strip_prefix(&objects_dir).unwrap_or(&dir);
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.extend(self.list_versions(&key).await?);
            }
            stack.extend(subdirs);
        }

        Ok(out)
    }

    async fn delete_version(&self, key: &str, version: &str) -> Result<(), StoreError> {
        let dir = self.key_dir(key);
        for ext in [".bin", ".meta.json"] {
            match fs::remove_file(dir.join(format!("{version}{ext}"))).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(key, version, "garbage object already deleted");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn begin_multipart_upload(&self, key: &str) -> Result<Self::Upload, StoreError> {
        let upload_id = random_version_id();
        let path = Self::uploads_dir(&self.base_dir).join(format!("{upload_id}.part"));
        let file = fs::File::create(&path).await?;
        Ok(LocalMultipartUpload {
            key: key.to_string(),
            path,
            file: Some(file),
            base_dir: self.base_dir.clone(),
        })
    }

    async fn abort_failed_multiparts(&self) -> Result<(), StoreError> {
        let dir = Self::uploads_dir(&self.base_dir);
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("part") {
                debug!(?path, "aborting stale multipart upload");
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

/// A multipart upload in progress against a [`LocalStore`].
pub struct LocalMultipartUpload {
    key: String,
    path: PathBuf,
    file: Option<fs::File>,
    base_dir: PathBuf,
}

impl MultipartUpload for LocalMultipartUpload {
    async fn upload_part(&mut self, data: Bytes) -> Result<(), StoreError> {
        let Some(file) = self.file.as_mut() else {
            return Err(StoreError::Io(std::io::Error::other(
                "upload already finished or aborted",
            )));
        };
        file.write_all(&data).await?;
        Ok(())
    }

    async fn finish(mut self) -> Result<PutResult, StoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        let data = fs::read(&self.path).await?;
        let store = LocalStore {
            base_dir: self.base_dir.clone(),
        };
        let result = store.write_version(&self.key, &data).await?;
        fs::remove_file(&self.path).await?;
        Ok(result)
    }

    async fn abort(mut self) -> Result<(), StoreError> {
        self.file.take();
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let put = store.put_object("files/a", Bytes::from_static(b"hello")).await.unwrap();
        let got = store.get_object("files/a", Some(&put.version_id)).await.unwrap();
        assert_eq!(got.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn multiple_puts_create_multiple_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        store.put_object("files/a", Bytes::from_static(b"v1")).await.unwrap();
        store.put_object("files/a", Bytes::from_static(b"v2")).await.unwrap();
        let versions = store.list_versions("files/a").await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn get_missing_key_is_no_such() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let err = store.get_object("files/missing", None).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuch { .. }));
    }

    #[tokio::test]
    async fn list_versions_on_unwritten_key_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        assert!(store.list_versions("files/never-written").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multipart_upload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let mut upload = store.begin_multipart_upload("files/big").await.unwrap();
        upload.upload_part(Bytes::from_static(b"part one ")).await.unwrap();
        upload.upload_part(Bytes::from_static(b"part two")).await.unwrap();
        let result = upload.finish().await.unwrap();

        let got = store.get_object("files/big", Some(&result.version_id)).await.unwrap();
        assert_eq!(got.body, Bytes::from_static(b"part one part two"));
    }

    #[tokio::test]
    async fn aborted_multipart_leaves_no_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let mut upload = store.begin_multipart_upload("files/c").await.unwrap();
        upload.upload_part(Bytes::from_static(b"partial")).await.unwrap();
        upload.abort().await.unwrap();

        assert!(store.list_versions("files/c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_versions_covers_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        store.put_object("files/a", Bytes::from_static(b"1")).await.unwrap();
        store.put_object("files/sub/b", Bytes::from_static(b"2")).await.unwrap();
        store.put_object("manifest_diffs", Bytes::from_static(b"3")).await.unwrap();

        let mut keys: Vec<_> = store.list_all_versions().await.unwrap().into_iter().map(|v| v.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["files/a", "files/sub/b", "manifest_diffs"]);
    }

    #[tokio::test]
    async fn abort_failed_multiparts_cleans_stale_parts() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let mut upload = store.begin_multipart_upload("files/d").await.unwrap();
        upload.upload_part(Bytes::from_static(b"orphaned")).await.unwrap();
        // Simulate a crash: the upload is neither finished nor aborted.
        std::mem::forget(upload);

        store.abort_failed_multiparts().await.unwrap();
        let remaining = std::fs::read_dir(LocalStore::uploads_dir(dir.path()))
            .unwrap()
            .count();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn delete_version_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let put = store.put_object("files/e", Bytes::from_static(b"x")).await.unwrap();
        store.delete_version("files/e", &put.version_id).await.unwrap();
        assert!(store.list_versions("files/e").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_already_deleted_version_does_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).await.unwrap();
        let put = store.put_object("files/f", Bytes::from_static(b"x")).await.unwrap();
        store.delete_version("files/f", &put.version_id).await.unwrap();
        store.delete_version("files/f", &put.version_id).await.unwrap();
    }
}
