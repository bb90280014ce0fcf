//! The object-store adapter contract.
//!
//! The commit engine, restore engine and garbage collector depend only on
//! this trait. A real adapter (S3, GCS, Azure Blob, ...) is an external
//! collaborator built against this contract; this crate ships exactly one
//! concrete implementation, [`crate::local::LocalStore`], used by the
//! engine's own test suite and as a template for real adapters.

use std::ops::Range;

use bytes::Bytes;

use crate::error::StoreError;
use crate::types::{GetResult, ObjectMeta, ObjectVersion, PutResult};

/// A versioned object store: every write creates a new, immutable version
/// of its key, and every version remains individually retrievable and
/// deletable until explicitly removed.
pub trait ObjectStore: Send + Sync {
    /// The multipart upload session type this adapter produces.
    type Upload: MultipartUpload;

    /// Verifies the target bucket/container has versioning enabled,
    /// returning [`StoreError::VersioningNotEnabled`] if not.
    async fn verify_versioning(&self) -> Result<(), StoreError>;

    /// Writes `data` as a new version of `key` in one shot.
    async fn put_object(&self, key: &str, data: Bytes) -> Result<PutResult, StoreError>;

    /// Fetches a version of `key` (the latest, if `version` is `None`).
    /// Returns [`StoreError::NoSuch`] if the key or version does not exist.
    async fn get_object(&self, key: &str, version: Option<&str>) -> Result<GetResult, StoreError>;

    /// Like [`Self::get_object`] but without the body.
    async fn head_object(&self, key: &str, version: Option<&str>) -> Result<ObjectMeta, StoreError>;

    /// Reads a byte range of a specific version of `key`.
    async fn ranged_download(
        &self,
        key: &str,
        version: &str,
        range: Range<u64>,
    ) -> Result<Bytes, StoreError>;

    /// Lists every version of `key`, ascending by `last_modified`. Returns
    /// an empty list if the key has never been written.
    async fn list_versions(&self, key: &str) -> Result<Vec<ObjectVersion>, StoreError>;

    /// Lists every version of every key in the bucket/container. Used only
    /// by full-mode garbage collection, which must cross-check the entire
    /// remote against every object the manifest's diff chain references;
    /// every other operation works one key at a time via
    /// [`Self::list_versions`].
    async fn list_all_versions(&self) -> Result<Vec<ObjectVersion>, StoreError>;

    /// Permanently deletes one version of `key`.
    async fn delete_version(&self, key: &str, version: &str) -> Result<(), StoreError>;

    /// Begins a multipart upload of `key`.
    async fn begin_multipart_upload(&self, key: &str) -> Result<Self::Upload, StoreError>;

    /// Aborts any multipart uploads left in flight from a previous,
    /// interrupted run.
    async fn abort_failed_multiparts(&self) -> Result<(), StoreError>;
}

/// An in-progress multipart upload.
pub trait MultipartUpload: Send {
    /// Uploads the next part.
    async fn upload_part(&mut self, data: Bytes) -> Result<(), StoreError>;

    /// Completes the upload, returning the version it created.
    async fn finish(self) -> Result<PutResult, StoreError>;

    /// Abandons the upload; no version is created and any parts already
    /// uploaded are discarded by the store.
    async fn abort(self) -> Result<(), StoreError>;
}
