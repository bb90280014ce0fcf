//! Shared value types for the object-store adapter contract.

use bytes::Bytes;
use time::OffsetDateTime;

/// One version of one key, as returned by [`ObjectStore::list_versions`](crate::ObjectStore::list_versions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub last_modified: OffsetDateTime,
}

/// Result of a successful `get_object` or `head_object` call.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub version_id: String,
    pub content_length: u64,
    pub last_modified: OffsetDateTime,
}

/// Result of a `get_object` call, carrying the full body.
#[derive(Debug, Clone)]
pub struct GetResult {
    pub meta: ObjectMeta,
    pub body: Bytes,
}

/// Result of a successful write (one-shot put or completed multipart).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub version_id: String,
}
