//! Error types for coffer-store operations.

use thiserror::Error;

/// Errors an [`ObjectStore`](crate::ObjectStore) implementation can return.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested key (and, if given, version) does not exist.
    #[error("no such object: {key}")]
    NoSuch { key: String },

    /// The target bucket/container does not have versioning enabled.
    #[error("versioning is not enabled on the target bucket")]
    VersioningNotEnabled,

    /// A multipart upload was started but never finished or aborted.
    #[error("multipart upload {upload_id} for {key} is still pending")]
    PendingMultipart { key: String, upload_id: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying (de)serialisation failure for adapter-local metadata.
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}
