//! Error types for coffer-manifest operations.

use thiserror::Error;

/// Errors that can occur while building, folding, or reconciling a
/// manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// `rebuild` was asked for a `version_id` absent from the diff chain.
    #[error("no diff in the chain matches version {0}")]
    UnknownVersion(String),

    /// The local cache file exists, but the remote diff chain is empty.
    /// Plausible causes include pointing at the wrong bucket or the remote
    /// chain having been tampered with.
    #[error("local manifest cache exists but the remote diff chain is empty")]
    LocalPresentRemoteMissing,

    /// The local cache and the remote diff chain have diverged by more
    /// than one diff; automatic reconciliation is not safe.
    #[error(
        "local manifest cache ({local_last_modified}) and remote chain head \
         ({remote_last_modified}) have diverged beyond one diff"
    )]
    ReconciliationFailure {
        local_last_modified: String,
        remote_last_modified: String,
    },

    /// Underlying object-store failure.
    #[error(transparent)]
    Store(#[from] coffer_store::StoreError),

    /// Underlying pipeline codec failure, encountered while decoding a
    /// published diff through the configured meta pipeline.
    #[error(transparent)]
    Pipeline(#[from] coffer_pipeline::PipelineError),

    /// Underlying (de)serialisation failure.
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Underlying local I/O failure (reading/writing the manifest cache).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
