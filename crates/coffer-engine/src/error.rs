//! Error types for the commit engine, restore engine, and garbage collector.

use thiserror::Error;

/// Fatal errors the engine can return. Transient per-file errors (a read
/// error during scan, an I/O failure mid-upload) are never represented
/// here — they are logged and accumulated alongside a successful result
/// instead, per the engine's error taxonomy.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Another commit is already in progress on this host.
    #[error("another commit is already in progress (lock held)")]
    Locked,

    /// The operation is forbidden because the engine is configured
    /// `read_only`.
    #[error("operation forbidden: engine is read-only")]
    ReadOnly,

    /// The operation is forbidden because the engine is configured
    /// `write_only`.
    #[error("operation forbidden: engine is write-only")]
    WriteOnly,

    /// No entry in `file_pipeline` matched a file's path.
    #[error("no file_pipeline entry matches path {0:?}")]
    NoPipelineMatch(String),

    /// Full-mode garbage collection found manifest-referenced objects
    /// absent from the remote.
    #[error("full garbage collection found {0} manifest-referenced objects missing from the remote")]
    MissingObjects(usize),

    /// An unrecognised garbage-collection mode was requested.
    #[error("invalid garbage collection mode {0:?}, expected \"simple\" or \"full\"")]
    InvalidGcMode(String),

    /// `clean_gc_log` was invoked without delete permission.
    #[error("cannot clean the garbage-object log without allow_delete_versions and !read_only")]
    CannotDelete,

    /// A pipeline header declared a transform this engine does not
    /// recognise, or was otherwise malformed for the operation at hand.
    #[error("invalid pipeline header: {0}")]
    InvalidPipelineHeader(String),

    /// A non-empty manifest record is missing `real_path`/`version_id`,
    /// violating invariant I1 — the manifest itself is corrupt, not
    /// merely diverged from the remote chain.
    #[error("manifest record {0:?} is non-empty but has no backing object reference")]
    CorruptRecord(String),

    /// The requested restore `version_id` does not exist in the diff
    /// chain.
    #[error(transparent)]
    Manifest(#[from] coffer_manifest::ManifestError),

    /// Underlying object-store failure.
    #[error(transparent)]
    Store(#[from] coffer_store::StoreError),

    /// Underlying pipeline codec failure.
    #[error(transparent)]
    Pipeline(#[from] coffer_pipeline::PipelineError),

    /// Underlying crypto failure.
    #[error(transparent)]
    Crypto(#[from] coffer_crypto::CryptoError),

    /// Underlying scan failure.
    #[error(transparent)]
    Scan(#[from] coffer_scan::ScanError),

    /// Underlying local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying (de)serialisation failure.
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}
