//! Error types for coffer-pipeline operations.

use thiserror::Error;

/// Errors that can occur while encoding or decoding a pipeline object.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The declared pipeline header was not valid JSON.
    #[error("invalid pipeline header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    /// The object was shorter than its declared header length prefix.
    #[error("object is shorter than its header length prefix")]
    TruncatedHeader,

    /// A chunk's length prefix did not fit the remaining bytes.
    #[error("truncated chunk: expected {expected} bytes, got {actual}")]
    TruncatedChunk { expected: usize, actual: usize },

    /// No entry in `file_pipeline` matched a file's path.
    #[error("no pipeline configured for this path")]
    NoPipelineMatch,

    /// bzip2 compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The pipeline declares encryption but no key material was supplied.
    #[error("object is encrypted but no key was provided")]
    MissingKey,

    /// Underlying authenticated-encryption failure.
    #[error(transparent)]
    Crypto(#[from] coffer_crypto::CryptoError),
}
