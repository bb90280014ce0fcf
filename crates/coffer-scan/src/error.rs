//! Error types for coffer-scan operations.

use thiserror::Error;

/// Errors that can occur while scanning or hashing a local tree.
#[derive(Error, Debug)]
pub enum ScanError {
    /// An ignore glob pattern could not be compiled.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Underlying I/O failure while hashing a file's contents.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
