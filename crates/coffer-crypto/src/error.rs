//! Error types for coffer-crypto operations.

use thiserror::Error;

/// Errors that can occur during crypto operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The supplied password was empty.
    #[error("password must not be empty")]
    EmptyPassword,

    /// Key derivation (Argon2i) failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The salt stored remotely had an unexpected length.
    #[error("invalid salt length: expected {expected}, got {actual}")]
    InvalidSaltLength { expected: usize, actual: usize },

    /// Authenticated decryption failed (wrong key, tampered ciphertext, or
    /// tampered associated data).
    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// Authenticated encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The object was too short to contain a stream header.
    #[error("ciphertext is shorter than the stream header ({0} bytes)")]
    TruncatedStreamHeader(usize),

    /// The pipeline header carried unrecognised or malformed encrypt params.
    #[error("invalid encrypt parameters: {0}")]
    InvalidEncryptParams(String),
}
