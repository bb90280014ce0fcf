//! Password-derived authenticated encryption for backup objects.
//!
//! This crate provides:
//! - Argon2i key derivation from a user password and a remotely-stored salt
//! - Streaming `XChaCha20Poly1305` encryption/decryption bound to a
//!   caller-supplied associated-data string (the serialised pipeline header)

pub mod error;
pub mod kdf;
pub mod stream;

pub use error::CryptoError;
pub use kdf::{EncryptParams, KEY_LEN, SALT_LEN, generate_salt};
pub use stream::{STREAM_HEADER_LEN, StreamDecryptor, StreamEncryptor};

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
