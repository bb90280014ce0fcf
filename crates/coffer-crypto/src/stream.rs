//! Streaming authenticated encryption over `XChaCha20Poly1305`.
//!
//! Each object gets a random 24-byte stream header generated once. Per-chunk
//! nonces are derived from that header and a monotonically increasing
//! counter, with the final chunk's counter bytes flagged so truncation is
//! detectable on decrypt (dropping the last chunk changes which nonce would
//! be needed to authenticate a "final" chunk, so a truncated stream fails
//! rather than silently decrypting as if it ended early).

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use tracing::warn;

use crate::error::CryptoError;
use crate::kdf::KEY_LEN;

/// Length in bytes of the per-object stream header.
pub const STREAM_HEADER_LEN: usize = 24;

const FINAL_FLAG: u8 = 0x80;

fn derive_nonce(header: &[u8; STREAM_HEADER_LEN], counter: u64, last: bool) -> XNonce {
    let mut nonce = *header;
    let counter_bytes = counter.to_be_bytes();
    for (n, c) in nonce[16..24].iter_mut().zip(counter_bytes.iter()) {
        *n ^= c;
    }
    if last {
        nonce[16] |= FINAL_FLAG;
    }
    XNonce::from(nonce)
}

/// Encrypts a stream of plaintext chunks, prepending a fresh random header
/// to the first emitted chunk.
pub struct StreamEncryptor {
    cipher: XChaCha20Poly1305,
    header: [u8; STREAM_HEADER_LEN],
    counter: u64,
    header_emitted: bool,
}

impl StreamEncryptor {
    /// Starts a new encryption stream under `key`.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let mut header = [0u8; STREAM_HEADER_LEN];
        rand::rng().fill_bytes(&mut header);
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
            header,
            counter: 0,
            header_emitted: false,
        }
    }

    /// Encrypts one chunk. `associated_data` is the serialised pipeline
    /// header string, bound into every chunk's authentication tag. Set
    /// `last` on the final chunk of the stream.
    ///
    /// Returns the bytes to write to the object: the stream header (only on
    /// the very first call) followed by the chunk's ciphertext and tag.
    pub fn encrypt_chunk(
        &mut self,
        plaintext: &[u8],
        associated_data: &[u8],
        last: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = derive_nonce(&self.header, self.counter, last);
        self.counter += 1;
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(STREAM_HEADER_LEN + ciphertext.len());
        if !self.header_emitted {
            out.extend_from_slice(&self.header);
            self.header_emitted = true;
        }
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Decrypts a stream of ciphertext chunks previously produced by
/// [`StreamEncryptor`].
pub struct StreamDecryptor {
    cipher: XChaCha20Poly1305,
    header: [u8; STREAM_HEADER_LEN],
    header_consumed: bool,
    counter: u64,
}

impl StreamDecryptor {
    /// Starts a new decryption stream under `key`. The stream header must be
    /// supplied via the first call to [`Self::decrypt_chunk`], which expects
    /// it prepended to the ciphertext exactly as [`StreamEncryptor`] emitted
    /// it.
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
            header: [0u8; STREAM_HEADER_LEN],
            header_consumed: false,
            counter: 0,
        }
    }

    /// Decrypts one chunk of wire bytes, which on the first call must be
    /// prefixed with the 24-byte stream header.
    pub fn decrypt_chunk(
        &mut self,
        wire_bytes: &[u8],
        associated_data: &[u8],
        last: bool,
    ) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = if self.header_consumed {
            wire_bytes
        } else {
            if wire_bytes.len() < STREAM_HEADER_LEN {
                return Err(CryptoError::TruncatedStreamHeader(wire_bytes.len()));
            }
            self.header.copy_from_slice(&wire_bytes[..STREAM_HEADER_LEN]);
            self.header_consumed = true;
            &wire_bytes[STREAM_HEADER_LEN..]
        };

        let nonce = derive_nonce(&self.header, self.counter, last);
        self.counter += 1;
        self.cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| {
                warn!(counter = self.counter - 1, "authentication tag mismatch while decrypting chunk");
                CryptoError::DecryptionFailed
            })
    }
}
