//! Self-describing pipeline header.
//!
//! Every object this crate writes begins with a 4-byte big-endian length
//! prefix followed by a JSON header. The header is re-serialised verbatim
//! and fed to the crypto layer as associated data, so tampering with either
//! the header or the ciphertext is detectable on read.

use coffer_crypto::EncryptParams;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Current header format version.
pub const HEADER_VERSION: u32 = 1;

/// Minimum chunk size, matching the object store's multipart lower bound.
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Describes which transforms were applied to an object's content, in the
/// order they were applied going out (compress, then encrypt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHeader {
    /// Header format version.
    #[serde(rename = "V")]
    pub version: u32,
    /// Chunk size used when streaming this object, in bytes.
    #[serde(rename = "S")]
    pub chunk_size: u64,
    /// Whether the content is bzip2-compressed.
    #[serde(rename = "C", default, skip_serializing_if = "std::ops::Not::not")]
    pub compress: bool,
    /// Encryption parameters, present iff the content is encrypted.
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<EncryptParams>,
}

impl PipelineHeader {
    /// Builds a header for a freshly-written object.
    #[must_use]
    pub fn new(chunk_size: u64, compress: bool, encrypt: Option<EncryptParams>) -> Self {
        Self {
            version: HEADER_VERSION,
            chunk_size,
            compress,
            encrypt,
        }
    }

    /// Serialises the header to its canonical JSON form. This exact byte
    /// string is also used as AEAD associated data, so callers must not
    /// re-serialise the header independently elsewhere.
    pub fn to_json(&self) -> Result<Vec<u8>, PipelineError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Wire-frames the header: a 4-byte big-endian length prefix followed by
    /// the JSON bytes.
    pub fn to_framed_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let json = self.to_json()?;
        let mut out = Vec::with_capacity(4 + json.len());
        out.extend_from_slice(&(json.len() as u32).to_be_bytes());
        out.extend_from_slice(&json);
        Ok(out)
    }

    /// Parses a header from the start of `bytes`, returning the header and
    /// the number of bytes consumed (the length prefix plus the JSON body).
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), PipelineError> {
        if bytes.len() < 4 {
            return Err(PipelineError::TruncatedHeader);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if bytes.len() < 4 + len {
            return Err(PipelineError::TruncatedHeader);
        }
        let header: Self = serde_json::from_slice(&bytes[4..4 + len])?;
        Ok((header, 4 + len))
    }
}
