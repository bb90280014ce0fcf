//! Chunked encode/decode through the transform stack declared in a
//! [`PipelineHeader`].
//!
//! Each chunk is compressed (if configured) and then encrypted (if
//! configured) independently, and framed with its own 4-byte big-endian
//! length prefix so a reader can walk the stream without knowing total
//! object size up front — the same reason streaming uploads to the object
//! store don't know their final size until `finish()`.

use std::io::{Read, Write};

use bzip2::Compression;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use coffer_crypto::{EncryptParams, KEY_LEN, StreamDecryptor, StreamEncryptor};
use tracing::trace;

use crate::error::PipelineError;
use crate::header::PipelineHeader;
use crate::transform::TransformKind;

fn compress_chunk(data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress_chunk(data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut decoder = BzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Encodes plaintext chunks into framed, transformed wire bytes.
pub struct PipelineEncoder {
    header: PipelineHeader,
    header_json: Vec<u8>,
    encryptor: Option<StreamEncryptor>,
}

impl PipelineEncoder {
    /// Builds an encoder for the given transform stack.
    ///
    /// `encrypt` must be `Some` iff `transforms` contains
    /// [`TransformKind::Encrypt`].
    pub fn new(
        transforms: &[TransformKind],
        chunk_size: u64,
        encrypt: Option<(EncryptParams, [u8; KEY_LEN])>,
    ) -> Result<Self, PipelineError> {
        let compress = transforms.contains(&TransformKind::Compress);
        let wants_encrypt = transforms.contains(&TransformKind::Encrypt);

        let (encrypt_params, encryptor) = match encrypt {
            Some((params, key)) if wants_encrypt => {
                (Some(params), Some(StreamEncryptor::new(&key)))
            }
            None if !wants_encrypt => (None, None),
            _ => return Err(PipelineError::MissingKey),
        };

        let header = PipelineHeader::new(chunk_size, compress, encrypt_params);
        let header_json = header.to_json()?;
        trace!(compress, encrypted = wants_encrypt, chunk_size, "built pipeline encoder");
        Ok(Self {
            header,
            header_json,
            encryptor,
        })
    }

    /// The wire-framed header; callers write this once, before any chunks.
    pub fn header_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        self.header.to_framed_bytes()
    }

    /// Transforms and frames one plaintext chunk. Set `last` on the final
    /// chunk of the object.
    pub fn encode_chunk(&mut self, plaintext: &[u8], last: bool) -> Result<Vec<u8>, PipelineError> {
        let transformed = if self.header.compress {
            compress_chunk(plaintext)?
        } else {
            plaintext.to_vec()
        };

        let transformed = if let Some(encryptor) = &mut self.encryptor {
            encryptor.encrypt_chunk(&transformed, &self.header_json, last)?
        } else {
            transformed
        };

        let mut framed = Vec::with_capacity(4 + transformed.len());
        framed.extend_from_slice(&(transformed.len() as u32).to_be_bytes());
        framed.extend_from_slice(&transformed);
        Ok(framed)
    }
}

/// Decodes framed, transformed wire bytes back into plaintext chunks.
pub struct PipelineDecoder {
    header: PipelineHeader,
    header_json: Vec<u8>,
    decryptor: Option<StreamDecryptor>,
}

impl PipelineDecoder {
    /// Parses the header from the start of `object_bytes` and builds a
    /// decoder. `key` must be supplied iff the header declares encryption.
    pub fn from_header(
        object_bytes: &[u8],
        key: Option<[u8; KEY_LEN]>,
    ) -> Result<(Self, usize), PipelineError> {
        let (header, consumed) = PipelineHeader::parse(object_bytes)?;
        let header_json = header.to_json()?;

        let decryptor = match (&header.encrypt, key) {
            (Some(_), Some(key)) => Some(StreamDecryptor::new(&key)),
            (None, _) => None,
            (Some(_), None) => return Err(PipelineError::MissingKey),
        };

        trace!(compress = header.compress, encrypted = header.encrypt.is_some(), "parsed pipeline header");
        Ok((
            Self {
                header,
                header_json,
                decryptor,
            },
            consumed,
        ))
    }

    /// The parsed header.
    #[must_use]
    pub fn header(&self) -> &PipelineHeader {
        &self.header
    }

    /// Reads one length-prefixed chunk from `remaining` and returns the
    /// decoded plaintext along with the number of bytes consumed from
    /// `remaining`.
    pub fn decode_chunk(&mut self, remaining: &[u8], last: bool) -> Result<(Vec<u8>, usize), PipelineError> {
        if remaining.len() < 4 {
            return Err(PipelineError::TruncatedChunk {
                expected: 4,
                actual: remaining.len(),
            });
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&remaining[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if remaining.len() < 4 + len {
            return Err(PipelineError::TruncatedChunk {
                expected: len,
                actual: remaining.len() - 4,
            });
        }
        let wire = &remaining[4..4 + len];

        let decrypted = if let Some(decryptor) = &mut self.decryptor {
            decryptor.decrypt_chunk(wire, &self.header_json, last)?
        } else {
            wire.to_vec()
        };

        let plaintext = if self.header.compress {
            decompress_chunk(&decrypted)?
        } else {
            decrypted
        };

        Ok((plaintext, 4 + len))
    }
}
