//! Composable content transform pipeline for backup objects.
//!
//! An object's pipeline is an ordered stack of transforms (currently
//! `compress` and `encrypt`) applied out-direction as compress-then-encrypt,
//! described by a self-describing [`PipelineHeader`] that doubles as AEAD
//! associated data. `hash_names` is handled separately since it rewrites the
//! storage key rather than the content.

pub mod codec;
pub mod error;
pub mod hash_names;
pub mod header;
pub mod transform;

pub use codec::{PipelineDecoder, PipelineEncoder};
pub use error::PipelineError;
pub use header::{HEADER_VERSION, MIN_CHUNK_SIZE, PipelineHeader};
pub use transform::TransformKind;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
