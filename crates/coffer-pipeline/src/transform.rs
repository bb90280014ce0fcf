//! The set of recognised content transforms.

use serde::{Deserialize, Serialize};

/// A single content transform, named the way `file_pipeline` configuration
/// entries name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// bzip2 compression.
    Compress,
    /// Authenticated encryption (see [`coffer_crypto`]).
    Encrypt,
    /// Storage-key hashing; orthogonal to content transforms, handled by the
    /// object-key layer rather than this crate's content codec.
    HashNames,
}

impl TransformKind {
    /// Parses a transform name as it appears in `file_pipeline` /
    /// `meta_pipeline` configuration lists.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "compress" => Some(Self::Compress),
            "encrypt" => Some(Self::Encrypt),
            "hash_names" => Some(Self::HashNames),
            _ => None,
        }
    }
}
