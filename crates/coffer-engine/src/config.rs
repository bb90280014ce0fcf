//! Engine configuration.
//!
//! This crate does not read a configuration file itself (that reader is an
//! external collaborator — building one is out of scope here); it owns
//! the in-memory [`Config`] type an embedder constructs, whether by
//! parsing a file, building one in a test, or composing one
//! programmatically in a service.

use std::path::PathBuf;

use coffer_pipeline::{MIN_CHUNK_SIZE, TransformKind};
use serde::{Deserialize, Serialize};

/// One `[glob, [transforms]]` entry of `file_pipeline`: the first entry
/// whose glob matches a file's path determines which transforms are
/// applied to its content on upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRule {
    pub glob: String,
    pub transforms: Vec<TransformKind>,
}

impl PipelineRule {
    #[must_use]
    pub fn new(glob: impl Into<String>, transforms: Vec<TransformKind>) -> Self {
        Self {
            glob: glob.into(),
            transforms,
        }
    }
}

/// Crypto-related sub-configuration, matching the reference
/// implementation's `config['crypto']` namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// The user's backup password. Never logged; not serialised back out
    /// (a `Config` round-tripped through JSON for display/audit purposes
    /// must not leak it).
    #[serde(default, skip_serializing)]
    pub crypt_password: Option<String>,

    /// Remote key storing the bootstrapped KDF salt.
    #[serde(default = "default_salt_file")]
    pub salt_file: String,
}

fn default_salt_file() -> String {
    "salt_file".to_string()
}

/// Every recognised engine option (§6). Constructed programmatically by
/// an embedder; this crate does not parse any file format into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local directory the engine backs up from / restores into.
    pub base_path: PathBuf,
    pub remote_manifest_diff_file: String,
    pub remote_gc_log_file: String,
    pub remote_garbage_object_log_file: String,
    pub remote_base_path: String,
    pub local_manifest_file: PathBuf,
    pub local_lock_file: PathBuf,
    /// Minimum 5 MiB, matching the object store's multipart lower bound.
    pub chunk_size: u64,
    pub read_only: bool,
    pub write_only: bool,
    pub allow_delete_versions: bool,
    pub meta_pipeline: Vec<TransformKind>,
    pub file_pipeline: Vec<PipelineRule>,
    pub ignore_files: Vec<String>,
    pub skip_delete: Vec<String>,
    pub visit_mountpoints: bool,
    /// 0 disables chunked sub-commits.
    pub split_chunk_size: usize,
    pub crypto: CryptoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            remote_manifest_diff_file: "manifest_diffs".to_string(),
            remote_gc_log_file: "gc_log".to_string(),
            remote_garbage_object_log_file: "garbage_objects".to_string(),
            remote_base_path: "files".to_string(),
            local_manifest_file: PathBuf::from("manifest"),
            local_lock_file: PathBuf::from("coffer.lock"),
            chunk_size: MIN_CHUNK_SIZE,
            read_only: false,
            write_only: false,
            allow_delete_versions: true,
            meta_pipeline: Vec::new(),
            file_pipeline: vec![PipelineRule::new("*", Vec::new())],
            ignore_files: Vec::new(),
            skip_delete: Vec::new(),
            visit_mountpoints: true,
            split_chunk_size: 0,
            crypto: CryptoConfig {
                crypt_password: None,
                salt_file: default_salt_file(),
            },
        }
    }
}

impl Config {
    /// Starts a builder seeded with defaults, for the common case of
    /// overriding just a few fields. `local_manifest_file` and
    /// `local_lock_file` default to living inside `base_path` itself —
    /// override either explicitly to keep engine state outside the tree
    /// being backed up.
    #[must_use]
    pub fn builder(base_path: impl Into<PathBuf>) -> ConfigBuilder {
        let base_path = base_path.into();
        let defaults = Self::default();
        ConfigBuilder {
            config: Self {
                local_manifest_file: base_path.join(&defaults.local_manifest_file),
                local_lock_file: base_path.join(&defaults.local_lock_file),
                base_path,
                ..defaults
            },
        }
    }

    /// Whether this engine may delete remote object versions: requires
    /// `allow_delete_versions` and not `read_only`. This is the
    /// permission predicate that governs garbage collection deletion and
    /// `clean_gc_log`'s refusal check — see the note on the original
    /// implementation's inverted predicate in `DESIGN.md`.
    #[must_use]
    pub fn may_delete_versions(&self) -> bool {
        self.allow_delete_versions && !self.read_only
    }

    /// Finds the first `file_pipeline` rule whose glob matches `path`.
    #[must_use]
    pub fn pipeline_for(&self, path: &str) -> Option<&[TransformKind]> {
        self.file_pipeline.iter().find_map(|rule| {
            globset::Glob::new(&rule.glob)
                .ok()
                .map(|g| g.compile_matcher())
                .filter(|m| m.is_match(path))
                .map(|_| rule.transforms.as_slice())
        })
    }
}

/// Builder for [`Config`], for overriding a handful of fields over the
/// defaults without repeating every field name.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    #[must_use]
    pub fn write_only(mut self, write_only: bool) -> Self {
        self.config.write_only = write_only;
        self
    }

    #[must_use]
    pub fn allow_delete_versions(mut self, allow: bool) -> Self {
        self.config.allow_delete_versions = allow;
        self
    }

    #[must_use]
    pub fn file_pipeline(mut self, rules: Vec<PipelineRule>) -> Self {
        self.config.file_pipeline = rules;
        self
    }

    #[must_use]
    pub fn meta_pipeline(mut self, transforms: Vec<TransformKind>) -> Self {
        self.config.meta_pipeline = transforms;
        self
    }

    #[must_use]
    pub fn ignore_files(mut self, globs: Vec<String>) -> Self {
        self.config.ignore_files = globs;
        self
    }

    #[must_use]
    pub fn skip_delete(mut self, globs: Vec<String>) -> Self {
        self.config.skip_delete = globs;
        self
    }

    #[must_use]
    pub fn visit_mountpoints(mut self, visit: bool) -> Self {
        self.config.visit_mountpoints = visit;
        self
    }

    #[must_use]
    pub fn split_chunk_size(mut self, size: usize) -> Self {
        self.config.split_chunk_size = size;
        self
    }

    #[must_use]
    pub fn crypt_password(mut self, password: impl Into<String>) -> Self {
        self.config.crypto.crypt_password = Some(password.into());
        self
    }

    #[must_use]
    pub fn local_manifest_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_manifest_file = path.into();
        self
    }

    #[must_use]
    pub fn local_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_lock_file = path.into();
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}
