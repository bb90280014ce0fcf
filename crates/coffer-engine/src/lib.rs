//! The commit engine, restore engine, and garbage collector: the core
//! orchestration of the backup system this workspace implements.
//!
//! This crate owns orchestration only. It depends on `coffer-scan` for
//! tree walking and change detection, `coffer-manifest` for the diff-fold
//! algebra and local/remote reconciliation, `coffer-pipeline` and
//! `coffer-crypto` for the wire codec, and `coffer-store` for the
//! versioned-object-store contract — one concrete [`coffer_store::LocalStore`]
//! ships for tests, real adapters are external collaborators built
//! against [`coffer_store::ObjectStore`].

pub mod commit;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod gc;
pub mod lock;
pub mod naming;
pub mod reader;
pub mod restore;
pub mod upload;

pub use commit::{CommitOutcome, commit};
pub use config::{Config, ConfigBuilder, CryptoConfig, PipelineRule};
pub use context::EngineContext;
pub use error::EngineError;
pub use gc::{GcLogEntry, GcMode, GcOutcome, clean_gc_log, garbage_collect};
pub use lock::{CommitLock, default_lock_path};
pub use restore::{RestoreOutcome, SnapshotInfo, list_snapshots, restore};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
