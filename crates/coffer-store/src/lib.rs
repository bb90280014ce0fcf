//! The versioned object-store adapter contract, plus a local-filesystem
//! reference implementation.

pub mod error;
pub mod local;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use local::LocalStore;
pub use traits::{MultipartUpload, ObjectStore};
pub use types::{GetResult, ObjectMeta, ObjectVersion, PutResult};

/// Result type for object-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
