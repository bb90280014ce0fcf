//! Single-host advisory locking for the commit engine.
//!
//! Exactly one commit may run at a time against a given local repository.
//! The lock is a non-blocking exclusive `flock` on a sentinel file, taken
//! via `fs4`; a second concurrent invocation fails immediately with
//! [`EngineError::Locked`] rather than queuing.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::debug;

use crate::error::EngineError;

/// A held advisory lock on `local_lock_file`. Dropping it (or calling
/// [`Self::release`] for the explicit, logged form) unlocks and removes
/// the sentinel file.
pub struct CommitLock {
    path: PathBuf,
    file: Option<File>,
}

impl CommitLock {
    /// Attempts to take the lock, failing immediately (never blocking) if
    /// another process already holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(EngineError::Io)?;

        if !file.try_lock_exclusive().map_err(EngineError::Io)? {
            return Err(EngineError::Locked);
        }
        debug!(?path, "acquired commit lock");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Releases the lock and removes the sentinel file. Equivalent to
    /// dropping the guard, but lets the caller observe I/O errors from the
    /// cleanup rather than swallowing them.
    pub fn release(mut self) -> Result<(), EngineError> {
        self.unlock_and_remove()
    }

    fn unlock_and_remove(&mut self) -> Result<(), EngineError> {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
            drop(file);
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for CommitLock {
    fn drop(&mut self) {
        let _ = self.unlock_and_remove();
    }
}

#[must_use]
pub fn default_lock_path(base: &Path) -> PathBuf {
    base.join("coffer.lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_file_fails_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let _first = CommitLock::acquire(&path).unwrap();
        let second = CommitLock::acquire(&path);
        assert!(matches!(second, Err(EngineError::Locked)));
    }

    #[test]
    fn releasing_allows_reacquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let first = CommitLock::acquire(&path).unwrap();
        first.release().unwrap();
        assert!(CommitLock::acquire(&path).is_ok());
    }

    #[test]
    fn dropping_also_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        {
            let _guard = CommitLock::acquire(&path).unwrap();
        }
        assert!(CommitLock::acquire(&path).is_ok());
    }
}
