//! Lock-file backed mutual exclusion
//!
//! Two lock files are in play: one serializes process setup, the other
//! serializes output draining. Always take the process lock first.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// An advisory exclusive lock on a file shared by all transports
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Creates the lock file if it is missing. Never deletes it.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| lock_error(&path, e))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| lock_error(&path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the exclusive lock is held
    pub fn acquire(&self) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| lock_error(&self.path, e))?;
        file.lock_exclusive()
            .map_err(|e| lock_error(&self.path, e))?;
        debug!("Acquired lock {}", self.path.display());
        Ok(LockGuard {
            file,
            path: self.path.clone(),
        })
    }
}

/// Releases the lock when dropped, on every exit path
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released lock {}", self.path.display());
        }
    }
}

fn lock_error(path: &Path, e: std::io::Error) -> TransportError {
    TransportError::setup(format!("lock file {}: {}", path.display(), e))
}
