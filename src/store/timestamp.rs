//! The persisted anti-replay counter.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::store::lock::FileLock;
use crate::utils::error::StoreError;

/// Highest accepted remote timestamp, stored as a single ASCII integer.
///
/// The guard only stores what it is given; ordering decisions belong to the caller.
#[derive(Debug, Clone)]
pub struct TimestampGuard {
    path: PathBuf,
    lock: FileLock,
}

impl TimestampGuard {
    /// Opens the counter file, creating it with `0` when absent.
    pub fn open(path: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        let guard = Self {
            lock: FileLock::for_file(&path, lock_timeout),
            path,
        };
        if !guard.path.exists() {
            guard.advance(0)?;
        }
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last(&self) -> Result<u64, StoreError> {
        let text = {
            let _guard = self.lock.acquire()?;
            match fs::read_to_string(&self.path) {
                Ok(text) => text,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(StoreError::io(&self.path, e)),
            }
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        match trimmed.parse() {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "timestamp unreadable, using 0");
                Ok(0)
            }
        }
    }

    pub fn advance(&self, value: u64) -> Result<u64, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let _guard = self.lock.acquire()?;
        fs::write(&self.path, value.to_string()).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(value)
    }
}
