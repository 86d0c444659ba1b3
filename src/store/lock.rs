//! Advisory locking for files shared with other processes.
//!
//! The lock lives in a sibling `<path>.lock` file and is taken with an
//! exclusive, non-blocking OS lock on its descriptor. Acquisition polls until
//! the lock is free or the timeout elapses; the lock is released when the
//! guard is dropped and the descriptor closed.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::utils::error::StoreError;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
}

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
}

impl FileLock {
    /// A lock guarding `target`, stored next to it as `<target>.lock`.
    pub fn for_file(target: &Path, timeout: Duration) -> Self {
        let mut name = target.as_os_str().to_owned();
        name.push(".lock");
        Self {
            path: PathBuf::from(name),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocks until the lock is taken or fails with `LockTimeout`.
    pub fn acquire(&self) -> Result<LockGuard, StoreError> {
        let start = Instant::now();
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(StoreError::LockTimeout {
                    path: self.path.clone(),
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Single non-blocking attempt. `Ok(None)` means another holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        match file.try_lock() {
            Ok(()) => Ok(Some(LockGuard { _file: file })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(StoreError::io(&self.path, e)),
        }
    }
}
