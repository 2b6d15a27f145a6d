//! Workspace file locking.
//!
//! One daemon per workspace: an exclusive OS file lock on
//! `.beads/daemon.lock`, held for the daemon's lifetime and released on
//! drop. Acquisition retries briefly so a daemon restarting right after its
//! predecessor exits does not flake.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

/// Lock file name inside `.beads/`.
pub const LOCK_FILE_NAME: &str = "daemon.lock";

/// How long acquisition retries before giving up.
const ACQUIRE_DEADLINE: Duration = Duration::from_secs(2);

/// Delay between acquisition attempts.
const ACQUIRE_RETRY: Duration = Duration::from_millis(100);

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Another process holds the lock.
    #[error("workspace is locked by another process (lock file: {path})")]
    Held { path: PathBuf },
}

/// An exclusive lock on a workspace.
///
/// The OS lock is released when this value is dropped (or the process
/// exits, cleanly or not).
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Acquires the workspace lock inside the given `.beads/` directory,
    /// retrying briefly on contention.
    pub fn acquire(beads_dir: &Path) -> Result<Self, LockError> {
        let path = beads_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self { file, path });
                }
                Err(_) if start.elapsed() < ACQUIRE_DEADLINE => {
                    std::thread::sleep(ACQUIRE_RETRY);
                }
                Err(_) => return Err(LockError::Held { path }),
            }
        }
    }

    /// Attempts to acquire without retrying. Used by status probes.
    pub fn try_acquire(beads_dir: &Path) -> Result<Self, LockError> {
        let path = beads_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| LockError::Held { path: path.clone() })?;
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
