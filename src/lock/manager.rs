//! Lock Manager
//!
//! Directory-scoped shared/exclusive locks with optional timeouts.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::StockroomError;

/// Longest sleep between cross-process lock attempts
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Lock flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Arbitrates access to one storage directory
#[derive(Debug)]
pub struct LockManager {
    /// The advisory lock target (never deleted)
    path: PathBuf,

    /// In-process layer
    local: RwLock<()>,
}

/// Held while reading; any number may coexist
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SharedGuard<'a> {
    _local: RwLockReadGuard<'a, ()>,
    file: File,
}

/// Held while mutating; excludes every other holder
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    _local: RwLockWriteGuard<'a, ()>,
    file: File,
}

impl LockManager {
    /// Create the lock target if needed
    pub fn open(path: &Path) -> Result<Self> {
        OpenOptions::new().create(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            local: RwLock::new(()),
        })
    }

    /// Acquire a shared (read) lock
    pub fn acquire_shared(&self, timeout: Option<Duration>) -> Result<SharedGuard<'_>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let local = match timeout {
            Some(t) => self
                .local
                .try_read_for(t)
                .ok_or(StockroomError::LockTimeout(t))?,
            None => self.local.read(),
        };
        let file = self.lock_file(LockMode::Shared, deadline, timeout)?;
        tracing::trace!("shared lock acquired");
        Ok(SharedGuard {
            _local: local,
            file,
        })
    }

    /// Acquire an exclusive (write) lock
    pub fn acquire_exclusive(&self, timeout: Option<Duration>) -> Result<ExclusiveGuard<'_>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let local = match timeout {
            Some(t) => self
                .local
                .try_write_for(t)
                .ok_or(StockroomError::LockTimeout(t))?,
            None => self.local.write(),
        };
        let file = self.lock_file(LockMode::Exclusive, deadline, timeout)?;
        tracing::trace!("exclusive lock acquired");
        Ok(ExclusiveGuard {
            _local: local,
            file,
        })
    }

    /// Path of the lock target
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Open a fresh handle and flock it
    ///
    /// Each acquisition gets its own open file description, so locks taken
    /// by different threads of this process conflict with each other the
    /// same way locks from different processes do.
    fn lock_file(
        &self,
        mode: LockMode,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<File> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        let deadline = match (deadline, timeout) {
            (Some(deadline), Some(timeout)) => (deadline, timeout),
            _ => {
                match mode {
                    LockMode::Shared => FileExt::lock_shared(&file)?,
                    LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
                }
                return Ok(file);
            }
        };

        let contended = fs2::lock_contended_error().raw_os_error();
        let mut backoff = Duration::from_millis(1);
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => return Ok(file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.raw_os_error() == contended => {}
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline.0 {
                return Err(StockroomError::LockTimeout(deadline.1));
            }
            thread::sleep(backoff.min(deadline.0 - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

fn release(file: &File) {
    if let Err(e) = FileExt::unlock(file) {
        // Closing the handle right after drops the lock regardless
        tracing::warn!(error = %e, "failed to unlock store lock file");
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        release(&self.file);
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        release(&self.file);
    }
}
