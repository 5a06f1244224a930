//! Exclusive marker file held for the duration of a sync

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SyncError;

/// Removes the lock file when dropped, including on early returns and panics
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
}

impl SyncLock {
    /// Create the lock file, failing with [`SyncError::AlreadySyncing`] if it exists.
    ///
    /// There is no staleness check: a lock left by a crashed process must be
    /// removed by hand.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with(path, |file| {
            writeln!(file, "{} pid={}", Local::now().to_rfc3339(), std::process::id())
        })
    }

    fn acquire_with<F>(path: &Path, stamp: F) -> Result<Self>
    where
        F: FnOnce(&mut File) -> std::io::Result<()>,
    {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SyncError::AlreadySyncing(path.to_path_buf()).into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create lock file {}", path.display()));
            }
        };

        // Owned from here on, so a failed write still removes the file
        let lock = Self {
            path: path.to_path_buf(),
        };
        stamp(&mut file).context("Failed to write lock file")?;

        debug!("Acquired sync lock {}", path.display());
        Ok(lock)
    }

    pub fn is_held(path: &Path) -> bool {
        path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released sync lock {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove lock file {}: {}", self.path.display(), e),
        }
    }
}
