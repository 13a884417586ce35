//! Environment directory management.
//!
//! ```text
//! <env_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ log.0000000001    # Log files
//! └─ log.0000000002
//! ```
//!
//! The LOCK file ensures only one process appends to the log at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// An environment directory held under an exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct EnvDir {
    path: PathBuf,
    _lock_file: File,
}

impl EnvDir {
    /// Opens or creates an environment directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `EnvironmentLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::config(format!(
                    "environment directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        // Non-blocking: a second opener fails instead of waiting.
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::EnvironmentLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the environment directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
