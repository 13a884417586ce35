//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the store.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A truncate asked to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds only {size}")]
    TruncateBeyondEnd {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// A name handed to a directory is not a plain file name.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// The named file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),
}

impl StorageError {
    /// Returns true if this error reports a read past the end of the store.
    #[must_use]
    pub fn is_read_past_end(&self) -> bool {
        matches!(self, Self::ReadPastEnd { .. })
    }
}
