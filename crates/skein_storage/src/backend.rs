//! Storage backend trait definition.

use crate::error::StorageResult;

/// A single append-only byte store, typically one log file.
///
/// Backends are **opaque**: the log layer owns record framing and file
/// headers, the backend only moves bytes.
///
/// # Invariants
///
/// - `append` writes at the current end and returns the offset it wrote at
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - `flush` hands appended bytes to the operating system
/// - `sync` makes them (and the file length) durable
/// - Several handles may be open on the same file; a reader handle observes
///   bytes appended through another handle once they were flushed
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range extends past the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns the offset written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes appended data to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all appended data and the file metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the store down to `new_size` bytes.
    ///
    /// Used to discard a torn tail left by a crash in the middle of a write.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
