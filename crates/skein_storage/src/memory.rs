//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory byte store.
///
/// Handles are cheap clones sharing the same bytes, which is how a
/// [`MemoryDirectory`](crate::MemoryDirectory) hands out several handles to
/// one file: whatever one handle appends, the others read.
///
/// # Example
///
/// ```rust
/// use skein_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `data`, useful to stage damaged files in tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all bytes held.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites bytes in place, starting at `offset`.
    ///
    /// Log files are append-only; this exists so tests and fault-injection
    /// helpers can flip bits in a file that was already written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the range is not fully inside
    /// the store.
    pub fn overwrite(&self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(bytes.len());
        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd {
                offset,
                len: bytes.len(),
                size,
            });
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn clones_share_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"shared").unwrap();
        assert_eq!(reader.read_at(0, 6).unwrap(), b"shared");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn overwrite_in_place() {
        let backend = InMemoryBackend::with_data(b"abcdef".to_vec());
        backend.overwrite(2, b"XY").unwrap();
        assert_eq!(backend.data(), b"abXYef");
        assert!(backend.overwrite(5, b"long").is_err());
    }

    #[test]
    fn truncate_partial_and_beyond() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");
        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }
}
