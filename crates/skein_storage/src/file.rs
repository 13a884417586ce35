//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A log file on disk.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_data()`, which is what a write-ahead log
///   needs: the appended bytes and the new length
///
/// # Readers and writers
///
/// The log keeps one handle for appending and cursors open their own read
/// handles. A read handle caches the file length; when a read reaches past
/// it, the length is re-read from the file system before giving up, so a
/// reader sees whatever the writer has flushed since.
///
/// # Example
///
/// ```no_run
/// use skein_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("log.0000000001")).unwrap();
/// let offset = backend.append(b"record bytes").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens an existing file for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(path, file)
    }

    /// Creates a new empty file, truncating any existing file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the length from the file system.
    fn refresh_size(&self) -> StorageResult<u64> {
        let len = self.file.lock().metadata()?.len();
        let mut size = self.size.write();
        *size = len;
        Ok(len)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        let mut size = *self.size.read();
        if end > size {
            size = self.refresh_size()?;
            if end > size {
                return Err(StorageError::ReadPastEnd { offset, len, size });
            }
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut size = self.size.write();
        if data.is_empty() {
            return Ok(*size);
        }

        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size = offset + data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        self.refresh_size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut size = self.size.write();
        let file = self.file.lock();
        let current = file.metadata()?.len();
        if new_size > current {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: current,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }
}
