//! Log directories: where a log's numbered files live.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A flat namespace of files holding one log.
///
/// The log layer decides the naming scheme; a directory only stores, lists
/// and removes files by plain name (no separators).
pub trait LogDirectory: Send + Sync + fmt::Debug {
    /// Lists the names of all files in the directory, unsorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Opens an existing file; `Ok(None)` if there is no such file.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the file exists but cannot
    /// be opened.
    fn open(&self, name: &str) -> StorageResult<Option<Box<dyn StorageBackend>>>;

    /// Creates an empty file, replacing any file of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the file cannot be created.
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Removes a file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    fn remove(&self, name: &str) -> StorageResult<()>;

    /// Makes file creations and removals durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be synced.
    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Returns the file-system path of a file, if the directory has one.
    fn path_of(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

fn check_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A log directory on the file system.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Opens `root`, creating it (and its parents) if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, or `root` exists
    /// and is not a directory.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a directory: {}", root.display()),
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LogDirectory for FsDirectory {
    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn open(&self, name: &str) -> StorageResult<Option<Box<dyn StorageBackend>>> {
        check_name(name)?;
        let path = self.root.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(FileBackend::open(&path)?)))
    }

    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        check_name(name)?;
        Ok(Box::new(FileBackend::create(&self.root.join(name))?))
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        check_name(name)?;
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync(&self) -> StorageResult<()> {
        fs::File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    fn path_of(&self, name: &str) -> Option<PathBuf> {
        Some(self.root.join(name))
    }
}

/// A log directory held in memory.
///
/// Every handle returned for a name shares the same bytes, so a file written
/// through one handle can be reopened and read through another.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    files: RwLock<BTreeMap<String, InMemoryBackend>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a shared handle to a file, for inspection or damage in tests.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<InMemoryBackend> {
        self.files.read().get(name).cloned()
    }

    /// Installs a file with the given contents, replacing any existing one.
    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.files
            .write()
            .insert(name.to_string(), InMemoryBackend::with_data(data));
    }
}

impl LogDirectory for MemoryDirectory {
    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn open(&self, name: &str) -> StorageResult<Option<Box<dyn StorageBackend>>> {
        check_name(name)?;
        Ok(self
            .files
            .read()
            .get(name)
            .map(|file| Box::new(file.clone()) as Box<dyn StorageBackend>))
    }

    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        check_name(name)?;
        let file = InMemoryBackend::new();
        self.files.write().insert(name.to_string(), file.clone());
        Ok(Box::new(file))
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        check_name(name)?;
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}
