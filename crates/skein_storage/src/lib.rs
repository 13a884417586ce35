//! # skein storage
//!
//! Byte-store backends and log directories for skein.
//!
//! A log is a set of numbered files living in a directory. This crate gives
//! the log layer two things and nothing more:
//!
//! - [`StorageBackend`]: one opaque, append-only byte store (a single log file)
//! - [`LogDirectory`]: the place log files are listed, created, opened and removed
//!
//! Backends never interpret the bytes they hold; framing, checksums and file
//! naming all belong to `skein_core`.
//!
//! ## Available implementations
//!
//! - [`FileBackend`] / [`FsDirectory`] - real files under a directory
//! - [`InMemoryBackend`] / [`MemoryDirectory`] - ephemeral, for tests and tools
//!
//! ## Example
//!
//! ```rust
//! use skein_storage::{LogDirectory, MemoryDirectory, StorageBackend};
//!
//! let dir = MemoryDirectory::new();
//! let mut file = dir.create("log.0000000001").unwrap();
//! let offset = file.append(b"hello world").unwrap();
//! assert_eq!(file.read_at(offset, 5).unwrap(), b"hello");
//! assert_eq!(dir.list().unwrap(), vec!["log.0000000001".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod directory;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use directory::{FsDirectory, LogDirectory, MemoryDirectory};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
