//! Write-ahead log.
//!
//! The log is an append-only sequence of checksummed records addressed by
//! [`Lsn`](crate::Lsn) (file number, byte offset). It is split across files
//! named `log.NNNNNNNNNN`, each starting with a file-header record.
//!
//! - [`record`]: record framing and verification
//! - [`files`]: file naming, headers and validation
//! - [`buffer`]: the in-memory ring in front of the current file
//! - [`manager`]: appends, flushing, file switching and reclamation
//! - [`cursor`]: reading records forward and backward
//!
//! ## Damage on open
//!
//! Only the last file is examined when the log is opened:
//!
//! - bytes after the last intact record are cut off
//! - a last file with an empty or all-zero header is re-initialized
//! - a last file with a damaged header is reported as corruption
//! - a last file from an older version is kept and a new file started

pub mod buffer;
pub mod cursor;
pub mod files;
pub mod manager;
pub mod record;

pub use buffer::LogBuffer;
pub use cursor::{CursorOp, LogCursor, LogRecord};
pub use files::{
    file_name, parse_file_name, FileCheck, FileHeader, FileScan, FileValidity, FindTarget,
    LogFileManager, HEADER_RECORD_LEN, LOG_MAGIC, LOG_OLDEST_READABLE, LOG_VERSION,
};
pub use manager::{ActiveHorizon, LogManager, LogOptions, RegionRead};
pub use record::{RecordCodec, RecordHeader, RecordPrefix, RecordType, SealedRecord};
