//! Log file naming, creation and validation.
//!
//! A log is a run of files named `log.NNNNNNNNNN` (ten-digit sequence
//! number, starting at 1) in a [`LogDirectory`]. Every file starts with a
//! file-header record whose payload is
//!
//! ```text
//! | magic (4) | version (4) | log_size (4) | mode (4) | creation_mode (4) |
//! ```
//!
//! File-header records are always framed in the clear, so a file can be
//! classified without the environment's key. A header record's `prev_lsn`
//! names the last checkpoint record written before its file was begun, so
//! the newest checkpoint is found by scanning the last file alone.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{RecordCodec, RecordPrefix, RecordType, PREFIX_LEN};
use crate::types::{Lsn, TxnId};
use skein_storage::{LogDirectory, StorageBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic number stored in every file header ("SKLG").
pub const LOG_MAGIC: u32 = 0x534b_4c47;

/// Current log format version.
pub const LOG_VERSION: u32 = 3;

/// Oldest version whose records this build can still read.
pub const LOG_OLDEST_READABLE: u32 = 2;

/// File-header mode bit: records in this file are encrypted.
pub const MODE_ENCRYPTED: u32 = 0x1;

const FILE_HEADER_PAYLOAD_LEN: usize = 20;

/// Length of the file-header record at offset 0 of every file.
pub const HEADER_RECORD_LEN: usize = PREFIX_LEN + 4 + FILE_HEADER_PAYLOAD_LEN;

const FILE_NAME_PREFIX: &str = "log.";
const FILE_NAME_DIGITS: usize = 10;

/// Returns the name of log file `seq`.
#[must_use]
pub fn file_name(seq: u32) -> String {
    format!("{FILE_NAME_PREFIX}{seq:010}")
}

/// Parses a log file name, returning its sequence number.
#[must_use]
pub fn parse_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(FILE_NAME_PREFIX)?;
    if digits.len() != FILE_NAME_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|seq| *seq > 0)
}

/// Persistent header of a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Must be [`LOG_MAGIC`].
    pub magic: u32,
    /// Format version the file was written with.
    pub version: u32,
    /// Size limit the file was created with.
    pub log_size: u32,
    /// Mode bits ([`MODE_ENCRYPTED`]).
    pub mode: u32,
    /// Unix permission bits requested for the file.
    pub creation_mode: u32,
}

impl FileHeader {
    /// A current-version header.
    #[must_use]
    pub const fn new(log_size: u32, encrypted: bool, creation_mode: u32) -> Self {
        Self {
            magic: LOG_MAGIC,
            version: LOG_VERSION,
            log_size,
            mode: if encrypted { MODE_ENCRYPTED } else { 0 },
            creation_mode,
        }
    }

    /// Returns true if the file's records are encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.mode & MODE_ENCRYPTED != 0
    }

    /// Encodes the header payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FILE_HEADER_PAYLOAD_LEN);
        for field in [
            self.magic,
            self.version,
            self.log_size,
            self.mode,
            self.creation_mode,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Decodes a header payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] if the payload has the wrong size.
    pub fn decode(lsn: Lsn, payload: &[u8]) -> CoreResult<Self> {
        if payload.len() != FILE_HEADER_PAYLOAD_LEN {
            return Err(CoreError::corruption(
                lsn,
                format!("file header payload is {} bytes", payload.len()),
            ));
        }
        let field = |i: usize| {
            let at = i * 4;
            u32::from_le_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
        };
        Ok(Self {
            magic: field(0),
            version: field(1),
            log_size: field(2),
            mode: field(3),
            creation_mode: field(4),
        })
    }
}

/// Classification of a log file by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileValidity {
    /// Current version.
    Normal,
    /// Older version whose records can still be read.
    OldReadable,
    /// Older version that cannot be read.
    OldUnreadable,
    /// Header missing, short, or damaged.
    Incomplete,
    /// No such file.
    Nonexistent,
}

impl FileValidity {
    /// Returns true if records in the file can be read.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Normal | Self::OldReadable)
    }
}

/// Which end of the log [`LogFileManager::find`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindTarget {
    /// Lowest-numbered file.
    First,
    /// Highest-numbered file.
    Last,
}

/// Result of checking a file's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCheck {
    /// Classification.
    pub validity: FileValidity,
    /// The header, if it decoded.
    pub header: Option<FileHeader>,
    /// The header region is shorter than a header record or all zero,
    /// as left by a crash between creating a file and writing its header.
    pub blank: bool,
    /// Last checkpoint record before the file, ZERO if none or unknown.
    pub checkpoint: Lsn,
}

/// Result of walking every record of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileScan {
    /// File sequence number.
    pub seq: u32,
    /// Header classification.
    pub check: FileCheck,
    /// Bytes in the file.
    pub size: u64,
    /// Offset just past the last intact record.
    pub end: u64,
    /// Offset of the last intact record (0 if only the header is intact).
    pub last_record: u32,
    /// Intact records after the header.
    pub records: u64,
    /// Why the walk stopped before the end of the file, if it did.
    pub damage: Option<String>,
    /// Last intact checkpoint record in the file, or the one named by its
    /// header.
    pub last_checkpoint: Lsn,
}

impl FileScan {
    /// Returns true if bytes follow the last intact record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.check.validity.is_readable() && self.end < self.size
    }
}

/// Names, creates, validates and removes the files of one log.
#[derive(Debug, Clone)]
pub struct LogFileManager {
    dir: Arc<dyn LogDirectory>,
    codec: Arc<RecordCodec>,
}

impl LogFileManager {
    /// Creates a manager over `dir`.
    pub fn new(dir: Arc<dyn LogDirectory>, codec: Arc<RecordCodec>) -> Self {
        Self { dir, codec }
    }

    /// The directory holding the files.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn LogDirectory> {
        &self.dir
    }

    /// Lists log file sequence numbers in ascending order, ignoring other
    /// files in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn list(&self) -> CoreResult<Vec<u32>> {
        let mut seqs: Vec<u32> = self
            .dir
            .list()?
            .iter()
            .filter_map(|name| parse_file_name(name))
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Finds the first or last log file and classifies it.
    ///
    /// Returns `(0, Nonexistent)` if the directory holds no log files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or the file's
    /// version is newer than this build supports.
    pub fn find(&self, target: FindTarget) -> CoreResult<(u32, FileValidity)> {
        let seqs = self.list()?;
        let seq = match target {
            FindTarget::First => seqs.first(),
            FindTarget::Last => seqs.last(),
        };
        match seq {
            Some(&seq) => Ok((seq, self.validate(seq)?)),
            None => Ok((0, FileValidity::Nonexistent)),
        }
    }

    /// Classifies file `seq` by its header.
    ///
    /// # Errors
    ///
    /// See [`LogFileManager::check`].
    pub fn validate(&self, seq: u32) -> CoreResult<FileValidity> {
        Ok(self.check(seq)?.validity)
    }

    /// Reads and checks file `seq`'s header record.
    ///
    /// Damage is reported as [`FileValidity::Incomplete`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if the file was written by a newer
    /// version or with a different encryption setting, and an error if the
    /// file cannot be read.
    pub fn check(&self, seq: u32) -> CoreResult<FileCheck> {
        let Some(file) = self.open(seq)? else {
            return Ok(FileCheck {
                validity: FileValidity::Nonexistent,
                header: None,
                blank: false,
                checkpoint: Lsn::ZERO,
            });
        };
        let incomplete = |blank| FileCheck {
            validity: FileValidity::Incomplete,
            header: None,
            blank,
            checkpoint: Lsn::ZERO,
        };

        let size = file.size()?;
        if size < HEADER_RECORD_LEN as u64 {
            debug!(seq, size, "log file shorter than its header");
            return Ok(incomplete(true));
        }
        let bytes = file.read_at(0, HEADER_RECORD_LEN)?;
        if bytes.iter().all(|b| *b == 0) {
            return Ok(incomplete(true));
        }

        let lsn = Lsn::new(seq, 0);
        let mut checkpoint = Lsn::ZERO;
        let header = match self.codec.decode(lsn, &bytes) {
            Ok((header, payload)) if header.rectype == RecordType::FileHeader => {
                checkpoint = header.prev_lsn;
                FileHeader::decode(lsn, &payload)
            }
            Ok((header, _)) => Err(CoreError::corruption(
                lsn,
                format!("first record is {}", header.rectype.name()),
            )),
            Err(e) => Err(e),
        };
        let header = match header {
            Ok(header) => header,
            Err(e) => {
                warn!(seq, error = %e, "log file header is damaged");
                return Ok(incomplete(false));
            }
        };
        if header.magic != LOG_MAGIC {
            warn!(seq, magic = header.magic, "log file has the wrong magic number");
            return Ok(incomplete(false));
        }
        if header.version > LOG_VERSION {
            return Err(CoreError::config(format!(
                "log file {seq} has version {}, newer than the supported {LOG_VERSION}",
                header.version
            )));
        }

        let validity = if header.version < LOG_OLDEST_READABLE {
            FileValidity::OldUnreadable
        } else if header.version < LOG_VERSION {
            FileValidity::OldReadable
        } else {
            FileValidity::Normal
        };
        if validity.is_readable() && header.is_encrypted() != self.codec.is_encrypted() {
            return Err(CoreError::config(format!(
                "log file {seq} was written {}, but the environment is configured {}",
                if header.is_encrypted() { "encrypted" } else { "in the clear" },
                if self.codec.is_encrypted() { "with a key" } else { "without a key" },
            )));
        }
        Ok(FileCheck {
            validity,
            header: Some(header),
            blank: false,
            checkpoint,
        })
    }

    /// Builds the header record for a new file.
    ///
    /// `prev_offset` is the offset of the last record of the previous file,
    /// `checkpoint` the last checkpoint record written so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be framed.
    pub fn header_record(
        &self,
        prev_offset: u32,
        checkpoint: Lsn,
        log_size: u32,
        creation_mode: u32,
    ) -> CoreResult<Vec<u8>> {
        let header = FileHeader::new(log_size, self.codec.is_encrypted(), creation_mode);
        self.codec.encode(
            RecordType::FileHeader,
            TxnId::NONE,
            checkpoint,
            prev_offset,
            &header.encode(),
        )
    }

    /// Creates (or empties) file `seq` and makes its directory entry durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(&self, seq: u32) -> CoreResult<Box<dyn StorageBackend>> {
        let file = self.dir.create(&file_name(seq))?;
        self.dir.sync()?;
        Ok(file)
    }

    /// Opens file `seq`, or returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn open(&self, seq: u32) -> CoreResult<Option<Box<dyn StorageBackend>>> {
        Ok(self.dir.open(&file_name(seq))?)
    }

    /// Removes file `seq`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn remove(&self, seq: u32) -> CoreResult<()> {
        self.dir.remove(&file_name(seq))?;
        debug!(seq, "removed log file");
        Ok(())
    }

    /// Cuts file `seq` back to `len` bytes and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be truncated.
    pub fn truncate(&self, seq: u32, len: u64) -> CoreResult<()> {
        let mut file = self
            .open(seq)?
            .ok_or_else(|| CoreError::invalid_argument(format!("no log file {seq}")))?;
        file.truncate(len)?;
        file.sync()?;
        Ok(())
    }

    /// File-system path of file `seq`, if the directory has one.
    #[must_use]
    pub fn path_of(&self, seq: u32) -> Option<PathBuf> {
        self.dir.path_of(&file_name(seq))
    }

    /// Walks every record of file `seq`, verifying checksums, and reports
    /// where the intact records end.
    ///
    /// Damage after the header is reported in [`FileScan::damage`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// See [`LogFileManager::check`].
    pub fn scan(&self, seq: u32) -> CoreResult<FileScan> {
        let check = self.check(seq)?;
        let mut scan = FileScan {
            seq,
            check,
            size: 0,
            end: 0,
            last_record: 0,
            records: 0,
            damage: None,
            last_checkpoint: check.checkpoint,
        };
        let Some(file) = self.open(seq)? else {
            return Ok(scan);
        };
        scan.size = file.size()?;
        if !check.validity.is_readable() {
            return Ok(scan);
        }

        let size = usize::try_from(scan.size)
            .map_err(|_| CoreError::invalid_argument(format!("log file {seq} is too large")))?;
        let bytes = file.read_at(0, size)?;
        let mut offset = HEADER_RECORD_LEN;
        while offset < size {
            let lsn = Lsn::new(seq, offset as u32);
            let prefix = match RecordPrefix::parse(lsn, &bytes[offset..]) {
                Ok(prefix) => prefix,
                Err(_) => {
                    scan.damage = Some(format!("partial record header at {lsn}"));
                    break;
                }
            };
            if prefix.is_eof_sentinel() {
                break;
            }
            let len = match self.codec.check_len(lsn, &prefix, u32::MAX) {
                Ok(len) if offset + len <= size => len,
                Ok(len) => {
                    scan.damage = Some(format!(
                        "record at {lsn} needs {len} bytes, {} remain",
                        size - offset
                    ));
                    break;
                }
                Err(e) => {
                    scan.damage = Some(e.to_string());
                    break;
                }
            };
            if let Err(e) = self.codec.decode(lsn, &bytes[offset..offset + len]) {
                scan.damage = Some(e.to_string());
                break;
            }
            if prefix.rectype == RecordType::Checkpoint as u8 {
                scan.last_checkpoint = lsn;
            }
            scan.last_record = lsn.offset;
            scan.records += 1;
            offset += len;
        }
        scan.end = offset.min(size) as u64;
        Ok(scan)
    }
}
