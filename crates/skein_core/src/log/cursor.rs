//! Log cursors.
//!
//! A cursor walks the log in either direction. Each lookup tries the
//! cursor's own read cache, then the log region, then the file, so readers
//! only take the region lock for records that are not yet in a file.
//!
//! File-header records are skipped when stepping; [`CursorOp::Set`] on
//! offset 0 of a file returns the header itself.

use crate::error::{CoreError, CoreResult};
use crate::log::files::{FileValidity, LogFileManager};
use crate::log::manager::{LogManager, RegionRead};
use crate::log::record::{RecordHeader, RecordPrefix, RecordType, PREFIX_LEN};
use crate::types::Lsn;
use skein_storage::StorageBackend;
use std::sync::Arc;
use tracing::debug;

/// Bytes read from a file at a time.
const READ_CHUNK: usize = 32 * 1024;

/// Cursor positioning operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    /// The first record in the log.
    First,
    /// The last record in the log.
    Last,
    /// The record after the current one (`First` if unpositioned).
    Next,
    /// The record before the current one (`Last` if unpositioned).
    Prev,
    /// The current record again.
    Current,
    /// The record at the given LSN.
    Set(Lsn),
}

/// A record returned by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Where the record starts.
    pub lsn: Lsn,
    /// Verified header.
    pub header: RecordHeader,
    /// Plaintext payload.
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// The record type.
    #[must_use]
    pub fn rectype(&self) -> RecordType {
        self.header.rectype
    }
}

/// What a single lookup found.
enum Lookup {
    Record(LogRecord),
    EndOfFile,
    EndOfLog,
    Missing,
    Reclaimed,
}

#[derive(Debug, Default)]
struct ReadCache {
    file: u32,
    start: u64,
    bytes: Vec<u8>,
}

impl ReadCache {
    fn slice(&self, lsn: Lsn, len: usize) -> Option<&[u8]> {
        if self.file != lsn.file || self.bytes.is_empty() {
            return None;
        }
        let at = u64::from(lsn.offset).checked_sub(self.start)? as usize;
        self.bytes.get(at..at.checked_add(len)?)
    }
}

struct OpenFile {
    seq: u32,
    log_size: u32,
    backend: Box<dyn StorageBackend>,
}

/// A positioned reader over the log.
pub struct LogCursor {
    log: Arc<LogManager>,
    files: LogFileManager,
    lsn: Lsn,
    header: Option<RecordHeader>,
    cache: ReadCache,
    file: Option<OpenFile>,
    silent: bool,
}

impl std::fmt::Debug for LogCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCursor")
            .field("lsn", &self.lsn)
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

impl LogCursor {
    /// Creates an unpositioned cursor.
    pub fn new(log: Arc<LogManager>) -> Self {
        let files = log.files().clone();
        Self {
            log,
            files,
            lsn: Lsn::ZERO,
            header: None,
            cache: ReadCache::default(),
            file: None,
            silent: false,
        }
    }

    /// A silent cursor reports damage as "no record" instead of failing,
    /// and never panics the environment. Used for best-effort scans.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Switches silent mode on or off.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Position of the current record, ZERO if unpositioned.
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Moves the cursor and returns the record it lands on, or `None` if
    /// there is no such record. The position only changes when a record is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for `Current` on an unpositioned
    /// cursor. A checksum failure or short read panics the environment
    /// unless the cursor is silent.
    pub fn get(&mut self, op: CursorOp) -> CoreResult<Option<LogRecord>> {
        let result = self
            .log
            .panic_state()
            .check()
            .and_then(|()| self.step(op));
        match result {
            Ok(Some(record)) => {
                self.lsn = record.lsn;
                self.header = Some(record.header);
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) if self.silent && e.is_fatal() => {
                debug!(op = ?op, error = %e, "silent cursor stopped");
                Ok(None)
            }
            Err(e) => self.log.panic_state().escalate(Err(e)),
        }
    }

    fn step(&mut self, op: CursorOp) -> CoreResult<Option<LogRecord>> {
        match op {
            CursorOp::First => {
                let first = self.log.first_lsn()?;
                self.forward_from(first)
            }
            CursorOp::Next => match self.header {
                Some(header) => {
                    let next = Lsn::new(self.lsn.file, self.lsn.offset + header.len);
                    self.forward_from(next)
                }
                None => self.step(CursorOp::First),
            },
            CursorOp::Last => {
                let last = self.log.last_lsn();
                match self.lookup(last)? {
                    Lookup::Record(record) if record.rectype() == RecordType::FileHeader => {
                        self.backward_from(record.lsn, record.header)
                    }
                    Lookup::Record(record) => Ok(Some(record)),
                    _ => Ok(None),
                }
            }
            CursorOp::Prev => match self.header {
                Some(header) => self.backward_from(self.lsn, header),
                None => self.step(CursorOp::Last),
            },
            CursorOp::Current => {
                if self.header.is_none() {
                    return Err(CoreError::invalid_state("cursor is not positioned"));
                }
                match self.lookup(self.lsn)? {
                    Lookup::Record(record) => Ok(Some(record)),
                    Lookup::Reclaimed => Err(reclaimed(self.lsn)),
                    _ => Ok(None),
                }
            }
            CursorOp::Set(lsn) => match self.lookup(lsn)? {
                Lookup::Record(record) => Ok(Some(record)),
                Lookup::Reclaimed => Err(reclaimed(lsn)),
                _ => Ok(None),
            },
        }
    }

    /// The first non-header record at or after `lsn`, crossing into later
    /// files as needed.
    fn forward_from(&mut self, mut lsn: Lsn) -> CoreResult<Option<LogRecord>> {
        loop {
            match self.lookup(lsn)? {
                Lookup::Record(record) if record.rectype() == RecordType::FileHeader => {
                    lsn = Lsn::new(lsn.file, lsn.offset + record.header.len);
                }
                Lookup::Record(record) => return Ok(Some(record)),
                Lookup::EndOfFile => match lsn.file.checked_add(1) {
                    Some(next) => lsn = Lsn::new(next, 0),
                    None => return Ok(None),
                },
                Lookup::EndOfLog | Lookup::Missing => return Ok(None),
                Lookup::Reclaimed => return Err(reclaimed(lsn)),
            }
        }
    }

    /// The first non-header record before the record at `lsn`, following
    /// `prev_offset` links back through file headers.
    fn backward_from(&mut self, mut lsn: Lsn, mut header: RecordHeader) -> CoreResult<Option<LogRecord>> {
        loop {
            let prev = if lsn.offset == 0 {
                if lsn.file <= 1 {
                    return Ok(None);
                }
                Lsn::new(lsn.file - 1, header.prev_offset)
            } else {
                Lsn::new(lsn.file, header.prev_offset)
            };
            match self.lookup(prev)? {
                Lookup::Record(record) if record.rectype() == RecordType::FileHeader => {
                    lsn = record.lsn;
                    header = record.header;
                }
                Lookup::Record(record) => return Ok(Some(record)),
                _ => return Ok(None),
            }
        }
    }

    fn lookup(&mut self, lsn: Lsn) -> CoreResult<Lookup> {
        if let Some(bytes) = self.cached(lsn)? {
            return self.decode(lsn, &bytes);
        }
        match self.log.read_region(lsn)? {
            RegionRead::Bytes(bytes) => self.decode(lsn, &bytes),
            RegionRead::NotInRegion => self.read_file(lsn),
            RegionRead::EndOfFile => Ok(Lookup::EndOfFile),
            RegionRead::EndOfLog => Ok(Lookup::EndOfLog),
            RegionRead::Reclaimed => Ok(Lookup::Reclaimed),
        }
    }

    fn cached(&self, lsn: Lsn) -> CoreResult<Option<Vec<u8>>> {
        let Some(prefix) = self.cache.slice(lsn, PREFIX_LEN) else {
            return Ok(None);
        };
        let prefix = RecordPrefix::parse(lsn, prefix)?;
        if prefix.is_eof_sentinel() {
            return Ok(None);
        }
        let Some(max) = self.file.as_ref().filter(|f| f.seq == lsn.file).map(|f| f.log_size) else {
            return Ok(None);
        };
        let len = self.log.codec().check_len(lsn, &prefix, max)?;
        Ok(self.cache.slice(lsn, len).map(<[u8]>::to_vec))
    }

    fn decode(&self, lsn: Lsn, bytes: &[u8]) -> CoreResult<Lookup> {
        let (header, payload) = self.log.codec().decode(lsn, bytes)?;
        Ok(Lookup::Record(LogRecord {
            lsn,
            header,
            payload,
        }))
    }

    /// Opens (and validates) file `seq` unless it is already open.
    /// Returns false if the file does not exist.
    fn open_file(&mut self, seq: u32) -> CoreResult<bool> {
        if self.file.as_ref().is_some_and(|f| f.seq == seq) {
            return Ok(true);
        }
        let check = self.files.check(seq)?;
        match check.validity {
            FileValidity::Nonexistent => return Ok(false),
            FileValidity::OldUnreadable => {
                return Err(CoreError::config(format!(
                    "log file {seq} was written by an unreadable older version"
                )))
            }
            FileValidity::Incomplete => {
                return Err(CoreError::corruption(
                    Lsn::new(seq, 0),
                    "log file header is damaged",
                ))
            }
            FileValidity::Normal | FileValidity::OldReadable => {}
        }
        let Some(backend) = self.files.open(seq)? else {
            return Ok(false);
        };
        let max = self.log.options().max_file_size();
        let log_size = check.header.map_or(max, |h| h.log_size.max(max));
        self.cache = ReadCache::default();
        self.file = Some(OpenFile {
            seq,
            log_size,
            backend,
        });
        Ok(true)
    }

    fn read_file(&mut self, lsn: Lsn) -> CoreResult<Lookup> {
        if !self.open_file(lsn.file)? {
            return Ok(Lookup::Missing);
        }
        let Some(file) = self.file.as_ref() else {
            return Ok(Lookup::Missing);
        };
        let size = file.backend.size()?;
        let offset = u64::from(lsn.offset);
        if offset >= size {
            return Ok(Lookup::EndOfFile);
        }
        let avail = (size - offset) as usize;
        let bytes = file.backend.read_at(offset, avail.min(READ_CHUNK))?;
        self.log.counters().record_disk_read();

        let prefix = RecordPrefix::parse(lsn, &bytes)?;
        if prefix.is_eof_sentinel() {
            return Ok(Lookup::EndOfFile);
        }
        let len = self.log.codec().check_len(lsn, &prefix, file.log_size)?;
        if len > avail {
            return Err(CoreError::ShortRead {
                lsn,
                expected: len,
                actual: avail,
            });
        }
        let bytes = if len > bytes.len() {
            file.backend.read_at(offset, len)?
        } else {
            bytes
        };
        let lookup = self.decode(lsn, &bytes[..len]);
        self.cache = ReadCache {
            file: lsn.file,
            start: offset,
            bytes,
        };
        lookup
    }
}

fn reclaimed(lsn: Lsn) -> CoreError {
    CoreError::invalid_state(format!("log record {lsn} has been reclaimed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::files::file_name;
    use crate::log::manager::LogOptions;
    use crate::log::record::RecordCodec;
    use crate::panic::PanicState;
    use crate::types::{PutFlags, TxnId};
    use skein_storage::MemoryDirectory;

    fn options(file_size: u32) -> LogOptions {
        LogOptions {
            buffer_size: 4096,
            file_size,
            next_file_size: None,
            in_memory: false,
            auto_remove: false,
            file_mode: 0o600,
        }
    }

    fn open(dir: &Arc<MemoryDirectory>, options: LogOptions) -> Arc<LogManager> {
        Arc::new(
            LogManager::open(
                options,
                dir.clone(),
                Arc::new(RecordCodec::plain()),
                Arc::new(PanicState::new()),
            )
            .unwrap(),
        )
    }

    fn put(log: &LogManager, payload: &[u8]) -> Lsn {
        log.put_record(RecordType::User, TxnId::NONE, Lsn::ZERO, payload, PutFlags::NONE)
            .unwrap()
    }

    fn collect(cursor: &mut LogCursor, first: CursorOp, then: CursorOp) -> Vec<Lsn> {
        let mut out = Vec::new();
        let mut op = first;
        while let Some(record) = cursor.get(op).unwrap() {
            out.push(record.lsn);
            op = then;
        }
        out
    }

    #[test]
    fn walks_forward_and_backward_across_files() {
        let dir = Arc::new(MemoryDirectory::new());
        let log = open(&dir, options(1024));
        let lsns: Vec<Lsn> = (0..12u8).map(|i| put(&log, &[i; 150])).collect();
        assert!(log.current_lsn().file >= 3);
        // Leave the tail in the buffer so reads mix files and the region.

        let mut cursor = LogCursor::new(Arc::clone(&log));
        assert_eq!(collect(&mut cursor, CursorOp::First, CursorOp::Next), lsns);

        let mut backward = collect(&mut cursor, CursorOp::Last, CursorOp::Prev);
        backward.reverse();
        assert_eq!(backward, lsns);
    }

    #[test]
    fn payloads_survive_reopen() {
        let dir = Arc::new(MemoryDirectory::new());
        {
            let log = open(&dir, options(1024));
            for i in 0..10u8 {
                put(&log, &[i; 100]);
            }
            log.flush(None, true).unwrap();
        }
        let log = open(&dir, options(1024));
        let mut cursor = LogCursor::new(log);
        let mut seen = Vec::new();
        let mut op = CursorOp::First;
        while let Some(record) = cursor.get(op).unwrap() {
            seen.push(record.payload[0]);
            op = CursorOp::Next;
        }
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn set_returns_headers_and_current_repeats() {
        let dir = Arc::new(MemoryDirectory::new());
        let log = open(&dir, options(4096));
        let a = put(&log, b"a");
        let b = put(&log, b"b");

        let mut cursor = LogCursor::new(Arc::clone(&log));
        assert!(matches!(
            cursor.get(CursorOp::Current),
            Err(CoreError::InvalidState { .. })
        ));

        let header = cursor.get(CursorOp::Set(Lsn::new(1, 0))).unwrap().unwrap();
        assert_eq!(header.rectype(), RecordType::FileHeader);
        assert_eq!(cursor.get(CursorOp::Next).unwrap().unwrap().lsn, a);

        let record = cursor.get(CursorOp::Set(b)).unwrap().unwrap();
        assert_eq!(record.payload, b"b");
        assert_eq!(cursor.get(CursorOp::Current).unwrap().unwrap().lsn, b);
        assert_eq!(cursor.get(CursorOp::Prev).unwrap().unwrap().lsn, a);
        assert!(cursor.get(CursorOp::Prev).unwrap().is_none());
        assert_eq!(cursor.lsn(), a);

        assert!(cursor.get(CursorOp::Set(log.current_lsn())).unwrap().is_none());
        assert!(cursor.get(CursorOp::Next).unwrap().unwrap().lsn == b);
        assert!(cursor.get(CursorOp::Next).unwrap().is_none());
    }

    #[test]
    fn empty_log_has_no_records() {
        let dir = Arc::new(MemoryDirectory::new());
        let log = open(&dir, options(4096));
        let mut cursor = LogCursor::new(log);
        assert!(cursor.get(CursorOp::First).unwrap().is_none());
        assert!(cursor.get(CursorOp::Last).unwrap().is_none());
    }

    #[test]
    fn straddling_record_is_readable() {
        let dir = Arc::new(MemoryDirectory::new());
        let log = open(
            &dir,
            LogOptions {
                buffer_size: 1024,
                ..options(1 << 16)
            },
        );
        let small = put(&log, b"before");
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
        let big = put(&log, &payload);

        let mut cursor = LogCursor::new(Arc::clone(&log));
        assert_eq!(cursor.get(CursorOp::First).unwrap().unwrap().lsn, small);
        let record = cursor.get(CursorOp::Next).unwrap().unwrap();
        assert_eq!(record.lsn, big);
        assert_eq!(record.payload, payload);
        assert_eq!(cursor.get(CursorOp::Prev).unwrap().unwrap().lsn, small);
    }

    #[test]
    fn checksum_failure_panics_unless_silent() {
        let dir = Arc::new(MemoryDirectory::new());
        let log = open(&dir, options(4096));
        let a = put(&log, b"good");
        let b = put(&log, b"damaged");
        log.flush(None, true).unwrap();
        drop(log);

        dir.file(&file_name(1))
            .unwrap()
            .overwrite(u64::from(b.offset) + 30, &[0xee])
            .unwrap();
        // Reopening truncates the damaged tail; damage an earlier record
        // after open instead.
        let log = open(&dir, options(4096));
        assert_eq!(log.current_lsn(), b);
        dir.file(&file_name(1))
            .unwrap()
            .overwrite(u64::from(a.offset) + 30, &[0xee])
            .unwrap();

        let mut silent = LogCursor::new(Arc::clone(&log)).silent();
        assert!(silent.get(CursorOp::Set(a)).unwrap().is_none());
        assert!(!log.panic_state().is_panicked());

        let mut cursor = LogCursor::new(Arc::clone(&log));
        let err = cursor.get(CursorOp::Set(a)).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
        assert!(matches!(
            cursor.get(CursorOp::First),
            Err(CoreError::RunRecovery { .. })
        ));
        assert!(put_fails(&log));
    }

    fn put_fails(log: &LogManager) -> bool {
        log.put_record(RecordType::User, TxnId::NONE, Lsn::ZERO, b"x", PutFlags::NONE)
            .is_err()
    }

    #[test]
    fn in_memory_cursor_starts_at_oldest_held_record() {
        let dir = Arc::new(MemoryDirectory::new());
        let log = open(
            &dir,
            LogOptions {
                buffer_size: 2048,
                in_memory: true,
                ..options(1024)
            },
        );
        let lsns: Vec<Lsn> = (0..30u8).map(|i| put(&log, &[i; 100])).collect();

        let mut cursor = LogCursor::new(Arc::clone(&log));
        let held = collect(&mut cursor, CursorOp::First, CursorOp::Next);
        assert!(!held.is_empty());
        assert!(held.len() < lsns.len());
        assert_eq!(held[..], lsns[lsns.len() - held.len()..]);

        let mut backward = collect(&mut cursor, CursorOp::Last, CursorOp::Prev);
        backward.reverse();
        assert_eq!(backward, held);
    }
}
