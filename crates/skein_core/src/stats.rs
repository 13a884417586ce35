//! Log and transaction statistics.
//!
//! Counters are atomic and can be read while operations are in progress.
//! Values only grow, except the `active` transaction gauge.
//!
//! # Usage
//!
//! ```rust,ignore
//! use skein_core::{Config, Environment};
//!
//! let env = Environment::open_in_memory(Config::memory())?;
//! env.log_put(b"record", Default::default())?;
//!
//! let stat = env.log_stat();
//! println!("records: {}", stat.records);
//! println!("fsyncs: {}", stat.fsyncs);
//! ```

use crate::types::Lsn;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the log manager.
#[derive(Debug, Default)]
pub struct LogCounters {
    records: AtomicU64,
    bytes: AtomicU64,
    writes: AtomicU64,
    bytes_written: AtomicU64,
    fsyncs: AtomicU64,
    rotations: AtomicU64,
    buffer_waits: AtomicU64,
    buffer_full: AtomicU64,
    region_reads: AtomicU64,
    disk_reads: AtomicU64,
    files_removed: AtomicU64,
}

impl LogCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_put(&self, bytes: usize) {
        self.records.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_fsync(&self) {
        self.fsyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_buffer_wait(&self) {
        self.buffer_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_buffer_full(&self) {
        self.buffer_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_region_read(&self) {
        self.region_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disk_read(&self) {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file_removed(&self) {
        self.files_removed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of log statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStat {
    /// Records appended since open.
    pub records: u64,
    /// Framed bytes appended since open.
    pub bytes: u64,
    /// Writes of buffered bytes to a file.
    pub writes: u64,
    /// Bytes written to files.
    pub bytes_written: u64,
    /// File syncs.
    pub fsyncs: u64,
    /// Switches to a new log file.
    pub rotations: u64,
    /// Times an append waited for the transaction horizon to advance.
    pub buffer_waits: u64,
    /// Appends refused because the in-memory buffer was full.
    pub buffer_full: u64,
    /// Cursor reads served from the log buffer.
    pub region_reads: u64,
    /// Cursor reads served from files.
    pub disk_reads: u64,
    /// Log files removed.
    pub files_removed: u64,
    /// Position of the next record.
    pub current_lsn: Lsn,
    /// Everything before this position is on stable storage.
    pub synced_lsn: Lsn,
    /// Recovery start point recorded by the last checkpoint.
    pub checkpoint_lsn: Lsn,
    /// Log buffer capacity.
    pub buffer_size: usize,
    /// Size limit of the current file.
    pub file_size: u32,
    /// Whether the log is kept in memory.
    pub in_memory: bool,
}

impl LogCounters {
    /// Fills the counter fields of a snapshot; gauges are left at default.
    pub(crate) fn snapshot(&self) -> LogStat {
        LogStat {
            records: self.records.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            fsyncs: self.fsyncs.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            buffer_waits: self.buffer_waits.load(Ordering::Relaxed),
            buffer_full: self.buffer_full.load(Ordering::Relaxed),
            region_reads: self.region_reads.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            ..LogStat::default()
        }
    }
}

/// Counters kept by the transaction manager.
#[derive(Debug, Default)]
pub struct TxnCounters {
    begins: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    prepares: AtomicU64,
    recycles: AtomicU64,
    checkpoints: AtomicU64,
    active: AtomicU64,
    max_active: AtomicU64,
}

impl TxnCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_begin(&self) {
        self.begins.fetch_add(1, Ordering::Relaxed);
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_active.fetch_max(active, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prepare(&self) {
        self.prepares.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recycle(&self) {
        self.recycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TxnStat {
        TxnStat {
            begins: self.begins.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            prepares: self.prepares.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            max_active: self.max_active.load(Ordering::Relaxed),
            ..TxnStat::default()
        }
    }
}

/// Snapshot of transaction statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnStat {
    /// Transactions begun.
    pub begins: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions aborted.
    pub aborts: u64,
    /// Transactions prepared.
    pub prepares: u64,
    /// Times the id space was recycled.
    pub recycles: u64,
    /// Checkpoints taken.
    pub checkpoints: u64,
    /// Transactions currently active.
    pub active: u64,
    /// Most transactions active at once.
    pub max_active: u64,
    /// Last id handed out.
    pub last_txnid: u32,
    /// Highest id usable before the next recycle.
    pub max_txnid: u32,
    /// Position of the last checkpoint record.
    pub last_checkpoint: Lsn,
}
