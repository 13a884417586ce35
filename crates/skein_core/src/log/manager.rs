//! The log manager: one shared log region in front of a run of log files.
//!
//! Appends are serialized by the region lock. Each append either lands in
//! the log buffer or, when a record is larger than the free space, is
//! written through in buffer-sized pieces, so a record can straddle the
//! file and the buffer.
//!
//! In on-disk mode buffer positions are offsets in the current file and the
//! buffer restarts at 0 on every file switch. In in-memory mode the buffer
//! is the whole log: positions grow across virtual files and space is
//! reclaimed up to the oldest LSN an active transaction may still need.
//!
//! Lock order is flush lock, then region, then a file handle. Callers must
//! not hold any transaction lock when calling in.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::buffer::LogBuffer;
use crate::log::cursor::LogCursor;
use crate::log::files::{FindTarget, FileValidity, LogFileManager, HEADER_RECORD_LEN};
use crate::log::record::{RecordCodec, RecordPrefix, RecordType, SealedRecord, PREFIX_LEN};
use crate::panic::PanicState;
use crate::stats::{LogCounters, LogStat};
use crate::types::{Lsn, PutFlags, TxnId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use skein_storage::{LogDirectory, StorageBackend};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Times an in-memory append re-checks the transaction horizon before
/// giving up with `BufferFull`.
const ROOM_RETRIES: usize = 3;

type SharedFile = Arc<Mutex<Box<dyn StorageBackend>>>;

/// Source of the oldest LSN still needed by an active transaction.
///
/// Implemented by the transaction manager and registered with
/// [`LogManager::set_horizon`].
pub trait ActiveHorizon: Send + Sync {
    /// The begin LSN of the oldest active transaction, or `None` if no
    /// transaction is active.
    fn oldest_active_lsn(&self) -> Option<Lsn>;
}

/// Log settings taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Log buffer capacity in bytes.
    pub buffer_size: usize,
    /// Size limit for new files.
    pub file_size: u32,
    /// Size limit for files created after the next switch, if different.
    pub next_file_size: Option<u32>,
    /// Keep the log in the buffer only.
    pub in_memory: bool,
    /// Remove archivable files after each file switch.
    pub auto_remove: bool,
    /// Permission bits recorded in file headers.
    pub file_mode: u32,
}

impl LogOptions {
    /// Size limit a newly created file gets.
    #[must_use]
    pub fn new_file_size(&self) -> u32 {
        self.next_file_size.unwrap_or(self.file_size)
    }

    /// Largest file size these options can produce.
    #[must_use]
    pub fn max_file_size(&self) -> u32 {
        self.file_size.max(self.new_file_size())
    }
}

impl From<&Config> for LogOptions {
    fn from(config: &Config) -> Self {
        Self {
            buffer_size: config.log_buffer_size,
            file_size: config.log_file_size,
            next_file_size: config.next_log_file_size,
            in_memory: config.in_memory,
            auto_remove: config.auto_remove,
            file_mode: config.file_mode,
        }
    }
}

/// Outcome of looking up a record in the log region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionRead {
    /// The complete record bytes, unverified.
    Bytes(Vec<u8>),
    /// The record is entirely in a file; read it from there.
    NotInRegion,
    /// The position is past the last record of its (in-memory) file.
    EndOfFile,
    /// The position is at or past the end of the log.
    EndOfLog,
    /// The record's space has been reused.
    Reclaimed,
}

/// An in-memory log file: the buffer positions it covers.
#[derive(Debug, Clone, Copy)]
struct VirtualFile {
    file: u32,
    start: u64,
    end: u64,
}

struct LogRegion {
    ring: LogBuffer,
    /// Where the next record goes.
    lsn: Lsn,
    /// The last record appended, file headers included.
    last_lsn: Lsn,
    /// Everything before this is in the current file.
    flushed_lsn: Lsn,
    /// Everything before this is on stable storage.
    synced_lsn: Lsn,
    file: Option<SharedFile>,
    /// Finished files not yet synced.
    retired: Vec<SharedFile>,
    log_size: u32,
    vfiles: VecDeque<VirtualFile>,
    ckp_lsn: Lsn,
    last_ckp: Lsn,
}

impl LogRegion {
    fn new(buffer_size: usize, log_size: u32) -> Self {
        Self {
            ring: LogBuffer::new(buffer_size),
            lsn: Lsn::ZERO,
            last_lsn: Lsn::ZERO,
            flushed_lsn: Lsn::ZERO,
            synced_lsn: Lsn::ZERO,
            file: None,
            retired: Vec::new(),
            log_size,
            vfiles: VecDeque::new(),
            ckp_lsn: Lsn::ZERO,
            last_ckp: Lsn::ZERO,
        }
    }

    /// Buffer position of an in-memory LSN.
    fn position_of(&self, lsn: Lsn) -> Option<u64> {
        self.vfiles
            .iter()
            .find(|v| v.file == lsn.file)
            .map(|v| v.start + u64::from(lsn.offset))
    }

    /// Forgets virtual files whose bytes are all reclaimed.
    fn drop_reclaimed(&mut self) {
        let a_off = self.ring.a_off();
        while self.vfiles.len() > 1 && self.vfiles.front().is_some_and(|v| v.end <= a_off) {
            self.vfiles.pop_front();
        }
    }
}

/// Owns the log region, the current file and file switching.
pub struct LogManager {
    options: LogOptions,
    files: LogFileManager,
    codec: Arc<RecordCodec>,
    region: Mutex<LogRegion>,
    flush_lock: Mutex<()>,
    horizon: RwLock<Option<Weak<dyn ActiveHorizon>>>,
    counters: LogCounters,
    panic: Arc<PanicState>,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("options", &self.options)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl LogManager {
    /// Opens the log in `dir`, creating the first file if there is none.
    ///
    /// The last file is checked: a torn tail is cut off, a file left blank
    /// by a crash is re-initialized, a file from an older version is left
    /// alone and a new file started after it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] if the last file's header is
    /// damaged, [`CoreError::Config`] if the files were written by a newer
    /// version or with a different key setting, and an I/O error if the
    /// files cannot be read or written.
    pub fn open(
        options: LogOptions,
        dir: Arc<dyn LogDirectory>,
        codec: Arc<RecordCodec>,
        panic: Arc<PanicState>,
    ) -> CoreResult<Self> {
        let files = LogFileManager::new(dir, Arc::clone(&codec));
        let region = LogRegion::new(options.buffer_size, options.new_file_size());
        let log = Self {
            options,
            files,
            codec,
            region: Mutex::new(region),
            flush_lock: Mutex::new(()),
            horizon: RwLock::new(None),
            counters: LogCounters::new(),
            panic,
        };
        {
            let mut region = log.region.lock();
            if log.options.in_memory {
                log.begin_file(&mut region, 1, 0, log.options.file_size)?;
            } else {
                log.open_tail(&mut region)?;
            }
        }
        log.flush(None, true)?;
        debug!(lsn = %log.current_lsn(), in_memory = log.options.in_memory, "log opened");
        Ok(log)
    }

    fn open_tail(&self, region: &mut LogRegion) -> CoreResult<()> {
        let Some(&last) = self.files.list()?.last() else {
            return self.begin_file(region, 1, 0, self.options.file_size);
        };
        let scan = self.files.scan(last)?;
        match scan.check.validity {
            FileValidity::Normal => {
                if scan.has_torn_tail() {
                    warn!(
                        file = last,
                        end = scan.end,
                        size = scan.size,
                        damage = scan.damage.as_deref().unwrap_or("zero fill"),
                        "truncating torn log tail"
                    );
                    self.files.truncate(last, scan.end)?;
                }
                let file = self.files.open(last)?.ok_or_else(|| {
                    CoreError::invalid_state(format!("log file {last} disappeared during open"))
                })?;
                let end = u32::try_from(scan.end).map_err(|_| {
                    CoreError::corruption(Lsn::new(last, 0), "log file exceeds 4 GiB")
                })?;
                region.file = Some(Arc::new(Mutex::new(file)));
                region.ring.reset(scan.end);
                region.lsn = Lsn::new(last, end);
                region.last_lsn = Lsn::new(last, scan.last_record);
                region.last_ckp = scan.last_checkpoint;
                region.flushed_lsn = region.lsn;
                region.synced_lsn = region.lsn;
                region.log_size = scan
                    .check
                    .header
                    .map_or(self.options.file_size, |h| h.log_size);
                Ok(())
            }
            FileValidity::OldReadable => {
                info!(file = last, "last log file has an older version; starting a new file");
                region.last_ckp = scan.last_checkpoint;
                self.begin_file(region, next_seq(last)?, scan.last_record, self.options.file_size)
            }
            FileValidity::OldUnreadable => {
                info!(file = last, "last log file is unreadable by this version; starting a new file");
                self.begin_file(region, next_seq(last)?, 0, self.options.file_size)
            }
            FileValidity::Incomplete if scan.check.blank => {
                let prev = if last > 1 {
                    self.files
                        .scan(last - 1)
                        .ok()
                        .filter(|prev| prev.check.validity.is_readable())
                } else {
                    None
                };
                let prev_offset = prev.as_ref().map_or(0, |p| p.last_record);
                region.last_ckp = prev.map_or(Lsn::ZERO, |p| p.last_checkpoint);
                warn!(file = last, "re-initializing blank log file");
                self.begin_file(region, last, prev_offset, self.options.file_size)
            }
            FileValidity::Incomplete => Err(CoreError::corruption(
                Lsn::new(last, 0),
                "last log file has a damaged header",
            )),
            FileValidity::Nonexistent => self.begin_file(region, last, 0, self.options.file_size),
        }
    }

    /// Starts file `seq` with a `log_size` limit and appends its header
    /// record.
    fn begin_file(
        &self,
        region: &mut LogRegion,
        seq: u32,
        prev_offset: u32,
        log_size: u32,
    ) -> CoreResult<()> {
        if self.options.in_memory {
            let at = region.ring.b_off();
            region.vfiles.push_back(VirtualFile {
                file: seq,
                start: at,
                end: at,
            });
        } else {
            let file = self.files.create(seq)?;
            region.file = Some(Arc::new(Mutex::new(file)));
            region.ring.reset(0);
            region.flushed_lsn = Lsn::new(seq, 0);
            region.synced_lsn = Lsn::new(seq, 0);
        }
        region.log_size = log_size;
        let header = self.files.header_record(
            prev_offset,
            region.last_ckp,
            region.log_size,
            self.options.file_mode,
        )?;
        region.lsn = Lsn::new(seq, 0);
        self.append_bytes(region, &header)?;
        region.last_lsn = region.lsn;
        region.lsn = Lsn::new(seq, HEADER_RECORD_LEN as u32);
        Ok(())
    }

    /// Registers the source of the transaction horizon.
    pub fn set_horizon(&self, horizon: Weak<dyn ActiveHorizon>) {
        *self.horizon.write() = Some(horizon);
    }

    /// The oldest LSN an active transaction may still need.
    pub fn oldest_active_lsn(&self) -> Option<Lsn> {
        let horizon = self.horizon.read().as_ref().and_then(Weak::upgrade);
        horizon.and_then(|h| h.oldest_active_lsn())
    }

    /// Seals `payload` and appends it.
    ///
    /// # Errors
    ///
    /// See [`LogManager::put`].
    pub fn put_record(
        &self,
        rectype: RecordType,
        txnid: TxnId,
        prev_lsn: Lsn,
        payload: &[u8],
        flags: PutFlags,
    ) -> CoreResult<Lsn> {
        let sealed = self.codec.seal(rectype, txnid, prev_lsn, payload)?;
        self.put(&sealed, flags)
    }

    /// Appends a sealed record and returns its LSN.
    ///
    /// With [`PutFlags::FLUSH`] or [`PutFlags::SYNC`] the record (and every
    /// record before it) is written through before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] if the record cannot fit in a
    /// file, [`CoreError::BufferFull`] if an in-memory log has no room
    /// while transactions hold the space, and [`CoreError::RunRecovery`]
    /// once the environment has panicked. An I/O failure panics the
    /// environment.
    pub fn put(&self, sealed: &SealedRecord, flags: PutFlags) -> CoreResult<Lsn> {
        self.panic.check()?;
        let len = sealed.framed_len();
        let mut limit = self.options.new_file_size() as usize;
        if self.options.in_memory {
            limit = limit.min(self.options.buffer_size);
        }
        if len + HEADER_RECORD_LEN > limit {
            return Err(CoreError::RecordTooLarge {
                len,
                max: limit.saturating_sub(HEADER_RECORD_LEN),
            });
        }

        let (lsn, rotated) = self.panic.escalate(self.append_record(sealed, len))?;
        self.counters.record_put(len);
        if rotated && !self.options.in_memory {
            self.panic.escalate(self.sync_retired())?;
        }

        if flags.writes_through() {
            self.flush(Some(lsn), flags.sync)?;
        }
        if rotated && self.options.auto_remove {
            if let Err(e) = self.remove_archivable() {
                warn!(error = %e, "automatic log file removal failed");
            }
        }
        Ok(lsn)
    }

    fn append_record(&self, sealed: &SealedRecord, len: usize) -> CoreResult<(Lsn, bool)> {
        let mut guard = self.region.lock();
        if self.options.in_memory {
            self.make_room(&mut guard, len + HEADER_RECORD_LEN)?;
        }
        let region = &mut *guard;

        let rotated = u64::from(region.lsn.offset) + len as u64 > u64::from(region.log_size);
        if rotated {
            self.rotate(region)?;
        }
        let lsn = region.lsn;
        let bytes = self.codec.frame(sealed, region.last_lsn.offset)?;
        self.append_bytes(region, &bytes)?;
        region.last_lsn = lsn;
        region.lsn = Lsn::new(lsn.file, lsn.offset + len as u32);
        Ok((lsn, rotated))
    }

    /// Closes the current file and starts the next one.
    fn rotate(&self, region: &mut LogRegion) -> CoreResult<()> {
        let next = next_seq(region.lsn.file)?;
        let prev_offset = region.last_lsn.offset;
        let synced = region.synced_lsn;
        if !self.options.in_memory {
            self.drain(region)?;
            if let Some(file) = region.file.take() {
                region.retired.push(file);
            }
        }
        self.begin_file(region, next, prev_offset, self.options.new_file_size())?;
        region.synced_lsn = synced;
        self.counters.record_rotation();
        info!(file = next, log_size = region.log_size, "switched to a new log file");
        Ok(())
    }

    fn append_bytes(&self, region: &mut LogRegion, bytes: &[u8]) -> CoreResult<()> {
        if self.options.in_memory {
            region.ring.append(bytes)?;
            let end = region.ring.b_off();
            region.ring.mark_written(end);
            if let Some(vfile) = region.vfiles.back_mut() {
                vfile.end = end;
            }
            return Ok(());
        }

        let mut rest = bytes;
        if region.ring.free() < rest.len() {
            self.drain(region)?;
            let written = region.ring.w_off();
            region.ring.reclaim(written);
        }
        while !rest.is_empty() {
            if region.ring.free() == 0 {
                self.drain(region)?;
                let written = region.ring.w_off();
                region.ring.reclaim(written);
            }
            let n = region.ring.free().min(rest.len());
            region.ring.append(&rest[..n])?;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Writes pending buffer bytes to the current file.
    fn drain(&self, region: &mut LogRegion) -> CoreResult<()> {
        let pending = region.ring.pending();
        if pending == 0 {
            return Ok(());
        }
        let file = region
            .file
            .clone()
            .ok_or_else(|| CoreError::invalid_state("no current log file"))?;
        {
            let (first, second) = region.ring.pending_slices();
            let mut file = file.lock();
            file.append(first)?;
            if !second.is_empty() {
                file.append(second)?;
            }
            file.flush()?;
        }
        let end = region.ring.b_off();
        region.ring.mark_written(end);
        self.counters.record_write(pending);
        Ok(())
    }

    /// Reclaims in-memory buffer space up to the transaction horizon until
    /// `needed` bytes are free.
    fn make_room(&self, region: &mut MutexGuard<'_, LogRegion>, needed: usize) -> CoreResult<()> {
        for attempt in 0..=ROOM_RETRIES {
            if region.ring.free() >= needed {
                return Ok(());
            }
            let horizon = MutexGuard::unlocked(region, || self.oldest_active_lsn());
            let target = match horizon {
                Some(lsn) => region
                    .position_of(lsn)
                    .unwrap_or_else(|| region.ring.a_off()),
                None => region.ring.b_off(),
            };
            if region.ring.reclaim(target) {
                region.drop_reclaimed();
                continue;
            }
            if attempt < ROOM_RETRIES {
                self.counters.record_buffer_wait();
                debug!(needed, attempt, "waiting for the transaction horizon to advance");
                MutexGuard::unlocked(region, std::thread::yield_now);
            }
        }
        if region.ring.free() >= needed {
            return Ok(());
        }
        self.counters.record_buffer_full();
        let capacity = region.ring.capacity();
        warn!(needed, capacity, "in-memory log buffer is full");
        Err(CoreError::BufferFull { needed, capacity })
    }

    /// Writes the log through `target` (everything, if `None`) to the
    /// current file, and syncs it if `sync` is set.
    ///
    /// Returns immediately if the target is already as durable as asked.
    /// In-memory logs have nothing to write.
    ///
    /// # Errors
    ///
    /// Returns an I/O error, which also panics the environment.
    pub fn flush(&self, target: Option<Lsn>, sync: bool) -> CoreResult<()> {
        self.panic.check()?;
        if self.options.in_memory {
            return Ok(());
        }
        let result = self.flush_inner(target, sync);
        self.panic.escalate(result)
    }

    fn flush_inner(&self, target: Option<Lsn>, sync: bool) -> CoreResult<()> {
        let _flushing = self.flush_lock.lock();
        let (retired, file, end) = {
            let mut region = self.region.lock();
            if let Some(target) = target {
                if target < region.synced_lsn || (!sync && target < region.flushed_lsn) {
                    return Ok(());
                }
            }
            self.drain(&mut region)?;
            region.flushed_lsn = region.lsn;
            if !sync || region.synced_lsn >= region.lsn {
                return Ok(());
            }
            (
                std::mem::take(&mut region.retired),
                region.file.clone(),
                region.lsn,
            )
        };
        for file in retired.iter().chain(file.as_ref()) {
            file.lock().sync()?;
            self.counters.record_fsync();
        }
        let mut region = self.region.lock();
        if end > region.synced_lsn {
            region.synced_lsn = end;
        }
        Ok(())
    }

    /// Syncs the files finished by a switch. Everything before the file
    /// that was current when they were taken is then stable.
    fn sync_retired(&self) -> CoreResult<()> {
        let _flushing = self.flush_lock.lock();
        let (retired, first_unsynced) = {
            let mut region = self.region.lock();
            (
                std::mem::take(&mut region.retired),
                Lsn::new(region.lsn.file, 0),
            )
        };
        if retired.is_empty() {
            return Ok(());
        }
        for file in &retired {
            file.lock().sync()?;
            self.counters.record_fsync();
        }
        let mut region = self.region.lock();
        if first_unsynced > region.synced_lsn {
            region.synced_lsn = first_unsynced;
        }
        Ok(())
    }

    /// Looks up the record at `lsn` in the log region.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the record's length field is
    /// impossible, and an I/O error if the part of a straddling record that
    /// is already in the file cannot be read.
    pub fn read_region(&self, lsn: Lsn) -> CoreResult<RegionRead> {
        let region = self.region.lock();
        if lsn >= region.lsn {
            return Ok(RegionRead::EndOfLog);
        }
        let max = self.options.max_file_size().max(region.log_size);

        if self.options.in_memory {
            let Some(vfile) = region.vfiles.iter().find(|v| v.file == lsn.file) else {
                return Ok(RegionRead::Reclaimed);
            };
            let pos = vfile.start + u64::from(lsn.offset);
            if pos >= vfile.end {
                return Ok(RegionRead::EndOfFile);
            }
            if pos < region.ring.a_off() {
                return Ok(RegionRead::Reclaimed);
            }
            let bytes = self.copy_from_ring(&region, lsn, pos, max)?;
            self.counters.record_region_read();
            return Ok(RegionRead::Bytes(bytes));
        }

        if lsn.file < region.lsn.file {
            return Ok(RegionRead::NotInRegion);
        }
        let pos = u64::from(lsn.offset);
        let a_off = region.ring.a_off();
        if pos >= a_off {
            let bytes = self.copy_from_ring(&region, lsn, pos, max)?;
            self.counters.record_region_read();
            return Ok(RegionRead::Bytes(bytes));
        }
        let file = region
            .file
            .clone()
            .ok_or_else(|| CoreError::invalid_state("no current log file"))?;
        drop(region);

        let prefix = RecordPrefix::parse(lsn, &self.assemble(&file, lsn, pos, PREFIX_LEN, a_off)?)?;
        let len = self.codec.check_len(lsn, &prefix, max)?;
        if pos + len as u64 <= a_off {
            return Ok(RegionRead::NotInRegion);
        }
        let bytes = self.assemble(&file, lsn, pos, len, a_off)?;
        self.counters.record_region_read();
        Ok(RegionRead::Bytes(bytes))
    }

    fn copy_from_ring(&self, region: &LogRegion, lsn: Lsn, pos: u64, max: u32) -> CoreResult<Vec<u8>> {
        let prefix = region
            .ring
            .copy_out(pos, PREFIX_LEN)
            .ok_or_else(|| CoreError::corruption(lsn, "record header is not in the log buffer"))?;
        let prefix = RecordPrefix::parse(lsn, &prefix)?;
        let len = self.codec.check_len(lsn, &prefix, max)?;
        region.ring.copy_out(pos, len).ok_or_else(|| {
            CoreError::corruption(lsn, format!("record of {len} bytes runs past the end of the log"))
        })
    }

    /// Reads `[pos, pos + len)` of file `lsn.file`: the part before `a_off`
    /// from `file` without the region lock, the rest from the buffer. Bytes
    /// the buffer has written out since `a_off` was taken are read from the
    /// file instead.
    fn assemble(
        &self,
        file: &SharedFile,
        lsn: Lsn,
        pos: u64,
        len: usize,
        a_off: u64,
    ) -> CoreResult<Vec<u8>> {
        let end = pos + len as u64;
        let split = end.min(a_off);
        let mut out = file.lock().read_at(pos, (split - pos) as usize)?;
        if end == split {
            return Ok(out);
        }
        let rest = (end - split) as usize;
        let buffered = {
            let region = self.region.lock();
            if region.lsn.file == lsn.file && split >= region.ring.a_off() {
                Some(region.ring.copy_out(split, rest).ok_or_else(|| {
                    CoreError::corruption(
                        lsn,
                        format!("record of {len} bytes runs past the end of the log"),
                    )
                })?)
            } else {
                None
            }
        };
        let tail = match buffered {
            Some(tail) => tail,
            None => file.lock().read_at(split, rest)?,
        };
        out.extend_from_slice(&tail);
        Ok(out)
    }

    /// The position the next record will be written at.
    pub fn current_lsn(&self) -> Lsn {
        self.region.lock().lsn
    }

    /// The last record written, file headers included.
    pub fn last_lsn(&self) -> Lsn {
        self.region.lock().last_lsn
    }

    /// Everything before this position is on stable storage. An in-memory
    /// log reports its end.
    pub fn synced_lsn(&self) -> Lsn {
        let region = self.region.lock();
        if self.options.in_memory {
            region.lsn
        } else {
            region.synced_lsn
        }
    }

    /// The first position still readable: offset 0 of the lowest file on
    /// disk, or the oldest byte held by an in-memory buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn first_lsn(&self) -> CoreResult<Lsn> {
        if self.options.in_memory {
            let region = self.region.lock();
            let a_off = region.ring.a_off();
            let held = region
                .vfiles
                .iter()
                .find(|v| a_off < v.end)
                .map(|v| Lsn::new(v.file, (a_off.max(v.start) - v.start) as u32));
            return Ok(held.unwrap_or(region.lsn));
        }
        match self.files.find(FindTarget::First)? {
            (0, _) => Ok(Lsn::new(self.current_lsn().file, 0)),
            (seq, _) => Ok(Lsn::new(seq, 0)),
        }
    }

    /// Records a checkpoint: `ckp_lsn` is where recovery would start,
    /// `record_lsn` the checkpoint record itself.
    pub fn set_checkpoint(&self, ckp_lsn: Lsn, record_lsn: Lsn) {
        let mut region = self.region.lock();
        region.ckp_lsn = ckp_lsn;
        region.last_ckp = record_lsn;
    }

    /// Recovery start point of the last checkpoint, ZERO if none.
    pub fn checkpoint_lsn(&self) -> Lsn {
        self.region.lock().ckp_lsn
    }

    /// Position of the last checkpoint record, ZERO if none.
    pub fn last_checkpoint(&self) -> Lsn {
        self.region.lock().last_ckp
    }

    fn archive_horizon(&self) -> Option<Lsn> {
        let ckp = self.checkpoint_lsn();
        if ckp.is_zero() {
            return None;
        }
        Some(self.oldest_active_lsn().map_or(ckp, |active| active.min(ckp)))
    }

    /// Files no longer needed for recovery: older than both the last
    /// checkpoint and the oldest active transaction. Never the current
    /// file; empty until a checkpoint has been taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn archivable(&self) -> CoreResult<Vec<u32>> {
        if self.options.in_memory {
            return Ok(Vec::new());
        }
        let Some(horizon) = self.archive_horizon() else {
            return Ok(Vec::new());
        };
        let current = self.current_lsn().file;
        Ok(self
            .files
            .list()?
            .into_iter()
            .filter(|&seq| seq < horizon.file && seq < current)
            .collect())
    }

    /// Removes archivable files, returning their sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn remove_archivable(&self) -> CoreResult<Vec<u32>> {
        let seqs = self.archivable()?;
        for &seq in &seqs {
            self.files.remove(seq)?;
            self.counters.record_file_removed();
        }
        if !seqs.is_empty() {
            info!(count = seqs.len(), "removed archivable log files");
        }
        Ok(seqs)
    }

    /// Opens an unpositioned cursor over this log.
    pub fn cursor(self: &Arc<Self>) -> LogCursor {
        LogCursor::new(Arc::clone(self))
    }

    /// The file manager.
    pub fn files(&self) -> &LogFileManager {
        &self.files
    }

    /// The record codec.
    pub fn codec(&self) -> &Arc<RecordCodec> {
        &self.codec
    }

    /// The log settings.
    pub fn options(&self) -> &LogOptions {
        &self.options
    }

    pub(crate) fn panic_state(&self) -> &Arc<PanicState> {
        &self.panic
    }

    pub(crate) fn counters(&self) -> &LogCounters {
        &self.counters
    }

    /// A statistics snapshot.
    pub fn stat(&self) -> LogStat {
        let mut stat = self.counters.snapshot();
        let region = self.region.lock();
        stat.current_lsn = region.lsn;
        stat.synced_lsn = if self.options.in_memory {
            region.lsn
        } else {
            region.synced_lsn
        };
        stat.checkpoint_lsn = region.ckp_lsn;
        stat.buffer_size = region.ring.capacity();
        stat.file_size = region.log_size;
        stat.in_memory = self.options.in_memory;
        stat
    }
}

fn next_seq(seq: u32) -> CoreResult<u32> {
    seq.checked_add(1)
        .ok_or_else(|| CoreError::config("log file sequence numbers are exhausted"))
}
