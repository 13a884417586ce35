//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::{ActiveHorizon, CursorOp, LogManager, LogRecord, RecordType};
use crate::panic::PanicState;
use crate::stats::{TxnCounters, TxnStat};
use crate::txn::record::{now_timestamp, TxnRecord};
use crate::txn::state::{TransactionDetail, TxnRegion};
use crate::txn::{
    GlobalXid, LockCollaborator, NoopLocks, NoopUndo, PreparedTxn, Txn, TxnInfo, TxnOptions,
    TxnStatus, UndoHandler,
};
use crate::types::{Lsn, PutFlags, SyncPolicy, TxnId};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coordinates transactions over the log.
///
/// - Detail slots live in a region behind their own lock, which is never
///   held while calling into the log
/// - Commit and abort resolve every child before the parent
/// - Abort, and the final release of a slot, either succeed or panic the
///   environment
///
/// A single transaction (with its children) must be driven from one thread
/// at a time; different transactions may run concurrently.
pub struct TransactionManager {
    log: Arc<LogManager>,
    region: Mutex<TxnRegion>,
    default_sync: SyncPolicy,
    lock_timeout: Option<Duration>,
    txn_timeout: Option<Duration>,
    undo: RwLock<Arc<dyn UndoHandler>>,
    locks: RwLock<Arc<dyn LockCollaborator>>,
    counters: TxnCounters,
    panic: Arc<PanicState>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("default_sync", &self.default_sync)
            .field("lock_timeout", &self.lock_timeout)
            .field("txn_timeout", &self.txn_timeout)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a transaction manager over `log`.
    ///
    /// The caller registers it as the log's horizon with
    /// [`LogManager::set_horizon`].
    pub fn new(log: Arc<LogManager>, config: &Config) -> Self {
        let panic = Arc::clone(log.panic_state());
        Self {
            log,
            region: Mutex::new(TxnRegion::new(config.txn_id_window, config.max_txns)),
            default_sync: config.default_sync,
            lock_timeout: config.lock_timeout,
            txn_timeout: config.txn_timeout,
            undo: RwLock::new(Arc::new(NoopUndo)),
            locks: RwLock::new(Arc::new(NoopLocks)),
            counters: TxnCounters::new(),
            panic,
        }
    }

    /// Installs the handler that undoes user records during abort.
    pub fn set_undo_handler(&self, handler: Arc<dyn UndoHandler>) {
        *self.undo.write() = handler;
    }

    /// Installs the lock manager.
    pub fn set_lock_collaborator(&self, locks: Arc<dyn LockCollaborator>) {
        *self.locks.write() = locks;
    }

    /// Enters or leaves recovery. While recovering only compensating
    /// transactions may log.
    pub fn set_recovering(&self, recovering: bool) {
        self.region.lock().recovering = recovering;
    }

    /// Whether the manager is in recovery.
    pub fn is_recovering(&self) -> bool {
        self.region.lock().recovering
    }

    /// Begins a transaction, nested under `parent` if given.
    ///
    /// A child without its own timeouts inherits its parent's. When the
    /// current id range is used up, the largest range of ids not held by an
    /// active transaction becomes the new range and a `TxnRecycle` record
    /// is logged.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidState`] if `parent` is resolved or prepared
    /// - [`CoreError::TooManyTransactions`] if every slot is in use
    /// - [`CoreError::TxnIdSpaceExhausted`] if every id is held
    pub fn begin(&self, parent: Option<&Txn>, options: TxnOptions) -> CoreResult<Txn> {
        self.panic.check()?;
        let begin_lsn = self.log.current_lsn();
        let (txn, recycled) = {
            let mut region = self.region.lock();
            if region.active() >= region.capacity() {
                return Err(CoreError::TooManyTransactions {
                    max: region.capacity(),
                });
            }
            let inherited = match parent {
                Some(p) => {
                    let detail = region.get(p.slot, p.generation)?;
                    if detail.status != TxnStatus::Running {
                        return Err(CoreError::invalid_state(format!(
                            "parent {} is {:?}",
                            p.id, detail.status
                        )));
                    }
                    Some((p, detail.lock_timeout, detail.txn_timeout))
                }
                None => None,
            };
            let (id, recycled) = match region.next_id() {
                Some(id) => (id, None),
                None => {
                    let range = region.recycle()?;
                    let id = region.next_id().ok_or(CoreError::TxnIdSpaceExhausted)?;
                    (id, Some(range))
                }
            };
            let (lock_timeout, txn_timeout) = match inherited {
                Some((_, lock, txn)) => (
                    options.lock_timeout.or(lock),
                    options.txn_timeout.or(txn),
                ),
                None => (
                    options.lock_timeout.or(self.lock_timeout),
                    options.txn_timeout.or(self.txn_timeout),
                ),
            };
            let detail = TransactionDetail {
                txnid: id,
                parent: inherited.map(|(p, _, _)| p.slot),
                kids: Vec::new(),
                status: TxnStatus::Running,
                last_lsn: Lsn::ZERO,
                begin_lsn,
                xid: None,
                name: options.name,
                lock_timeout,
                txn_timeout,
                sync: options.sync,
                compensating: options.compensating,
            };
            let (slot, generation) = region.alloc(detail)?;
            if let Some((p, _, _)) = inherited {
                region.get_mut(p.slot, p.generation)?.kids.push(slot);
            }
            (
                Txn {
                    slot,
                    generation,
                    id,
                },
                recycled,
            )
        };

        if let Some((min, max)) = recycled {
            info!(min, max, "transaction ids recycled");
            let record = TxnRecord::TxnRecycle { min, max };
            if let Err(e) = self.log_record(TxnId::NONE, Lsn::ZERO, &record, PutFlags::NONE) {
                if let Err(release) = self.region.lock().release(txn.slot, txn.generation) {
                    warn!(txnid = %txn.id, error = %release, "releasing slot after failed recycle");
                }
                return Err(e);
            }
            self.counters.record_recycle();
        }
        self.counters.record_begin();
        debug!(txnid = %txn.id, parent = ?parent.map(Txn::id), "transaction begun");
        Ok(txn)
    }

    /// Logs `payload` as a user record on the transaction's chain.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] if the transaction is not
    /// running, or if the manager is recovering and the transaction is not
    /// compensating. Log errors are passed through.
    pub fn put(&self, txn: &Txn, payload: &[u8]) -> CoreResult<Lsn> {
        self.panic.check()?;
        let prev_lsn = {
            let region = self.region.lock();
            let detail = region.get(txn.slot, txn.generation)?;
            if detail.status != TxnStatus::Running {
                return Err(CoreError::invalid_state(format!(
                    "{} is {:?}",
                    txn.id, detail.status
                )));
            }
            if region.recovering && !detail.compensating {
                return Err(CoreError::invalid_state(
                    "only compensating transactions may log during recovery",
                ));
            }
            detail.last_lsn
        };
        let lsn = self
            .log
            .put_record(RecordType::User, txn.id, prev_lsn, payload, PutFlags::NONE)?;
        self.set_last_lsn(txn.slot, txn.generation, lsn)?;
        Ok(lsn)
    }

    /// Commits a transaction and its unresolved children.
    ///
    /// A top-level transaction that logged anything writes a `Commit`
    /// record pushed out according to `sync` (or the transaction's own
    /// policy, or the environment default). A child instead splices its
    /// chain into its parent's with a `ChildCommit` record.
    ///
    /// If a child or the commit record fails, the whole family is aborted
    /// and the error returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for a resolved handle.
    pub fn commit(&self, txn: &Txn, sync: Option<SyncPolicy>) -> CoreResult<()> {
        self.panic.check()?;
        self.commit_slot(txn.slot, txn.generation, sync)
    }

    fn commit_slot(&self, slot: usize, generation: u64, sync: Option<SyncPolicy>) -> CoreResult<()> {
        let kids = self.kids_of(slot, generation)?;
        self.commit_kids(slot, generation, &kids)?;

        let (id, last_lsn, parent, policy) = {
            let region = self.region.lock();
            let detail = region.get(slot, generation)?;
            (
                detail.txnid,
                detail.last_lsn,
                detail.parent,
                sync.or(detail.sync).unwrap_or(self.default_sync),
            )
        };
        if !last_lsn.is_zero() {
            let logged = match parent {
                None => self.write_commit(id, last_lsn, policy),
                Some(parent) => self.splice_into(parent, id, last_lsn),
            };
            if let Err(e) = logged {
                warn!(txnid = %id, error = %e, "commit failed, aborting");
                self.abort_slot(slot, generation)?;
                return Err(e);
            }
        }
        self.set_status(slot, generation, TxnStatus::Committed)?;
        self.finish(slot, generation, id)?;
        self.counters.record_commit();
        debug!(txnid = %id, last_lsn = %last_lsn, "transaction committed");
        Ok(())
    }

    /// Commits children in begin order. On failure the remaining children
    /// and the parent are aborted.
    fn commit_kids(&self, slot: usize, generation: u64, kids: &[(usize, u64)]) -> CoreResult<()> {
        for (i, &(kid, kid_generation)) in kids.iter().enumerate() {
            if let Err(e) = self.commit_slot(kid, kid_generation, None) {
                warn!(error = %e, "child commit failed, aborting the family");
                for &(other, other_generation) in &kids[i + 1..] {
                    self.abort_slot(other, other_generation)?;
                }
                self.abort_slot(slot, generation)?;
                return Err(e);
            }
        }
        Ok(())
    }

    fn write_commit(&self, id: TxnId, last_lsn: Lsn, policy: SyncPolicy) -> CoreResult<()> {
        let locks = Arc::clone(&*self.locks.read());
        locks.release_read_locks(id)?;
        let record = TxnRecord::Commit {
            timestamp: now_timestamp(),
        };
        self.log_record(id, last_lsn, &record, policy.put_flags())?;
        Ok(())
    }

    fn splice_into(&self, parent: usize, child: TxnId, child_last_lsn: Lsn) -> CoreResult<()> {
        let (parent_id, parent_generation, parent_last) = {
            let region = self.region.lock();
            let generation = region
                .generation(parent)
                .ok_or_else(|| CoreError::invalid_state("parent transaction is resolved"))?;
            let detail = region.get(parent, generation)?;
            (detail.txnid, generation, detail.last_lsn)
        };
        let record = TxnRecord::ChildCommit {
            child,
            child_last_lsn,
        };
        let lsn = self.log_record(parent_id, parent_last, &record, PutFlags::NONE)?;
        self.set_last_lsn(parent, parent_generation, lsn)?;
        Ok(())
    }

    /// Aborts a transaction and its unresolved children, undoing every
    /// user record on its chain, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for a resolved handle. Any other
    /// failure panics the environment and returns
    /// [`CoreError::RunRecovery`], except an in-memory log too full for the
    /// `Abort` record: the undo has already happened, so the record is
    /// skipped with a warning.
    pub fn abort(&self, txn: &Txn) -> CoreResult<()> {
        self.panic.check()?;
        self.abort_slot(txn.slot, txn.generation)
    }

    fn abort_slot(&self, slot: usize, generation: u64) -> CoreResult<()> {
        let kids = self.kids_of(slot, generation)?;
        for (kid, kid_generation) in kids {
            self.abort_slot(kid, kid_generation)
                .map_err(|e| self.panic.set(format!("aborting a child failed: {e}")))?;
        }

        let (id, last_lsn) = {
            let region = self.region.lock();
            let detail = region.get(slot, generation)?;
            (detail.txnid, detail.last_lsn)
        };
        if !last_lsn.is_zero() {
            self.undo_chain(last_lsn)
                .map_err(|e| self.panic.set(format!("undo of {id} failed: {e}")))?;
        }
        // An aborted transaction no longer holds back in-memory reclaim.
        self.set_status(slot, generation, TxnStatus::Aborted)?;
        if !last_lsn.is_zero() {
            match self.log_record(id, last_lsn, &TxnRecord::Abort, PutFlags::NONE) {
                Ok(_) => {}
                Err(CoreError::BufferFull { needed, .. }) if self.log.options().in_memory => {
                    warn!(txnid = %id, needed, "no room for the abort record in the in-memory log");
                }
                Err(e) => {
                    return Err(self.panic.set(format!("abort record for {id} failed: {e}")));
                }
            }
        }
        self.finish(slot, generation, id)?;
        self.counters.record_abort();
        debug!(txnid = %id, "transaction aborted");
        Ok(())
    }

    /// Prepares a top-level transaction for two-phase commit: commits its
    /// children, then writes a synced `Prepare` record carrying `gid`.
    ///
    /// A child failing to commit leaves the transaction running with its
    /// remaining children aborted.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidArgument`] for an empty or oversized `gid`
    /// - [`CoreError::InvalidState`] for a child, an already prepared
    ///   transaction or a resolved handle
    pub fn prepare(&self, txn: &Txn, gid: &[u8]) -> CoreResult<()> {
        self.panic.check()?;
        let xid = GlobalXid::new(gid)?;
        {
            let region = self.region.lock();
            let detail = region.get(txn.slot, txn.generation)?;
            if detail.parent.is_some() {
                return Err(CoreError::invalid_state(
                    "only top-level transactions can be prepared",
                ));
            }
            if detail.status == TxnStatus::Prepared {
                return Err(CoreError::invalid_state(format!(
                    "{} is already prepared",
                    txn.id
                )));
            }
        }

        let kids = self.kids_of(txn.slot, txn.generation)?;
        for (i, &(kid, kid_generation)) in kids.iter().enumerate() {
            if let Err(e) = self.commit_slot(kid, kid_generation, None) {
                for &(other, other_generation) in &kids[i + 1..] {
                    self.abort_slot(other, other_generation)?;
                }
                return Err(e);
            }
        }

        let (last_lsn, begin_lsn) = {
            let region = self.region.lock();
            let detail = region.get(txn.slot, txn.generation)?;
            (detail.last_lsn, detail.begin_lsn)
        };
        let record = TxnRecord::Prepare {
            gid: xid.as_bytes().to_vec(),
            begin_lsn,
        };
        let lsn = self.log_record(txn.id, last_lsn, &record, PutFlags::SYNC)?;
        {
            let mut region = self.region.lock();
            let detail = region.get_mut(txn.slot, txn.generation)?;
            detail.last_lsn = lsn;
            detail.status = TxnStatus::Prepared;
            detail.xid = Some(xid);
        }
        self.counters.record_prepare();
        info!(txnid = %txn.id, lsn = %lsn, "transaction prepared");
        Ok(())
    }

    /// Prepared transactions awaiting the coordinator's decision.
    pub fn prepared(&self) -> Vec<PreparedTxn> {
        let region = self.region.lock();
        region
            .iter()
            .filter(|(_, _, d)| d.status == TxnStatus::Prepared)
            .filter_map(|(slot, generation, d)| {
                d.xid.clone().map(|xid| PreparedTxn {
                    txn: Txn {
                        slot,
                        generation,
                        id: d.txnid,
                    },
                    xid,
                    begin_lsn: d.begin_lsn,
                })
            })
            .collect()
    }

    /// A snapshot of an active transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for a resolved handle.
    pub fn info(&self, txn: &Txn) -> CoreResult<TxnInfo> {
        let region = self.region.lock();
        let detail = region.get(txn.slot, txn.generation)?;
        let parent = detail.parent.and_then(|p| {
            let generation = region.generation(p)?;
            region.get(p, generation).ok().map(|d| d.txnid)
        });
        Ok(TxnInfo {
            id: detail.txnid,
            parent,
            status: detail.status,
            name: detail.name.clone(),
            begin_lsn: detail.begin_lsn,
            last_lsn: detail.last_lsn,
            lock_timeout: detail.lock_timeout,
            txn_timeout: detail.txn_timeout,
            compensating: detail.compensating,
        })
    }

    /// Handles of every active top-level transaction.
    pub fn active_roots(&self) -> Vec<Txn> {
        let region = self.region.lock();
        region
            .iter()
            .filter(|(_, _, d)| d.parent.is_none())
            .map(|(slot, generation, d)| Txn {
                slot,
                generation,
                id: d.txnid,
            })
            .collect()
    }

    /// The user records on a transaction's chain in undo order, following
    /// committed children into their chains.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for a resolved handle; read
    /// errors are passed through.
    pub fn chain(&self, txn: &Txn) -> CoreResult<Vec<LogRecord>> {
        let last_lsn = {
            let region = self.region.lock();
            region.get(txn.slot, txn.generation)?.last_lsn
        };
        let mut records = Vec::new();
        self.walk_chain(last_lsn, |record| {
            records.push(record.clone());
            Ok(())
        })?;
        Ok(records)
    }

    fn undo_chain(&self, last_lsn: Lsn) -> CoreResult<()> {
        let undo = Arc::clone(&*self.undo.read());
        self.walk_chain(last_lsn, |record| {
            debug!(lsn = %record.lsn, txnid = %record.header.txnid, "undoing record");
            undo.undo(record)
        })
    }

    /// Visits the user records reachable backward from `last_lsn`. A
    /// `ChildCommit` diverts the walk into the child's chain; the parent's
    /// chain resumes once the child's reaches ZERO.
    fn walk_chain(
        &self,
        last_lsn: Lsn,
        mut visit: impl FnMut(&LogRecord) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let mut cursor = self.log.cursor();
        let mut resume: Vec<Lsn> = Vec::new();
        let mut next = last_lsn;
        loop {
            if next.is_zero() {
                match resume.pop() {
                    Some(lsn) => {
                        next = lsn;
                        continue;
                    }
                    None => return Ok(()),
                }
            }
            let record = cursor.get(CursorOp::Set(next))?.ok_or_else(|| {
                CoreError::corruption(next, "transaction chain points past the end of the log")
            })?;
            match record.rectype() {
                RecordType::User => {
                    visit(&record)?;
                    next = record.header.prev_lsn;
                }
                RecordType::ChildCommit => {
                    let TxnRecord::ChildCommit { child_last_lsn, .. } =
                        TxnRecord::decode(record.rectype(), record.lsn, &record.payload)?
                    else {
                        return Err(CoreError::corruption(record.lsn, "malformed child commit"));
                    };
                    resume.push(record.header.prev_lsn);
                    next = child_last_lsn;
                }
                RecordType::Commit | RecordType::Abort | RecordType::Prepare => {
                    next = record.header.prev_lsn;
                }
                RecordType::FileHeader | RecordType::TxnRecycle | RecordType::Checkpoint => {
                    return Err(CoreError::corruption(
                        record.lsn,
                        format!("{} record in a transaction chain", record.rectype().name()),
                    ));
                }
            }
        }
    }

    /// Writes a synced checkpoint record. Its recovery start point is the
    /// oldest active begin LSN, or the end of the log when idle.
    ///
    /// # Errors
    ///
    /// Log errors are passed through.
    pub fn checkpoint(&self) -> CoreResult<Lsn> {
        self.panic.check()?;
        let oldest = self.region.lock().oldest_begin_lsn();
        let ckp_lsn = oldest.unwrap_or_else(|| self.log.current_lsn());
        let record = TxnRecord::Checkpoint {
            ckp_lsn,
            timestamp: now_timestamp(),
        };
        let lsn = self.log_record(TxnId::NONE, Lsn::ZERO, &record, PutFlags::SYNC)?;
        self.log.set_checkpoint(ckp_lsn, lsn);
        self.counters.record_checkpoint();
        info!(ckp_lsn = %ckp_lsn, lsn = %lsn, "checkpoint taken");
        Ok(lsn)
    }

    /// A statistics snapshot.
    pub fn stat(&self) -> TxnStat {
        let (last_txnid, max_txnid) = {
            let region = self.region.lock();
            (region.last_txnid(), region.cur_max())
        };
        TxnStat {
            last_txnid,
            max_txnid,
            last_checkpoint: self.log.last_checkpoint(),
            ..self.counters.snapshot()
        }
    }

    /// The log this manager writes to.
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    fn log_record(
        &self,
        txnid: TxnId,
        prev_lsn: Lsn,
        record: &TxnRecord,
        flags: PutFlags,
    ) -> CoreResult<Lsn> {
        self.log
            .put_record(record.rectype(), txnid, prev_lsn, &record.encode(), flags)
    }

    fn kids_of(&self, slot: usize, generation: u64) -> CoreResult<Vec<(usize, u64)>> {
        let region = self.region.lock();
        let detail = region.get(slot, generation)?;
        Ok(detail
            .kids
            .iter()
            .filter_map(|&kid| region.generation(kid).map(|g| (kid, g)))
            .collect())
    }

    /// Advances a chain after a record was written for it. The handle was
    /// checked before the write, so a stale one here means it was resolved
    /// concurrently.
    fn set_last_lsn(&self, slot: usize, generation: u64, lsn: Lsn) -> CoreResult<()> {
        let mut region = self.region.lock();
        let detail = region.get_mut(slot, generation)?;
        detail.last_lsn = lsn;
        Ok(())
    }

    fn set_status(&self, slot: usize, generation: u64, status: TxnStatus) -> CoreResult<()> {
        self.region.lock().get_mut(slot, generation)?.status = status;
        Ok(())
    }

    /// Frees the slot and the transaction's locks. Failure here panics.
    fn finish(&self, slot: usize, generation: u64, id: TxnId) -> CoreResult<()> {
        let released = self.region.lock().release(slot, generation);
        if let Err(e) = released {
            return Err(self.panic.set(format!("releasing {id} failed: {e}")));
        }
        let locks = Arc::clone(&*self.locks.read());
        if let Err(e) = locks.release_all(id) {
            return Err(self.panic.set(format!("releasing locks of {id} failed: {e}")));
        }
        Ok(())
    }
}

impl ActiveHorizon for TransactionManager {
    fn oldest_active_lsn(&self) -> Option<Lsn> {
        self.region.lock().oldest_begin_lsn()
    }
}
