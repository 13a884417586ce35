//! Environment facade.

use crate::config::Config;
use crate::crypto;
#[cfg(feature = "std")]
use crate::dir::EnvDir;
use crate::error::{CoreError, CoreResult};
use crate::log::{
    ActiveHorizon, CursorOp, LogCursor, LogManager, LogOptions, RecordCodec, RecordType,
};
use crate::panic::PanicState;
use crate::stats::{LogStat, TxnStat};
use crate::txn::{
    LockCollaborator, PreparedTxn, TransactionManager, Txn, TxnInfo, TxnOptions, TxnRecord,
    UndoHandler,
};
use crate::types::{Lsn, PutFlags, SyncPolicy, TxnId};
use parking_lot::RwLock;
use skein_storage::{LogDirectory, MemoryDirectory};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The main environment handle.
///
/// An environment owns one log and the transaction manager writing to it:
/// - Non-transactional log records via [`Environment::log_put`]
/// - Transactions, nested transactions and two-phase commit
/// - Cursors over the log
/// - Checkpoints and removal of log files no longer needed
///
/// # Opening an Environment
///
/// ```rust,ignore
/// use skein_core::{Config, Environment, TxnOptions};
/// use std::path::Path;
///
/// let env = Environment::open(Path::new("my_env"), Config::default())?;
/// let txn = env.txn_begin(None, TxnOptions::new())?;
/// env.txn_put(&txn, b"page 7: 12 -> 13")?;
/// env.txn_commit(&txn, None)?;
/// env.close()?;
/// ```
///
/// # In-Memory Environments
///
/// ```rust,ignore
/// let env = Environment::open_in_memory(Config::memory())?;
/// ```
///
/// # Panics
///
/// After an integrity failure (an I/O error, a corrupt record, a failed
/// undo) the environment is panicked: every mutating call returns
/// [`CoreError::RunRecovery`] until it is reopened.
pub struct Environment {
    config: Config,
    /// Locked directory. None for environments without one.
    #[cfg(feature = "std")]
    dir: Option<EnvDir>,
    log: Arc<LogManager>,
    txns: Arc<TransactionManager>,
    panic: Arc<PanicState>,
    is_open: RwLock<bool>,
}

impl Environment {
    /// Opens an environment in a directory, creating it if the
    /// configuration allows.
    ///
    /// The directory is locked for the lifetime of the environment. An
    /// in-memory configuration still locks the directory but keeps the log
    /// in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is inconsistent (`Config`)
    /// - Another process has the environment open (`EnvironmentLocked`)
    /// - The last log file is damaged beyond repair (`Corruption`)
    /// - I/O errors occur
    #[cfg(feature = "std")]
    pub fn open(path: &std::path::Path, config: Config) -> CoreResult<Self> {
        use skein_storage::FsDirectory;

        config.validate()?;
        let dir = EnvDir::open(path, config.create_if_missing)?;
        let logs: Arc<dyn LogDirectory> = if config.in_memory {
            Arc::new(MemoryDirectory::new())
        } else {
            Arc::new(FsDirectory::open(dir.path())?)
        };
        info!(path = %path.display(), in_memory = config.in_memory, "opening environment");
        Self::build(config, Some(dir), logs)
    }

    /// Opens an environment whose log lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent.
    pub fn open_in_memory(config: Config) -> CoreResult<Self> {
        let config = config.in_memory(true);
        config.validate()?;
        Self::build(config, None, Arc::new(MemoryDirectory::new()))
    }

    /// Opens an environment over an existing log directory. Nothing is
    /// locked.
    ///
    /// # Errors
    ///
    /// See [`Environment::open`].
    pub fn open_with_directory(config: Config, logs: Arc<dyn LogDirectory>) -> CoreResult<Self> {
        config.validate()?;
        Self::build(config, None, logs)
    }

    fn build(
        config: Config,
        #[cfg(feature = "std")] dir: Option<EnvDir>,
        #[cfg(not(feature = "std"))] _dir: Option<()>,
        logs: Arc<dyn LogDirectory>,
    ) -> CoreResult<Self> {
        let adapter = crypto::adapter_for(config.encryption_key.as_ref())?;
        let codec = Arc::new(RecordCodec::new(adapter));
        let panic = Arc::new(PanicState::new());
        let log = Arc::new(LogManager::open(
            LogOptions::from(&config),
            logs,
            codec,
            Arc::clone(&panic),
        )?);
        let txns = Arc::new(TransactionManager::new(Arc::clone(&log), &config));
        let horizon: Arc<dyn ActiveHorizon> = Arc::clone(&txns) as Arc<dyn ActiveHorizon>;
        log.set_horizon(Arc::downgrade(&horizon));

        if !config.in_memory {
            recover_checkpoint(&log);
        }
        debug!(lsn = %log.current_lsn(), "environment open");

        Ok(Self {
            config,
            #[cfg(feature = "std")]
            dir,
            log,
            txns,
            panic,
            is_open: RwLock::new(true),
        })
    }

    /// Returns the configuration the environment was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The environment directory, if it has one.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        self.dir.as_ref().map(EnvDir::path)
    }

    // ========================================================================
    // Log
    // ========================================================================

    /// Appends a non-transactional record.
    ///
    /// # Errors
    ///
    /// See [`LogManager::put`].
    pub fn log_put(&self, payload: &[u8], flags: PutFlags) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.log
            .put_record(RecordType::User, TxnId::NONE, Lsn::ZERO, payload, flags)
    }

    /// Opens an unpositioned cursor over the log.
    #[must_use]
    pub fn log_cursor(&self) -> LogCursor {
        self.log.cursor()
    }

    /// Writes and syncs the log up to `target`, or all of it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RunRecovery`] if the write fails.
    pub fn log_flush(&self, target: Option<Lsn>) -> CoreResult<()> {
        self.ensure_open()?;
        self.log.flush(target, true)
    }

    /// The log manager.
    #[must_use]
    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a transaction. See [`TransactionManager::begin`].
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::begin`].
    pub fn txn_begin(&self, parent: Option<&Txn>, options: TxnOptions) -> CoreResult<Txn> {
        self.ensure_open()?;
        self.txns.begin(parent, options)
    }

    /// Logs a record on a transaction's chain.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::put`].
    pub fn txn_put(&self, txn: &Txn, payload: &[u8]) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txns.put(txn, payload)
    }

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::commit`].
    pub fn txn_commit(&self, txn: &Txn, sync: Option<SyncPolicy>) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.commit(txn, sync)
    }

    /// Aborts a transaction.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::abort`].
    pub fn txn_abort(&self, txn: &Txn) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.abort(txn)
    }

    /// Prepares a transaction for two-phase commit.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::prepare`].
    pub fn txn_prepare(&self, txn: &Txn, gid: &[u8]) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns.prepare(txn, gid)
    }

    /// Prepared transactions awaiting a decision.
    #[must_use]
    pub fn txn_prepared(&self) -> Vec<PreparedTxn> {
        self.txns.prepared()
    }

    /// A snapshot of an active transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidState`] for a resolved handle.
    pub fn txn_info(&self, txn: &Txn) -> CoreResult<TxnInfo> {
        self.txns.info(txn)
    }

    /// Takes a checkpoint, returning the checkpoint record's LSN.
    ///
    /// # Errors
    ///
    /// See [`TransactionManager::checkpoint`].
    pub fn txn_checkpoint(&self) -> CoreResult<Lsn> {
        self.ensure_open()?;
        self.txns.checkpoint()
    }

    /// The transaction manager.
    #[must_use]
    pub fn txns(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    /// Installs the undo handler used by abort.
    pub fn set_undo_handler(&self, handler: Arc<dyn UndoHandler>) {
        self.txns.set_undo_handler(handler);
    }

    /// Installs the lock manager.
    pub fn set_lock_collaborator(&self, locks: Arc<dyn LockCollaborator>) {
        self.txns.set_lock_collaborator(locks);
    }

    /// Enters or leaves recovery mode.
    pub fn set_recovering(&self, recovering: bool) {
        self.txns.set_recovering(recovering);
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Log files older than the last checkpoint and every active
    /// transaction, removed first when `remove` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or a file cannot
    /// be removed.
    pub fn archive(&self, remove: bool) -> CoreResult<Vec<u32>> {
        self.ensure_open()?;
        if remove {
            self.panic.check()?;
            self.log.remove_archivable()
        } else {
            self.log.archivable()
        }
    }

    /// Log statistics.
    #[must_use]
    pub fn log_stat(&self) -> LogStat {
        self.log.stat()
    }

    /// Transaction statistics.
    #[must_use]
    pub fn txn_stat(&self) -> TxnStat {
        self.txns.stat()
    }

    /// Whether an integrity failure has panicked the environment.
    #[must_use]
    pub fn is_panicked(&self) -> bool {
        self.panic.is_panicked()
    }

    /// Why the environment panicked, if it did.
    #[must_use]
    pub fn panic_reason(&self) -> Option<String> {
        self.panic.reason()
    }

    /// Closes the environment: aborts running top-level transactions and
    /// syncs the log. Prepared transactions are left for the coordinator
    /// to resolve after reopening.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RunRecovery`] if the environment has panicked,
    /// or the first error from aborting or syncing.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        *is_open = false;
        self.panic.check()?;

        for txn in self.txns.active_roots() {
            match self.txns.info(&txn) {
                Ok(info) if info.status == crate::txn::TxnStatus::Prepared => {
                    warn!(txnid = %txn.id(), "prepared transaction left unresolved at close");
                }
                Ok(_) => {
                    warn!(txnid = %txn.id(), "aborting transaction left open at close");
                    self.txns.abort(&txn)?;
                }
                Err(_) => {}
            }
        }
        if !self.config.in_memory {
            self.log.flush(None, true)?;
        }
        info!(lsn = %self.log.current_lsn(), "environment closed");
        Ok(())
    }

    /// Checks if the environment is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::invalid_state("environment is closed"))
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("in_memory", &self.config.in_memory)
            .field("log", &self.log)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Restores the recovery start point of the last checkpoint. Opening the
/// log located the record; damage to it is logged and leaves the
/// environment without a checkpoint.
fn recover_checkpoint(log: &Arc<LogManager>) {
    let record_lsn = log.last_checkpoint();
    if record_lsn.is_zero() {
        return;
    }
    let mut cursor = log.cursor().silent();
    let found = match cursor.get(CursorOp::Set(record_lsn)) {
        Ok(Some(record)) if record.rectype() == RecordType::Checkpoint => {
            TxnRecord::decode(record.rectype(), record.lsn, &record.payload).ok()
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "checkpoint lookup failed");
            None
        }
    };
    match found {
        Some(TxnRecord::Checkpoint { ckp_lsn, .. }) => {
            debug!(ckp_lsn = %ckp_lsn, lsn = %record_lsn, "found last checkpoint");
            log.set_checkpoint(ckp_lsn, record_lsn);
        }
        _ => {
            warn!(lsn = %record_lsn, "unreadable checkpoint record");
            log.set_checkpoint(Lsn::ZERO, Lsn::ZERO);
        }
    }
}
