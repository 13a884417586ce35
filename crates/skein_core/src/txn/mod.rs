//! Transactions.
//!
//! Each transaction threads its records into a backward chain through the
//! `prev_lsn` field of the record header. A committed child's chain is
//! spliced into its parent's with a `ChildCommit` record, so aborting the
//! parent later undoes the child's work too.
//!
//! Access methods plug in through two traits:
//!
//! - [`UndoHandler`] reverts one logged change during abort
//! - [`LockCollaborator`] releases locks when a transaction resolves

pub mod manager;
pub mod record;
mod state;

pub use manager::TransactionManager;
pub use record::TxnRecord;
pub use state::largest_gap;

use crate::error::{CoreError, CoreResult};
use crate::log::LogRecord;
use crate::types::{Lsn, SyncPolicy, TxnId};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Longest global transaction id accepted by `prepare`.
pub const MAX_GID_LEN: usize = 128;

/// Handle to an active transaction.
///
/// Handles are plain values; once the transaction commits or aborts every
/// copy of the handle is stale and operations on it fail with
/// [`CoreError::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Txn {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
    pub(crate) id: TxnId,
}

impl Txn {
    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }
}

impl fmt::Display for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Accepting records.
    Running,
    /// Prepared; awaiting the coordinator's commit or abort.
    Prepared,
    /// Committed.
    Committed,
    /// Rolled back.
    Aborted,
}

impl TxnStatus {
    /// Returns true once the transaction is committed or aborted.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// Options for [`TransactionManager::begin`].
#[derive(Debug, Clone, Default)]
pub struct TxnOptions {
    /// Name shown in diagnostics.
    pub name: Option<String>,
    /// Lock wait timeout; inherited from the parent when unset.
    pub lock_timeout: Option<Duration>,
    /// Transaction timeout; inherited from the parent when unset.
    pub txn_timeout: Option<Duration>,
    /// Commit durability; the environment default when unset.
    pub sync: Option<SyncPolicy>,
    /// May log while the environment is recovering.
    pub compensating: bool,
}

impl TxnOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sets the transaction timeout.
    #[must_use]
    pub const fn txn_timeout(mut self, timeout: Duration) -> Self {
        self.txn_timeout = Some(timeout);
        self
    }

    /// Sets the commit durability.
    #[must_use]
    pub const fn sync(mut self, policy: SyncPolicy) -> Self {
        self.sync = Some(policy);
        self
    }

    /// Marks the transaction as compensating.
    #[must_use]
    pub const fn compensating(mut self) -> Self {
        self.compensating = true;
        self
    }
}

/// Global transaction id assigned by a two-phase-commit coordinator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GlobalXid(Vec<u8>);

impl GlobalXid {
    /// Wraps `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `bytes` is empty or longer
    /// than [`MAX_GID_LEN`].
    pub fn new(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.is_empty() || bytes.len() > MAX_GID_LEN {
            return Err(CoreError::invalid_argument(format!(
                "global transaction id must be 1 to {MAX_GID_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// The raw id.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for GlobalXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "GlobalXid({s:?})"),
            Err(_) => write!(f, "GlobalXid({} bytes)", self.0.len()),
        }
    }
}

/// A prepared transaction awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTxn {
    /// Handle for the coordinator's commit or abort.
    pub txn: Txn,
    /// Global id given at prepare.
    pub xid: GlobalXid,
    /// Where the transaction began.
    pub begin_lsn: Lsn,
}

/// Snapshot of an active transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnInfo {
    /// The transaction id.
    pub id: TxnId,
    /// Parent id, for nested transactions.
    pub parent: Option<TxnId>,
    /// Current status.
    pub status: TxnStatus,
    /// Name given at begin.
    pub name: Option<String>,
    /// Where the transaction began.
    pub begin_lsn: Lsn,
    /// Most recent record of its chain, ZERO if it logged nothing.
    pub last_lsn: Lsn,
    /// Effective lock wait timeout.
    pub lock_timeout: Option<Duration>,
    /// Effective transaction timeout.
    pub txn_timeout: Option<Duration>,
    /// Whether it may log during recovery.
    pub compensating: bool,
}

/// Reverts logged changes during abort.
pub trait UndoHandler: Send + Sync {
    /// Undoes one user record. `record.header.txnid` is the transaction
    /// that logged it, which is a child of the aborting transaction when the
    /// record arrived through a commit splice.
    ///
    /// # Errors
    ///
    /// Any error panics the environment.
    fn undo(&self, record: &LogRecord) -> CoreResult<()>;
}

/// Undo handler that only traces.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUndo;

impl UndoHandler for NoopUndo {
    fn undo(&self, record: &LogRecord) -> CoreResult<()> {
        debug!(lsn = %record.lsn, txnid = %record.header.txnid, "no undo handler registered");
        Ok(())
    }
}

/// The lock manager, as seen by transaction resolution.
pub trait LockCollaborator: Send + Sync {
    /// Releases read locks before a top-level commit record is written.
    ///
    /// # Errors
    ///
    /// An error aborts the committing transaction.
    fn release_read_locks(&self, txnid: TxnId) -> CoreResult<()>;

    /// Releases every lock once the transaction is resolved.
    ///
    /// # Errors
    ///
    /// Any error panics the environment.
    fn release_all(&self, txnid: TxnId) -> CoreResult<()>;
}

/// Lock collaborator that holds no locks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocks;

impl LockCollaborator for NoopLocks {
    fn release_read_locks(&self, txnid: TxnId) -> CoreResult<()> {
        debug!(txnid = %txnid, "releasing read locks");
        Ok(())
    }

    fn release_all(&self, txnid: TxnId) -> CoreResult<()> {
        debug!(txnid = %txnid, "releasing all locks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gid_bounds() {
        assert!(GlobalXid::new(b"").is_err());
        assert!(GlobalXid::new(&[7; MAX_GID_LEN]).is_ok());
        assert!(GlobalXid::new(&[7; MAX_GID_LEN + 1]).is_err());
        assert_eq!(format!("{:?}", GlobalXid::new(b"xa-1").unwrap()), "GlobalXid(\"xa-1\")");
    }

    #[test]
    fn options_builder() {
        let opts = TxnOptions::new()
            .name("loader")
            .lock_timeout(Duration::from_millis(50))
            .sync(SyncPolicy::NoSync)
            .compensating();
        assert_eq!(opts.name.as_deref(), Some("loader"));
        assert_eq!(opts.lock_timeout, Some(Duration::from_millis(50)));
        assert_eq!(opts.txn_timeout, None);
        assert_eq!(opts.sync, Some(SyncPolicy::NoSync));
        assert!(opts.compensating);
    }
}
