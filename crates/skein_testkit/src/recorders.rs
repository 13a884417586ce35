//! Collaborators that record what the transaction manager asks of them.

use parking_lot::Mutex;
use skein_core::log::LogRecord;
use skein_core::{CoreError, CoreResult, LockCollaborator, Lsn, TxnId, UndoHandler};

/// One call to [`UndoHandler::undo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoCall {
    /// The undone record.
    pub lsn: Lsn,
    /// The transaction that logged it.
    pub txnid: TxnId,
    /// Its payload.
    pub payload: Vec<u8>,
}

/// An undo handler that remembers every record it was asked to undo.
#[derive(Debug, Default)]
pub struct RecordingUndo {
    calls: Mutex<Vec<UndoCall>>,
    fail_on: Option<Vec<u8>>,
}

impl RecordingUndo {
    /// Creates a handler that accepts every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that fails when asked to undo `payload`.
    pub fn failing_on(payload: &[u8]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(payload.to_vec()),
        }
    }

    /// Calls so far, in order.
    pub fn calls(&self) -> Vec<UndoCall> {
        self.calls.lock().clone()
    }

    /// Payloads undone so far, in order.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.calls.lock().iter().map(|c| c.payload.clone()).collect()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl UndoHandler for RecordingUndo {
    fn undo(&self, record: &LogRecord) -> CoreResult<()> {
        if self.fail_on.as_deref() == Some(record.payload.as_slice()) {
            return Err(CoreError::invalid_state(format!(
                "refusing to undo record {}",
                record.lsn
            )));
        }
        self.calls.lock().push(UndoCall {
            lsn: record.lsn,
            txnid: record.header.txnid,
            payload: record.payload.clone(),
        });
        Ok(())
    }
}

/// A lock release observed by [`RecordingLocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// Read locks released ahead of a commit record.
    ReadLocks(TxnId),
    /// All locks released at resolution.
    All(TxnId),
}

/// A lock collaborator that records releases.
#[derive(Debug, Default)]
pub struct RecordingLocks {
    events: Mutex<Vec<LockEvent>>,
    refuse_read_release: bool,
}

impl RecordingLocks {
    /// Creates a collaborator that accepts every release.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collaborator whose read-lock release always fails.
    pub fn refusing_read_release() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            refuse_read_release: true,
        }
    }

    /// Releases so far, in order.
    pub fn events(&self) -> Vec<LockEvent> {
        self.events.lock().clone()
    }
}

impl LockCollaborator for RecordingLocks {
    fn release_read_locks(&self, txnid: TxnId) -> CoreResult<()> {
        if self.refuse_read_release {
            return Err(CoreError::invalid_state(format!(
                "cannot release read locks of {txnid}"
            )));
        }
        self.events.lock().push(LockEvent::ReadLocks(txnid));
        Ok(())
    }

    fn release_all(&self, txnid: TxnId) -> CoreResult<()> {
        self.events.lock().push(LockEvent::All(txnid));
        Ok(())
    }
}
