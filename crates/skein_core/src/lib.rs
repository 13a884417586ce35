//! # skein core
//!
//! Write-ahead log and transaction coordinator.
//!
//! This crate provides:
//! - A segmented, checksummed write-ahead log addressed by [`Lsn`]
//! - A shared log buffer with group commit and in-memory operation
//! - Cursors that walk the log in both directions across files
//! - Transactions with nested children, undo on abort and two-phase commit
//! - Optional record encryption (feature `encryption`)
//!
//! Most callers only need [`Environment`]:
//!
//! ```rust,ignore
//! use skein_core::{Config, CursorOp, Environment, TxnOptions};
//!
//! let env = Environment::open_in_memory(Config::memory())?;
//! let txn = env.txn_begin(None, TxnOptions::new())?;
//! env.txn_put(&txn, b"A")?;
//! env.txn_commit(&txn, None)?;
//!
//! let mut cursor = env.log_cursor();
//! while let Some(record) = cursor.get(CursorOp::Next)? {
//!     println!("{} {:?}", record.lsn, record.rectype());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
#[cfg(feature = "std")]
pub mod dir;
pub mod env;
pub mod error;
pub mod log;
pub mod panic;
pub mod stats;
pub mod txn;
pub mod types;

pub use config::Config;
pub use crypto::{CryptoAdapter, EncryptionKey};
pub use env::Environment;
pub use error::{CoreError, CoreResult};
pub use log::{
    ActiveHorizon, CursorOp, LogCursor, LogFileManager, LogManager, LogOptions, LogRecord,
    RecordCodec, RecordHeader, RecordType,
};
pub use panic::PanicState;
pub use stats::{LogStat, TxnStat};
pub use txn::{
    GlobalXid, LockCollaborator, NoopLocks, NoopUndo, PreparedTxn, TransactionManager, Txn,
    TxnInfo, TxnOptions, TxnRecord, TxnStatus, UndoHandler,
};
pub use types::{Lsn, PutFlags, SyncPolicy, TxnId, TXN_MINIMUM};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
