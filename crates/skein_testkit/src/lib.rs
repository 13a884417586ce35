//! # skein testkit
//!
//! Test utilities for skein.
//!
//! This crate provides:
//! - Environment fixtures over temporary directories and in-memory logs
//! - Property-based test generators using proptest
//! - A recording undo handler and lock collaborator
//! - Fault injection for log files (flipped bytes, torn tails, blank files)
//!
//! Cross-module scenarios live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skein_testkit::prelude::*;
//!
//! #[test]
//! fn commit_is_logged() {
//!     with_memory_env(|env| {
//!         let txn = env.txn_begin(None, TxnOptions::new()).unwrap();
//!         env.txn_put(&txn, b"A").unwrap();
//!         env.txn_commit(&txn, None).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod recorders;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::recorders::*;
    pub use skein_core::{
        Config, CoreError, CursorOp, Environment, LogRecord, Lsn, PutFlags, RecordType,
        SyncPolicy, TxnOptions, TxnRecord,
    };
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use recorders::*;
