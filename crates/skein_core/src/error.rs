//! Error types for skein core.

use crate::types::Lsn;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in skein core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] skein_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log record or file header is malformed.
    #[error("log corruption at {lsn}: {message}")]
    Corruption {
        /// Position of the damaged record.
        lsn: Lsn,
        /// Description of the corruption.
        message: String,
    },

    /// A record's stored checksum does not match its contents.
    #[error("checksum mismatch in log record {lsn}")]
    ChecksumMismatch {
        /// Position of the damaged record.
        lsn: Lsn,
    },

    /// Fewer bytes exist than a record header promises.
    #[error("short read at {lsn}: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Position of the record.
        lsn: Lsn,
        /// Bytes the header promised.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The in-memory log buffer cannot make room for a record.
    #[error("log buffer full: need {needed} bytes of {capacity}")]
    BufferFull {
        /// Bytes the record needs.
        needed: usize,
        /// Buffer capacity.
        capacity: usize,
    },

    /// A record cannot fit in a single log file or buffer.
    #[error("log record of {len} bytes exceeds the maximum of {max}")]
    RecordTooLarge {
        /// Framed record length.
        len: usize,
        /// Largest record that fits.
        max: usize,
    },

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A caller-supplied argument is unusable.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument problem.
        message: String,
    },

    /// Inconsistent configuration or unsupported on-disk version.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// Every transaction id in the window is in use.
    #[error("transaction id space exhausted")]
    TxnIdSpaceExhausted,

    /// The transaction table is full.
    #[error("too many active transactions (max {max})")]
    TooManyTransactions {
        /// Configured slot count.
        max: usize,
    },

    /// The environment hit an unrecoverable failure.
    #[error("environment panic, run recovery: {reason}")]
    RunRecovery {
        /// The failure that caused the panic.
        reason: String,
    },

    /// Another process holds the environment directory.
    #[error("environment locked: another process has exclusive access")]
    EnvironmentLocked,

    /// Encryption is not enabled.
    #[error("encryption feature not enabled")]
    EncryptionNotEnabled,

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corruption(lsn: Lsn, message: impl Into<String>) -> Self {
        Self::Corruption {
            lsn,
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a run-recovery error.
    pub fn run_recovery(reason: impl Into<String>) -> Self {
        Self::RunRecovery {
            reason: reason.into(),
        }
    }

    /// Creates an encryption not enabled error.
    pub fn encryption_not_enabled() -> Self {
        Self::EncryptionNotEnabled
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation failed error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Returns true for damaged-record errors (bad format or checksum).
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } | Self::DecryptionFailed { .. }
        )
    }

    /// Returns true for integrity failures that put the environment into
    /// the panic state when they surface from a directed read or write.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_corruption()
            || matches!(
                self,
                Self::ShortRead { .. } | Self::Io(_) | Self::Storage(_) | Self::RunRecovery { .. }
            )
    }
}
