//! Environment configuration.

use crate::crypto::EncryptionKey;
use crate::error::{CoreError, CoreResult};
use crate::types::SyncPolicy;
use std::time::Duration;

/// Smallest accepted log buffer.
pub const MIN_LOG_BUFFER_SIZE: usize = 1024;

/// Smallest accepted log file size.
pub const MIN_LOG_FILE_SIZE: u32 = 1024;

/// Largest transaction id window (every id from `TXN_MINIMUM` to `u32::MAX`).
pub const MAX_TXN_ID_WINDOW: u32 = 0x8000_0000;

/// Configuration for opening an environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the log buffer in bytes.
    pub log_buffer_size: usize,

    /// Maximum size of a single log file before rotation.
    pub log_file_size: u32,

    /// File size to use from the next rotation on, if set.
    pub next_log_file_size: Option<u32>,

    /// Keep the log entirely in memory.
    pub in_memory: bool,

    /// Remove log files no longer needed after each rotation.
    pub auto_remove: bool,

    /// Commit durability when a commit names no policy.
    pub default_sync: SyncPolicy,

    /// Number of transaction ids available before ids are recycled.
    pub txn_id_window: u32,

    /// Maximum number of concurrently active transactions.
    pub max_txns: usize,

    /// Lock wait timeout handed to new top-level transactions.
    pub lock_timeout: Option<Duration>,

    /// Transaction timeout handed to new top-level transactions.
    pub txn_timeout: Option<Duration>,

    /// Unix mode recorded for new log files.
    pub file_mode: u32,

    /// Whether to create the environment directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Key for encrypting log records, if any.
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_buffer_size: 256 * 1024,      // 256 KB
            log_file_size: 10 * 1024 * 1024, // 10 MB
            next_log_file_size: None,
            in_memory: false,
            auto_remove: false,
            default_sync: SyncPolicy::Sync,
            txn_id_window: MAX_TXN_ID_WINDOW,
            max_txns: 1024,
            lock_timeout: None,
            txn_timeout: None,
            file_mode: 0o600,
            create_if_missing: true,
            encryption_key: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for an in-memory log: 1 MB virtual files in a 4 MB buffer.
    #[must_use]
    pub fn memory() -> Self {
        Self::default()
            .in_memory(true)
            .log_buffer_size(4 * 1024 * 1024)
            .log_file_size(1024 * 1024)
    }

    /// Sets the log buffer capacity.
    #[must_use]
    pub const fn log_buffer_size(mut self, size: usize) -> Self {
        self.log_buffer_size = size;
        self
    }

    /// Sets the maximum log file size.
    #[must_use]
    pub const fn log_file_size(mut self, size: u32) -> Self {
        self.log_file_size = size;
        self
    }

    /// Sets the file size that takes effect at the next rotation.
    #[must_use]
    pub const fn next_log_file_size(mut self, size: u32) -> Self {
        self.next_log_file_size = Some(size);
        self
    }

    /// Sets whether the log lives only in memory.
    #[must_use]
    pub const fn in_memory(mut self, value: bool) -> Self {
        self.in_memory = value;
        self
    }

    /// Sets whether unneeded log files are removed automatically.
    #[must_use]
    pub const fn auto_remove(mut self, value: bool) -> Self {
        self.auto_remove = value;
        self
    }

    /// Sets the default commit durability.
    #[must_use]
    pub const fn default_sync(mut self, policy: SyncPolicy) -> Self {
        self.default_sync = policy;
        self
    }

    /// Sets the transaction id recycle window.
    #[must_use]
    pub const fn txn_id_window(mut self, window: u32) -> Self {
        self.txn_id_window = window;
        self
    }

    /// Sets the transaction table size.
    #[must_use]
    pub const fn max_txns(mut self, max: usize) -> Self {
        self.max_txns = max;
        self
    }

    /// Sets the default lock wait timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sets the default transaction timeout.
    #[must_use]
    pub const fn txn_timeout(mut self, timeout: Duration) -> Self {
        self.txn_timeout = Some(timeout);
        self
    }

    /// Sets the mode recorded for new log files.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Sets whether to create the environment directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Encrypts log records with `key`.
    #[must_use]
    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Largest file size this configuration can produce.
    #[must_use]
    pub fn max_log_file_size(&self) -> u32 {
        self.log_file_size
            .max(self.next_log_file_size.unwrap_or(self.log_file_size))
    }

    /// Checks the configuration for inconsistent sizing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.log_buffer_size < MIN_LOG_BUFFER_SIZE {
            return Err(CoreError::config(format!(
                "log buffer size {} is below the minimum of {MIN_LOG_BUFFER_SIZE}",
                self.log_buffer_size
            )));
        }
        for size in std::iter::once(self.log_file_size).chain(self.next_log_file_size) {
            if size < MIN_LOG_FILE_SIZE {
                return Err(CoreError::config(format!(
                    "log file size {size} is below the minimum of {MIN_LOG_FILE_SIZE}"
                )));
            }
        }
        if self.in_memory && self.log_buffer_size < self.max_log_file_size() as usize {
            return Err(CoreError::config(format!(
                "in-memory log buffer ({}) must hold at least one log file ({})",
                self.log_buffer_size,
                self.max_log_file_size()
            )));
        }
        if self.txn_id_window < 2 || self.txn_id_window > MAX_TXN_ID_WINDOW {
            return Err(CoreError::config(format!(
                "transaction id window {} must be between 2 and {MAX_TXN_ID_WINDOW}",
                self.txn_id_window
            )));
        }
        if self.max_txns == 0 {
            return Err(CoreError::config("max_txns must be at least 1"));
        }
        Ok(())
    }
}
