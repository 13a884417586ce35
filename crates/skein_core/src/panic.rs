//! Environment-wide panic state.
//!
//! Once an integrity failure escapes a component (a checksum failure on a
//! directed read, an I/O error writing the log, a failed undo), the
//! environment refuses further work until it is reopened and recovery is
//! run.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

/// Shared flag recording that the environment must be recovered.
#[derive(Debug, Default)]
pub struct PanicState {
    panicked: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl PanicState {
    /// Creates a healthy state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the environment has panicked.
    pub fn is_panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    /// The failure that caused the panic, if any.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Fails with [`CoreError::RunRecovery`] if the environment has panicked.
    ///
    /// # Errors
    ///
    /// Returns `RunRecovery` carrying the original failure.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_panicked() {
            return Err(CoreError::run_recovery(
                self.reason().unwrap_or_else(|| "environment panicked".to_string()),
            ));
        }
        Ok(())
    }

    /// Panics the environment. The first reason wins.
    pub fn set(&self, reason: impl Into<String>) -> CoreError {
        let reason = reason.into();
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                error!(reason = %reason, "environment panic");
                *slot = Some(reason.clone());
            }
        }
        self.panicked.store(true, Ordering::Release);
        CoreError::run_recovery(reason)
    }

    /// Panics the environment if `result` carries a fatal error; the error
    /// itself is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error in `result`.
    pub fn escalate<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() && !matches!(e, CoreError::RunRecovery { .. }) {
                self.set(e.to_string());
            }
        }
        result
    }
}
