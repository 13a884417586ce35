//! The log buffer: a fixed-capacity ring holding the tail of the log.
//!
//! Positions are logical byte offsets that only grow; the ring index of a
//! position is `pos % capacity`. Three positions partition the bytes held:
//!
//! ```text
//!   a_off          w_off                 b_off
//!     |  written    |  not yet written    |  free ...
//! ```
//!
//! - `a_off`: oldest byte still held (everything before it may be overwritten)
//! - `w_off`: next byte to write to the current file
//! - `b_off`: next byte to append
//!
//! `a_off <= w_off <= b_off` and `b_off - a_off <= capacity` always hold.
//! The buffer does no I/O and takes no locks; the log manager owns both.

use crate::error::{CoreError, CoreResult};

/// Ring buffer of log bytes.
#[derive(Debug)]
pub struct LogBuffer {
    data: Vec<u8>,
    a_off: u64,
    w_off: u64,
    b_off: u64,
}

impl LogBuffer {
    /// Creates an empty buffer of `capacity` bytes starting at position 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            a_off: 0,
            w_off: 0,
            b_off: 0,
        }
    }

    /// Empties the buffer and restarts positions at `pos`.
    pub fn reset(&mut self, pos: u64) {
        self.a_off = pos;
        self.w_off = pos;
        self.b_off = pos;
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Oldest position still held.
    #[must_use]
    pub fn a_off(&self) -> u64 {
        self.a_off
    }

    /// Next position to write out.
    #[must_use]
    pub fn w_off(&self) -> u64 {
        self.w_off
    }

    /// Next position to append at.
    #[must_use]
    pub fn b_off(&self) -> u64 {
        self.b_off
    }

    /// Bytes that can be appended without reclaiming.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity() - (self.b_off - self.a_off) as usize
    }

    /// Bytes appended but not yet written out.
    #[must_use]
    pub fn pending(&self) -> usize {
        (self.b_off - self.w_off) as usize
    }

    /// Returns the ring slices covering positions `[start, end)`.
    fn slices(&self, start: u64, end: u64) -> (&[u8], &[u8]) {
        let cap = self.capacity() as u64;
        if start == end {
            return (&[], &[]);
        }
        let from = (start % cap) as usize;
        let len = (end - start) as usize;
        if from + len <= self.data.len() {
            (&self.data[from..from + len], &[])
        } else {
            let first = self.data.len() - from;
            (&self.data[from..], &self.data[..len - first])
        }
    }

    /// Appends `bytes` at `b_off`, returning the position they start at.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BufferFull`] if fewer than `bytes.len()` bytes
    /// are free; the caller reclaims or writes out first.
    pub fn append(&mut self, bytes: &[u8]) -> CoreResult<u64> {
        if bytes.len() > self.free() {
            return Err(CoreError::BufferFull {
                needed: bytes.len(),
                capacity: self.capacity(),
            });
        }
        let start = self.b_off;
        let cap = self.capacity();
        let from = (start % cap as u64) as usize;
        let first = bytes.len().min(cap - from);
        self.data[from..from + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.b_off += bytes.len() as u64;
        Ok(start)
    }

    /// The bytes in `[w_off, b_off)`, as at most two slices.
    #[must_use]
    pub fn pending_slices(&self) -> (&[u8], &[u8]) {
        self.slices(self.w_off, self.b_off)
    }

    /// Records that everything before `pos` has been written out.
    pub fn mark_written(&mut self, pos: u64) {
        debug_assert!(self.w_off <= pos && pos <= self.b_off);
        self.w_off = pos.clamp(self.w_off, self.b_off);
    }

    /// Releases the bytes before `pos`, never past `w_off`.
    ///
    /// Returns true if `a_off` moved.
    pub fn reclaim(&mut self, pos: u64) -> bool {
        let target = pos.min(self.w_off);
        if target > self.a_off {
            self.a_off = target;
            true
        } else {
            false
        }
    }

    /// Returns true if `[pos, pos + len)` is held.
    #[must_use]
    pub fn contains(&self, pos: u64, len: usize) -> bool {
        pos >= self.a_off && pos + len as u64 <= self.b_off
    }

    /// Copies out `[pos, pos + len)`, or `None` if any of it is not held.
    #[must_use]
    pub fn copy_out(&self, pos: u64, len: usize) -> Option<Vec<u8>> {
        if !self.contains(pos, len) {
            return None;
        }
        let (first, second) = self.slices(pos, pos + len as u64);
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        Some(out)
    }
}
