//! Core type definitions for skein.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// Log sequence number: the position of a record in the log.
///
/// LSNs are totally ordered by `(file, offset)` and never reused. Log files
/// are numbered from 1, so [`Lsn::ZERO`] never names a real record and is
/// used to mean "none" (for example, the end of a transaction's chain).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn {
    /// Log file sequence number.
    pub file: u32,
    /// Byte offset within the file.
    pub offset: u32,
}

impl Lsn {
    /// The "no record" LSN.
    pub const ZERO: Self = Self { file: 0, offset: 0 };

    /// Creates an LSN.
    #[must_use]
    pub const fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }

    /// Returns true for [`Lsn::ZERO`].
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.file == 0 && self.offset == 0
    }

    /// Encodes as 8 little-endian bytes (file, then offset).
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.file.to_le_bytes());
        out[4..].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    /// Decodes the form written by [`Lsn::to_bytes`].
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let [f0, f1, f2, f3, o0, o1, o2, o3] = bytes;
        Self {
            file: u32::from_le_bytes([f0, f1, f2, f3]),
            offset: u32::from_le_bytes([o0, o1, o2, o3]),
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file, self.offset)
    }
}

impl FromStr for Lsn {
    type Err = CoreError;

    /// Parses the `file/offset` form produced by `Display`.
    fn from_str(s: &str) -> CoreResult<Self> {
        let (file, offset) = s
            .split_once('/')
            .ok_or_else(|| CoreError::invalid_argument(format!("malformed LSN: {s}")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| CoreError::invalid_argument(format!("malformed LSN: {s}")))
        };
        Ok(Self::new(parse(file)?, parse(offset)?))
    }
}

/// Lowest transaction id handed out.
///
/// Ids below this value are never issued, so a zero id in a record header
/// always means "not transactional".
pub const TXN_MINIMUM: u32 = 0x8000_0000;

/// Transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u32);

impl TxnId {
    /// Id carried by records that belong to no transaction.
    pub const NONE: Self = Self(0);

    /// Creates a transaction ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for [`TxnId::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{:08x}", self.0)
    }
}

/// How far a commit is pushed toward stable storage before it returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SyncPolicy {
    /// Write the commit record and fsync it.
    #[default]
    Sync,
    /// Write the commit record to the OS without fsync.
    WriteNoSync,
    /// Leave the commit record in the log buffer.
    NoSync,
}

impl SyncPolicy {
    /// Put flags that implement this policy.
    #[must_use]
    pub const fn put_flags(self) -> PutFlags {
        match self {
            Self::Sync => PutFlags::SYNC,
            Self::WriteNoSync => PutFlags::FLUSH,
            Self::NoSync => PutFlags::NONE,
        }
    }
}

impl FromStr for SyncPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "sync" => Ok(Self::Sync),
            "write-nosync" | "write_nosync" => Ok(Self::WriteNoSync),
            "nosync" => Ok(Self::NoSync),
            other => Err(CoreError::invalid_argument(format!(
                "unknown sync policy: {other}"
            ))),
        }
    }
}

/// Durability requested for a single log put.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PutFlags {
    /// Write the log buffer through to the current file.
    pub flush: bool,
    /// Additionally fsync the file. Implies `flush`.
    pub sync: bool,
}

impl PutFlags {
    /// Leave the record in the buffer.
    pub const NONE: Self = Self {
        flush: false,
        sync: false,
    };
    /// Write through to the OS.
    pub const FLUSH: Self = Self {
        flush: true,
        sync: false,
    };
    /// Write through and fsync.
    pub const SYNC: Self = Self {
        flush: true,
        sync: true,
    };

    /// Returns true if the put must reach the file before returning.
    #[must_use]
    pub const fn writes_through(self) -> bool {
        self.flush || self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_ordering() {
        assert!(Lsn::new(1, 500) < Lsn::new(2, 0));
        assert!(Lsn::new(2, 10) < Lsn::new(2, 11));
        assert!(Lsn::ZERO < Lsn::new(1, 0));
        assert!(Lsn::ZERO.is_zero());
        assert!(!Lsn::new(1, 0).is_zero());
    }

    #[test]
    fn lsn_bytes_and_text() {
        let lsn = Lsn::new(7, 4096);
        assert_eq!(Lsn::from_bytes(lsn.to_bytes()), lsn);
        assert_eq!(lsn.to_string(), "7/4096");
        assert_eq!("7/4096".parse::<Lsn>().unwrap(), lsn);
        assert!("7:4096".parse::<Lsn>().is_err());
        assert!("x/1".parse::<Lsn>().is_err());
    }

    #[test]
    fn txn_id_display() {
        assert_eq!(TxnId::new(TXN_MINIMUM + 1).to_string(), "txn:80000001");
        assert!(TxnId::NONE.is_none());
    }

    #[test]
    fn sync_policy_flags() {
        assert_eq!(SyncPolicy::Sync.put_flags(), PutFlags::SYNC);
        assert_eq!(SyncPolicy::WriteNoSync.put_flags(), PutFlags::FLUSH);
        assert!(!SyncPolicy::NoSync.put_flags().writes_through());
        assert_eq!(
            "write-nosync".parse::<SyncPolicy>().unwrap(),
            SyncPolicy::WriteNoSync
        );
    }
}
