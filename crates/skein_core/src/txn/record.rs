//! Payloads of the records the transaction manager writes.
//!
//! ```text
//! Commit       | timestamp (8) |
//! ChildCommit  | child txnid (4) | child last lsn (8) |
//! Abort        (empty)
//! Prepare      | begin lsn (8) | gid len (2) | gid (N) |
//! TxnRecycle   | min (4) | max (4) |
//! Checkpoint   | ckp lsn (8) | timestamp (8) |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::log::RecordType;
use crate::types::{Lsn, TxnId};
use std::time::{SystemTime, UNIX_EPOCH};

/// A decoded transaction-manager record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnRecord {
    /// A top-level transaction committed.
    Commit {
        /// Seconds since the Unix epoch.
        timestamp: u64,
    },
    /// A child's chain was spliced into its parent's.
    ChildCommit {
        /// The committed child.
        child: TxnId,
        /// Last record of the child's chain.
        child_last_lsn: Lsn,
    },
    /// A transaction was rolled back.
    Abort,
    /// A transaction entered the prepared state.
    Prepare {
        /// Global transaction id assigned by the coordinator.
        gid: Vec<u8>,
        /// Where the transaction began.
        begin_lsn: Lsn,
    },
    /// Transaction ids in `[min, max]` are valid again.
    TxnRecycle {
        /// Lowest recycled id.
        min: u32,
        /// Highest recycled id.
        max: u32,
    },
    /// A checkpoint was taken.
    Checkpoint {
        /// Where recovery would start.
        ckp_lsn: Lsn,
        /// Seconds since the Unix epoch.
        timestamp: u64,
    },
}

impl TxnRecord {
    /// The record type this payload is logged under.
    #[must_use]
    pub fn rectype(&self) -> RecordType {
        match self {
            Self::Commit { .. } => RecordType::Commit,
            Self::ChildCommit { .. } => RecordType::ChildCommit,
            Self::Abort => RecordType::Abort,
            Self::Prepare { .. } => RecordType::Prepare,
            Self::TxnRecycle { .. } => RecordType::TxnRecycle,
            Self::Checkpoint { .. } => RecordType::Checkpoint,
        }
    }

    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Commit { timestamp } => out.extend_from_slice(&timestamp.to_le_bytes()),
            Self::ChildCommit {
                child,
                child_last_lsn,
            } => {
                out.extend_from_slice(&child.as_u32().to_le_bytes());
                out.extend_from_slice(&child_last_lsn.to_bytes());
            }
            Self::Abort => {}
            Self::Prepare { gid, begin_lsn } => {
                out.extend_from_slice(&begin_lsn.to_bytes());
                out.extend_from_slice(&(gid.len() as u16).to_le_bytes());
                out.extend_from_slice(gid);
            }
            Self::TxnRecycle { min, max } => {
                out.extend_from_slice(&min.to_le_bytes());
                out.extend_from_slice(&max.to_le_bytes());
            }
            Self::Checkpoint { ckp_lsn, timestamp } => {
                out.extend_from_slice(&ckp_lsn.to_bytes());
                out.extend_from_slice(&timestamp.to_le_bytes());
            }
        }
        out
    }

    /// Decodes the payload of a record of type `rectype` read at `lsn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for record types the
    /// transaction manager does not write, and [`CoreError::Corruption`]
    /// for a payload of the wrong shape.
    pub fn decode(rectype: RecordType, lsn: Lsn, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = Reader { lsn, payload, at: 0 };
        let record = match rectype {
            RecordType::Commit => Self::Commit {
                timestamp: reader.u64()?,
            },
            RecordType::ChildCommit => Self::ChildCommit {
                child: TxnId::new(reader.u32()?),
                child_last_lsn: reader.lsn()?,
            },
            RecordType::Abort => Self::Abort,
            RecordType::Prepare => {
                let begin_lsn = reader.lsn()?;
                let len = usize::from(reader.u16()?);
                let gid = reader.take(len)?.to_vec();
                Self::Prepare { gid, begin_lsn }
            }
            RecordType::TxnRecycle => Self::TxnRecycle {
                min: reader.u32()?,
                max: reader.u32()?,
            },
            RecordType::Checkpoint => Self::Checkpoint {
                ckp_lsn: reader.lsn()?,
                timestamp: reader.u64()?,
            },
            RecordType::FileHeader | RecordType::User => {
                return Err(CoreError::invalid_argument(format!(
                    "{} records are not transaction records",
                    rectype.name()
                )))
            }
        };
        reader.finish()?;
        Ok(record)
    }
}

struct Reader<'a> {
    lsn: Lsn,
    payload: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let bytes = self
            .payload
            .get(self.at..self.at + n)
            .ok_or_else(|| CoreError::corruption(self.lsn, "transaction record payload is truncated"))?;
        self.at += n;
        Ok(bytes)
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn lsn(&mut self) -> CoreResult<Lsn> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(Lsn::from_bytes(buf))
    }

    fn finish(&self) -> CoreResult<()> {
        if self.at != self.payload.len() {
            return Err(CoreError::corruption(
                self.lsn,
                format!(
                    "transaction record has {} trailing bytes",
                    self.payload.len() - self.at
                ),
            ));
        }
        Ok(())
    }
}

/// Seconds since the Unix epoch, 0 if the clock is before it.
pub(crate) fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let lsn = Lsn::new(4, 100);
        for record in [
            TxnRecord::Commit { timestamp: 1_700_000_000 },
            TxnRecord::ChildCommit {
                child: TxnId::new(0x8000_0002),
                child_last_lsn: Lsn::new(3, 900),
            },
            TxnRecord::Abort,
            TxnRecord::Prepare {
                gid: b"global-17".to_vec(),
                begin_lsn: Lsn::new(2, 48),
            },
            TxnRecord::TxnRecycle {
                min: 0x8000_0001,
                max: 0x8000_00ff,
            },
            TxnRecord::Checkpoint {
                ckp_lsn: Lsn::new(1, 48),
                timestamp: 5,
            },
        ] {
            let decoded = TxnRecord::decode(record.rectype(), lsn, &record.encode()).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn malformed_payloads() {
        let lsn = Lsn::new(1, 48);
        assert!(TxnRecord::decode(RecordType::Commit, lsn, &[0; 4])
            .unwrap_err()
            .is_corruption());
        assert!(TxnRecord::decode(RecordType::Abort, lsn, &[1])
            .unwrap_err()
            .is_corruption());
        assert!(matches!(
            TxnRecord::decode(RecordType::User, lsn, &[]),
            Err(CoreError::InvalidArgument { .. })
        ));
    }
}
