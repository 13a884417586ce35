//! Log record framing.
//!
//! ```text
//! | len (4) | prev_offset (4) | prev_lsn (8) | txnid (4) | type (1) | flags (1) | reserved (2) |
//! | checksum (4 or 20) | iv (0 or 12) | payload (N) |
//! ```
//!
//! All integers are little-endian. `len` covers the whole record.
//! `prev_offset` is the file offset of the record physically before this one
//! (for a file-header record: the last record of the previous file), which
//! lets a cursor walk backward. `prev_lsn` links the record into its
//! transaction's private chain.
//!
//! The checksum is computed over the complete record with the checksum field
//! zeroed. Encrypted payloads are encrypted first, so the checksum covers the
//! ciphertext. A prefix of all zeroes marks the end of the records in a file.

use crate::crypto::{Crc32Adapter, CryptoAdapter};
use crate::error::{CoreError, CoreResult};
use crate::types::{Lsn, TxnId};
use std::sync::Arc;

/// Size of the fixed record prefix that precedes the checksum.
pub const PREFIX_LEN: usize = 24;

/// Flag bit: checksum is a MAC, an IV follows it and the payload is encrypted.
pub const FLAG_CRYPTO: u8 = 0x01;

const CHECKSUM_OFFSET: usize = PREFIX_LEN;

/// Record type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Persistent header at offset 0 of every log file.
    FileHeader = 1,
    /// Opaque record logged by an access method.
    User = 2,
    /// Durable commit of a top-level transaction.
    Commit = 3,
    /// A child's chain spliced into its parent.
    ChildCommit = 4,
    /// End of an aborted transaction.
    Abort = 5,
    /// First phase of a two-phase commit.
    Prepare = 6,
    /// New range of valid transaction ids.
    TxnRecycle = 7,
    /// Checkpoint marker.
    Checkpoint = 8,
}

impl RecordType {
    /// Returns the tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a tag byte.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] for an unknown tag.
    pub fn from_byte(byte: u8, lsn: Lsn) -> CoreResult<Self> {
        match byte {
            1 => Ok(Self::FileHeader),
            2 => Ok(Self::User),
            3 => Ok(Self::Commit),
            4 => Ok(Self::ChildCommit),
            5 => Ok(Self::Abort),
            6 => Ok(Self::Prepare),
            7 => Ok(Self::TxnRecycle),
            8 => Ok(Self::Checkpoint),
            other => Err(CoreError::corruption(
                lsn,
                format!("unknown record type {other}"),
            )),
        }
    }

    /// Short lowercase name, used by tooling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FileHeader => "file_header",
            Self::User => "user",
            Self::Commit => "commit",
            Self::ChildCommit => "child_commit",
            Self::Abort => "abort",
            Self::Prepare => "prepare",
            Self::TxnRecycle => "txn_recycle",
            Self::Checkpoint => "checkpoint",
        }
    }
}

/// The fixed-position fields of a record, parsed without verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrefix {
    /// Total record length.
    pub len: u32,
    /// File offset of the physically preceding record.
    pub prev_offset: u32,
    /// Previous record of the same transaction.
    pub prev_lsn: Lsn,
    /// Owning transaction.
    pub txnid: TxnId,
    /// Raw type tag.
    pub rectype: u8,
    /// Framing flags.
    pub flags: u8,
    /// Must be zero.
    pub reserved: u16,
}

impl RecordPrefix {
    /// Parses the first [`PREFIX_LEN`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a short-read error if fewer than [`PREFIX_LEN`] bytes are given.
    pub fn parse(lsn: Lsn, bytes: &[u8]) -> CoreResult<Self> {
        let Some(prefix) = bytes.get(..PREFIX_LEN) else {
            return Err(CoreError::ShortRead {
                lsn,
                expected: PREFIX_LEN,
                actual: bytes.len(),
            });
        };
        let u32_at = |at: usize| {
            u32::from_le_bytes([prefix[at], prefix[at + 1], prefix[at + 2], prefix[at + 3]])
        };
        Ok(Self {
            len: u32_at(0),
            prev_offset: u32_at(4),
            prev_lsn: Lsn::new(u32_at(8), u32_at(12)),
            txnid: TxnId::new(u32_at(16)),
            rectype: prefix[20],
            flags: prefix[21],
            reserved: u16::from_le_bytes([prefix[22], prefix[23]]),
        })
    }

    /// Returns true for the all-zero end-of-file marker.
    #[must_use]
    pub fn is_eof_sentinel(&self) -> bool {
        self.len == 0
            && self.prev_offset == 0
            && self.prev_lsn.is_zero()
            && self.txnid.is_none()
            && self.rectype == 0
            && self.flags == 0
            && self.reserved == 0
    }

    fn write(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..8].copy_from_slice(&self.prev_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.prev_lsn.to_bytes());
        out[16..20].copy_from_slice(&self.txnid.as_u32().to_le_bytes());
        out[20] = self.rectype;
        out[21] = self.flags;
        out[22..24].copy_from_slice(&self.reserved.to_le_bytes());
    }
}

/// A verified record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Total record length.
    pub len: u32,
    /// File offset of the physically preceding record.
    pub prev_offset: u32,
    /// Previous record of the same transaction, ZERO if none.
    pub prev_lsn: Lsn,
    /// Owning transaction, [`TxnId::NONE`] if none.
    pub txnid: TxnId,
    /// Record type.
    pub rectype: RecordType,
    /// Framing flags.
    pub flags: u8,
}

impl RecordHeader {
    /// Returns true if the payload was stored encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.flags & FLAG_CRYPTO != 0
    }
}

/// A record whose payload is ready to be framed.
///
/// Sealing (including encryption) is done before the log region is locked;
/// only [`RecordCodec::frame`], which needs the physical position, runs under
/// the lock.
#[derive(Debug, Clone)]
pub struct SealedRecord {
    rectype: RecordType,
    txnid: TxnId,
    prev_lsn: Lsn,
    flags: u8,
    checksum_len: usize,
    iv: Vec<u8>,
    body: Vec<u8>,
}

impl SealedRecord {
    /// Record type.
    #[must_use]
    pub const fn rectype(&self) -> RecordType {
        self.rectype
    }

    /// Owning transaction.
    #[must_use]
    pub const fn txnid(&self) -> TxnId {
        self.txnid
    }

    /// Length of the framed record.
    #[must_use]
    pub fn framed_len(&self) -> usize {
        PREFIX_LEN + self.checksum_len + self.iv.len() + self.body.len()
    }
}

/// Frames and verifies log records.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    plain: Crc32Adapter,
    crypto: Option<Arc<dyn CryptoAdapter>>,
}

impl RecordCodec {
    /// Creates a codec; `crypto` encrypts every record except file headers.
    #[must_use]
    pub fn new(crypto: Option<Arc<dyn CryptoAdapter>>) -> Self {
        Self {
            plain: Crc32Adapter,
            crypto,
        }
    }

    /// A codec for unencrypted logs.
    #[must_use]
    pub fn plain() -> Self {
        Self::new(None)
    }

    /// Returns true if records are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// Bytes of framing (everything but the payload) for records this codec
    /// writes.
    #[must_use]
    pub fn overhead(&self) -> usize {
        match &self.crypto {
            Some(crypto) => PREFIX_LEN + crypto.checksum_len() + crypto.iv_len(),
            None => PREFIX_LEN + self.plain.checksum_len(),
        }
    }

    fn adapter_for_flags(&self, lsn: Lsn, flags: u8) -> CoreResult<&dyn CryptoAdapter> {
        if flags & FLAG_CRYPTO == 0 {
            return Ok(&self.plain);
        }
        self.crypto.as_deref().ok_or_else(|| {
            CoreError::corruption(lsn, "encrypted record in a log opened without a key")
        })
    }

    /// Seals a payload. File headers are always framed in the clear so a
    /// log can be identified without its key.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn seal(
        &self,
        rectype: RecordType,
        txnid: TxnId,
        prev_lsn: Lsn,
        payload: &[u8],
    ) -> CoreResult<SealedRecord> {
        match (&self.crypto, rectype) {
            (Some(crypto), rectype) if rectype != RecordType::FileHeader => {
                let iv = crypto.generate_iv();
                let body = crypto.encrypt(&iv, payload)?;
                Ok(SealedRecord {
                    rectype,
                    txnid,
                    prev_lsn,
                    flags: FLAG_CRYPTO,
                    checksum_len: crypto.checksum_len(),
                    iv,
                    body,
                })
            }
            _ => Ok(SealedRecord {
                rectype,
                txnid,
                prev_lsn,
                flags: 0,
                checksum_len: self.plain.checksum_len(),
                iv: Vec::new(),
                body: payload.to_vec(),
            }),
        }
    }

    /// Produces the bytes of a sealed record placed after `prev_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RecordTooLarge`] if the record length does not
    /// fit the 32-bit length field.
    pub fn frame(&self, sealed: &SealedRecord, prev_offset: u32) -> CoreResult<Vec<u8>> {
        let total = sealed.framed_len();
        let len = u32::try_from(total).map_err(|_| CoreError::RecordTooLarge {
            len: total,
            max: u32::MAX as usize,
        })?;
        let adapter = self.adapter_for_flags(Lsn::ZERO, sealed.flags)?;

        let mut out = vec![0u8; total];
        RecordPrefix {
            len,
            prev_offset,
            prev_lsn: sealed.prev_lsn,
            txnid: sealed.txnid,
            rectype: sealed.rectype.as_byte(),
            flags: sealed.flags,
            reserved: 0,
        }
        .write(&mut out);
        let iv_at = CHECKSUM_OFFSET + sealed.checksum_len;
        let body_at = iv_at + sealed.iv.len();
        out[iv_at..body_at].copy_from_slice(&sealed.iv);
        out[body_at..].copy_from_slice(&sealed.body);

        let checksum = adapter.checksum(&out);
        out[CHECKSUM_OFFSET..iv_at].copy_from_slice(&checksum);
        Ok(out)
    }

    /// Seals and frames in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or framing fails.
    pub fn encode(
        &self,
        rectype: RecordType,
        txnid: TxnId,
        prev_lsn: Lsn,
        prev_offset: u32,
        payload: &[u8],
    ) -> CoreResult<Vec<u8>> {
        let sealed = self.seal(rectype, txnid, prev_lsn, payload)?;
        self.frame(&sealed, prev_offset)
    }

    /// Checks a prefix's length against the framing it declares and against
    /// `max_len`, before anything of that size is read or allocated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] for an impossible length.
    pub fn check_len(&self, lsn: Lsn, prefix: &RecordPrefix, max_len: u32) -> CoreResult<usize> {
        let adapter = self.adapter_for_flags(lsn, prefix.flags)?;
        let min = PREFIX_LEN + adapter.checksum_len() + adapter.iv_len();
        let len = prefix.len as usize;
        if len < min {
            return Err(CoreError::corruption(
                lsn,
                format!("record length {len} is shorter than its header ({min})"),
            ));
        }
        if prefix.len > max_len {
            return Err(CoreError::corruption(
                lsn,
                format!("record length {len} exceeds the maximum of {max_len}"),
            ));
        }
        Ok(len)
    }

    /// Verifies a complete record and returns its header and plaintext
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] if the checksum fails, and
    /// [`CoreError::Corruption`] for malformed framing.
    pub fn decode(&self, lsn: Lsn, bytes: &[u8]) -> CoreResult<(RecordHeader, Vec<u8>)> {
        let prefix = RecordPrefix::parse(lsn, bytes)?;
        if prefix.len as usize != bytes.len() {
            return Err(CoreError::corruption(
                lsn,
                format!(
                    "record length field {} does not match {} bytes read",
                    prefix.len,
                    bytes.len()
                ),
            ));
        }
        self.check_len(lsn, &prefix, prefix.len)?;
        let adapter = self.adapter_for_flags(lsn, prefix.flags)?;

        let iv_at = CHECKSUM_OFFSET + adapter.checksum_len();
        let body_at = iv_at + adapter.iv_len();
        let mut scratch = bytes.to_vec();
        scratch[CHECKSUM_OFFSET..iv_at].fill(0);
        if adapter.checksum(&scratch) != bytes[CHECKSUM_OFFSET..iv_at] {
            return Err(CoreError::ChecksumMismatch { lsn });
        }

        if prefix.reserved != 0 {
            return Err(CoreError::corruption(lsn, "reserved header bits are set"));
        }
        let rectype = RecordType::from_byte(prefix.rectype, lsn)?;
        let header = RecordHeader {
            len: prefix.len,
            prev_offset: prefix.prev_offset,
            prev_lsn: prefix.prev_lsn,
            txnid: prefix.txnid,
            rectype,
            flags: prefix.flags,
        };

        let body = &bytes[body_at..];
        let payload = if header.is_encrypted() {
            adapter.decrypt(&bytes[iv_at..body_at], body)?
        } else {
            body.to_vec()
        };
        Ok((header, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec() -> RecordCodec {
        RecordCodec::plain()
    }

    #[test]
    fn frame_layout() {
        let bytes = codec()
            .encode(
                RecordType::User,
                TxnId::new(0x8000_0001),
                Lsn::new(1, 48),
                80,
                b"payload",
            )
            .unwrap();
        assert_eq!(bytes.len(), PREFIX_LEN + 4 + 7);

        let prefix = RecordPrefix::parse(Lsn::new(1, 120), &bytes).unwrap();
        assert_eq!(prefix.len as usize, bytes.len());
        assert_eq!(prefix.prev_offset, 80);
        assert_eq!(prefix.prev_lsn, Lsn::new(1, 48));
        assert_eq!(prefix.rectype, RecordType::User.as_byte());
        assert!(!prefix.is_eof_sentinel());
        assert_eq!(&bytes[PREFIX_LEN + 4..], b"payload");
    }

    #[test]
    fn zero_prefix_is_sentinel() {
        let prefix = RecordPrefix::parse(Lsn::new(1, 0), &[0u8; PREFIX_LEN]).unwrap();
        assert!(prefix.is_eof_sentinel());
    }

    #[test]
    fn short_prefix_is_short_read() {
        let err = RecordPrefix::parse(Lsn::new(1, 0), &[0u8; 10]).unwrap_err();
        assert!(matches!(err, CoreError::ShortRead { actual: 10, .. }));
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut bytes = codec()
            .encode(RecordType::User, TxnId::NONE, Lsn::ZERO, 0, b"x")
            .unwrap();
        bytes[20] = 0x7f;
        // Re-checksum so the type check is what fails.
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].fill(0);
        let crc = Crc32Adapter.checksum(&bytes);
        bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc);

        let err = codec().decode(Lsn::new(1, 48), &bytes).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[test]
    fn length_limits() {
        let c = codec();
        let lsn = Lsn::new(2, 64);
        let mut prefix = RecordPrefix::parse(
            lsn,
            &c.encode(RecordType::User, TxnId::NONE, Lsn::ZERO, 0, &[1; 100])
                .unwrap(),
        )
        .unwrap();
        assert_eq!(c.check_len(lsn, &prefix, 4096).unwrap(), 128);
        assert!(c.check_len(lsn, &prefix, 127).is_err());
        prefix.len = 10;
        assert!(c.check_len(lsn, &prefix, 4096).is_err());
    }

    #[test]
    fn encrypted_record_needs_key() {
        let mut bytes = codec()
            .encode(RecordType::User, TxnId::NONE, Lsn::ZERO, 0, b"abc")
            .unwrap();
        bytes[21] = FLAG_CRYPTO;
        assert!(codec().decode(Lsn::new(1, 48), &bytes).unwrap_err().is_corruption());
    }

    #[cfg(feature = "encryption")]
    #[test]
    fn encrypted_round_trip() {
        use crate::crypto::{adapter_for, EncryptionKey};

        let key = EncryptionKey::generate();
        let codec = RecordCodec::new(adapter_for(Some(&key)).unwrap());
        let lsn = Lsn::new(3, 200);
        let bytes = codec
            .encode(RecordType::User, TxnId::new(9), Lsn::new(3, 100), 150, b"secret")
            .unwrap();
        assert!(!bytes.windows(6).any(|w| w == b"secret"));

        let (header, payload) = codec.decode(lsn, &bytes).unwrap();
        assert!(header.is_encrypted());
        assert_eq!(header.prev_lsn, Lsn::new(3, 100));
        assert_eq!(payload, b"secret");

        // File headers stay readable without the key.
        let header_bytes = codec
            .encode(RecordType::FileHeader, TxnId::NONE, Lsn::ZERO, 0, b"hdr")
            .unwrap();
        let (header, _) = RecordCodec::plain()
            .decode(Lsn::new(3, 0), &header_bytes)
            .unwrap();
        assert!(!header.is_encrypted());

        // A record from another key does not verify.
        let other = RecordCodec::new(adapter_for(Some(&EncryptionKey::generate())).unwrap());
        assert!(other.decode(lsn, &bytes).unwrap_err().is_corruption());
    }

    fn record_type() -> impl Strategy<Value = RecordType> {
        prop_oneof![
            Just(RecordType::User),
            Just(RecordType::Commit),
            Just(RecordType::ChildCommit),
            Just(RecordType::Abort),
            Just(RecordType::Prepare),
        ]
    }

    proptest! {
        #[test]
        fn round_trip(
            rectype in record_type(),
            txnid in any::<u32>(),
            prev_file in 0u32..100,
            prev_offset_in_file in any::<u32>(),
            prev_offset in any::<u32>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let prev_lsn = Lsn::new(prev_file, prev_offset_in_file);
            let bytes = codec()
                .encode(rectype, TxnId::new(txnid), prev_lsn, prev_offset, &payload)
                .unwrap();
            let (header, decoded) = codec().decode(Lsn::new(1, 48), &bytes).unwrap();
            prop_assert_eq!(header.rectype, rectype);
            prop_assert_eq!(header.prev_lsn, prev_lsn);
            prop_assert_eq!(header.prev_offset, prev_offset);
            prop_assert_eq!(header.txnid, TxnId::new(txnid));
            prop_assert_eq!(header.len as usize, bytes.len());
            prop_assert_eq!(decoded, payload);
        }

        #[test]
        fn any_bit_flip_is_detected(
            payload in prop::collection::vec(any::<u8>(), 0..256),
            bit in any::<prop::sample::Index>(),
        ) {
            let mut bytes = codec()
                .encode(RecordType::User, TxnId::new(7), Lsn::new(1, 48), 48, &payload)
                .unwrap();
            let bit = bit.index(bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
            let err = codec().decode(Lsn::new(1, 96), &bytes).unwrap_err();
            prop_assert!(err.is_corruption(), "unexpected error {err}");
        }
    }
}
