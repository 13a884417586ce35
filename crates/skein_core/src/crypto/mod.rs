//! Checksums and encryption for log records.
//!
//! The log never calls a hash or cipher directly. It goes through a
//! [`CryptoAdapter`], which supplies the record checksum and, for encrypted
//! environments, the per-record IV and the payload cipher.
//!
//! - [`Crc32Adapter`] frames plain records: 4-byte CRC-32, no IV.
//! - `AesGcmAdapter` (feature `encryption`) frames encrypted records:
//!   20-byte keyed SHA-256 MAC, 12-byte random IV, AES-256-GCM payload.
//!
//! ## Security Model
//!
//! - Keys are zeroized on drop
//! - The checksum is computed over the ciphertext, so a record can be
//!   verified before it is decrypted
//! - Key derivation uses HKDF when deriving from passwords
//!
//! ## Usage
//!
//! ```ignore
//! use skein_core::crypto::{adapter_for, EncryptionKey};
//!
//! let key = EncryptionKey::generate();
//! let adapter = adapter_for(Some(&key))?.unwrap();
//! let iv = adapter.generate_iv();
//! let sealed = adapter.encrypt(&iv, b"secret payload")?;
//! ```

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "encryption")]
mod encrypted;

#[cfg(feature = "encryption")]
pub use encrypted::*;

/// Checksum and cipher primitives used to frame log records.
pub trait CryptoAdapter: Send + Sync + fmt::Debug {
    /// Length of the checksum this adapter produces.
    fn checksum_len(&self) -> usize;

    /// Computes the checksum of `data`; the result is `checksum_len` bytes.
    fn checksum(&self, data: &[u8]) -> Vec<u8>;

    /// Length of the per-record IV, 0 if records are not encrypted.
    fn iv_len(&self) -> usize;

    /// Generates a fresh IV of `iv_len` bytes.
    fn generate_iv(&self) -> Vec<u8>;

    /// Encrypts a record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter does not encrypt or the cipher fails.
    fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> CoreResult<Vec<u8>>;

    /// Decrypts a record payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter does not encrypt or the data does not
    /// authenticate.
    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> CoreResult<Vec<u8>>;
}

/// Plain framing: CRC-32 checksum, no encryption.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32Adapter;

impl CryptoAdapter for Crc32Adapter {
    fn checksum_len(&self) -> usize {
        4
    }

    fn checksum(&self, data: &[u8]) -> Vec<u8> {
        crc32fast::hash(data).to_le_bytes().to_vec()
    }

    fn iv_len(&self) -> usize {
        0
    }

    fn generate_iv(&self) -> Vec<u8> {
        Vec::new()
    }

    fn encrypt(&self, _iv: &[u8], _plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        Err(CoreError::encryption_not_enabled())
    }

    fn decrypt(&self, _iv: &[u8], _ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        Err(CoreError::encryption_not_enabled())
    }
}

/// Builds the encrypting adapter for `key`, or `None` for a plain log.
///
/// # Errors
///
/// Returns [`CoreError::EncryptionNotEnabled`] if a key is supplied but the
/// `encryption` feature is off, or an error if the MAC key cannot be derived.
pub fn adapter_for(key: Option<&EncryptionKey>) -> CoreResult<Option<Arc<dyn CryptoAdapter>>> {
    match key {
        None => Ok(None),
        Some(key) => {
            let adapter = AesGcmAdapter::new(key)?;
            Ok(Some(Arc::new(adapter)))
        }
    }
}

/// Module contents when encryption feature is disabled.
#[cfg(not(feature = "encryption"))]
mod stub {
    use super::CryptoAdapter;
    use crate::error::{CoreError, CoreResult};

    /// Encryption key (stub when encryption disabled).
    #[derive(Debug, Clone)]
    pub struct EncryptionKey {
        _private: (),
    }

    impl EncryptionKey {
        /// Always returns an error when encryption is disabled.
        pub fn generate() -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }

        /// Always returns an error when encryption is disabled.
        pub fn from_bytes(_bytes: &[u8]) -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }

        /// Always returns an error when encryption is disabled.
        pub fn derive_from_password(_password: &[u8], _salt: &[u8]) -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }
    }

    /// Encrypting adapter (stub when encryption disabled).
    #[derive(Debug)]
    pub struct AesGcmAdapter {
        _private: (),
    }

    impl AesGcmAdapter {
        /// Always returns an error when encryption is disabled.
        pub fn new(_key: &EncryptionKey) -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }
    }

    impl CryptoAdapter for AesGcmAdapter {
        fn checksum_len(&self) -> usize {
            0
        }

        fn checksum(&self, _data: &[u8]) -> Vec<u8> {
            Vec::new()
        }

        fn iv_len(&self) -> usize {
            0
        }

        fn generate_iv(&self) -> Vec<u8> {
            Vec::new()
        }

        fn encrypt(&self, _iv: &[u8], _plaintext: &[u8]) -> CoreResult<Vec<u8>> {
            Err(CoreError::encryption_not_enabled())
        }

        fn decrypt(&self, _iv: &[u8], _ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
            Err(CoreError::encryption_not_enabled())
        }
    }
}

#[cfg(not(feature = "encryption"))]
pub use stub::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_adapter_checksums() {
        let adapter = Crc32Adapter;
        assert_eq!(adapter.checksum_len(), 4);
        assert_eq!(adapter.iv_len(), 0);
        assert_eq!(adapter.checksum(b"abc"), adapter.checksum(b"abc"));
        assert_ne!(adapter.checksum(b"abc"), adapter.checksum(b"abd"));
        assert!(matches!(
            adapter.encrypt(&[], b"x"),
            Err(CoreError::EncryptionNotEnabled)
        ));
    }

    #[test]
    fn no_key_means_plain() {
        assert!(adapter_for(None).unwrap().is_none());
    }
}
