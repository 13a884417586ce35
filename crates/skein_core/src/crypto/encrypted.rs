//! Record encryption using AES-256-GCM with a keyed SHA-256 checksum.

use super::CryptoAdapter;
use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce (the per-record IV) in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the stored record MAC in bytes.
pub const MAC_SIZE: usize = 20;

const SHA256_BLOCK: usize = 64;

/// Encryption key for AES-256-GCM.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key as a byte slice.
    ///
    /// # Security
    ///
    /// Be careful with this method - don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives a key from a password using HKDF-SHA256.
    ///
    /// HKDF is not a password hash; the password should already carry high
    /// entropy (a generated passphrase, not a user-chosen word).
    ///
    /// # Errors
    ///
    /// Returns an error if HKDF expansion fails.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> CoreResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(salt), password);

        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"skein-log-key-v1", &mut bytes)
            .map_err(|_| CoreError::key_derivation_failed("HKDF expand failed"))?;

        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypting record framing.
///
/// Payloads are sealed with AES-256-GCM under a caller-supplied IV, and the
/// record checksum is HMAC-SHA256 under a separate key derived from the
/// encryption key, truncated to [`MAC_SIZE`] bytes.
pub struct AesGcmAdapter {
    cipher: Aes256Gcm,
    mac_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl AesGcmAdapter {
    /// Creates an adapter for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC key cannot be derived.
    pub fn new(key: &EncryptionKey) -> CoreResult<Self> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

        let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
        let mut mac_key = Zeroizing::new([0u8; KEY_SIZE]);
        hk.expand(b"skein-log-mac-v1", mac_key.as_mut_slice())
            .map_err(|_| CoreError::key_derivation_failed("HKDF expand failed"))?;

        Ok(Self { cipher, mac_key })
    }

    fn hmac(&self, data: &[u8]) -> Vec<u8> {
        let mut ipad = [0x36u8; SHA256_BLOCK];
        let mut opad = [0x5cu8; SHA256_BLOCK];
        for (i, byte) in self.mac_key.iter().enumerate() {
            ipad[i] ^= byte;
            opad[i] ^= byte;
        }
        let inner = Sha256::new().chain_update(ipad).chain_update(data).finalize();
        let outer = Sha256::new().chain_update(opad).chain_update(inner).finalize();
        ipad.zeroize();
        opad.zeroize();
        outer.to_vec()
    }

    fn check_iv(iv: &[u8]) -> CoreResult<()> {
        if iv.len() != NONCE_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "record IV must be {NONCE_SIZE} bytes, got {}",
                iv.len()
            )));
        }
        Ok(())
    }
}

impl CryptoAdapter for AesGcmAdapter {
    fn checksum_len(&self) -> usize {
        MAC_SIZE
    }

    fn checksum(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.hmac(data);
        mac.truncate(MAC_SIZE);
        mac
    }

    fn iv_len(&self) -> usize {
        NONCE_SIZE
    }

    fn generate_iv(&self) -> Vec<u8> {
        let mut iv = vec![0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }

    fn encrypt(&self, iv: &[u8], plaintext: &[u8]) -> CoreResult<Vec<u8>> {
        Self::check_iv(iv)?;
        self.cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| CoreError::encryption_failed("encryption error"))
    }

    fn decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> CoreResult<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CoreError::decryption_failed("ciphertext too short"));
        }
        Self::check_iv(iv)?;
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CoreError::decryption_failed("decryption error"))
    }
}

impl std::fmt::Debug for AesGcmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmAdapter")
            .field("cipher", &"Aes256Gcm")
            .field("mac", &"HMAC-SHA256/160")
            .finish()
    }
}
