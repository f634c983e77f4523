//! AES-256-GCM encryption and key handling.

use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// What a subkey is used for. Each purpose gets an independent key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Provider credentials in `api_keys`.
    Credentials,
    /// Backup snapshots.
    Backups,
}

impl KeyPurpose {
    const fn info(self) -> &'static [u8] {
        match self {
            Self::Credentials => b"glyphdb/credentials/v1",
            Self::Backups => b"glyphdb/backups/v1",
        }
    }
}

/// A 256-bit key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a random key.
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
    /// Returns an error unless `bytes` is exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CoreError::invalid_key_size(bytes.len(), KEY_SIZE))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key. Never log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derives the subkey for `purpose` with HKDF-SHA256.
    ///
    /// # Errors
    ///
    /// Returns a key derivation error if HKDF expansion fails.
    pub fn subkey(&self, purpose: KeyPurpose) -> CoreResult<Self> {
        let hk = Hkdf::<Sha256>::new(None, &self.bytes);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(purpose.info(), &mut bytes)
            .map_err(|_| CoreError::key_derivation_failed("HKDF expand failed"))?;
        Ok(Self { bytes })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts with one key.
///
/// Output layout: `nonce (12) || ciphertext || tag (16)`. Every call draws
/// a fresh random nonce.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Creates a manager for `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// # Errors
    ///
    /// Returns an encryption error if the cipher rejects the input.
    pub fn encrypt_data(&self, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CoreError::encryption_failed("AES-GCM encryption error"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(sealed);
        Ok(out)
    }

    /// Decrypts output of [`encrypt_data`](Self::encrypt_data). `aad` must
    /// match.
    ///
    /// # Errors
    ///
    /// Returns a decryption error (integrity kind) for a wrong key, wrong
    /// AAD, truncated or tampered input.
    pub fn decrypt_data(&self, data: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed("ciphertext too short"));
        }
        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|_| CoreError::decryption_failed("authentication tag mismatch"))
    }
}

impl fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoManager")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}
