//! AES-256-GCM envelope sealing.
//!
//! Every relay envelope is sealed individually under the channel key:
//! - 256-bit key derived with [`crate::kdf::derive_channel_key`]
//! - fresh random 96-bit IV per message
//! - 128-bit authentication tag appended to the ciphertext
//!
//! ## Wire form
//!
//! ```text
//! base64( IV(12) || ciphertext || tag(16) )
//! ```
//!
//! Standard alphabet with padding, which is what `btoa` produces in the
//! browser peers.
//!
//! ## Usage
//!
//! ```ignore
//! use walletlink_crypto::derive_channel_key;
//!
//! let key = derive_channel_key(&session_secret)?;
//! let blob = key.seal(br#"{"type":"heartbeat"}"#)?;
//! let plaintext = key.open(&blob)?;
//! ```

use crate::{CHANNEL_KEY_SIZE, CryptoError, IV_SIZE, TAG_SIZE};
use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, Payload},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::ZeroizeOnDrop;

/// AES-GCM initialization vector (12 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Create an IV from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create an IV from a slice.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; IV_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Generate a random IV from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; IV_SIZE];
        crate::random::fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    fn as_generic(&self) -> &aes_gcm::aead::Nonce<Aes256Gcm> {
        aes_gcm::aead::Nonce::<Aes256Gcm>::from_slice(&self.0)
    }
}

/// Channel key (AES-256-GCM, 32 bytes).
///
/// Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ChannelKey([u8; CHANNEL_KEY_SIZE]);

impl ChannelKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; CHANNEL_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from slice.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if slice length is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; CHANNEL_KEY_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: CHANNEL_KEY_SIZE,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Get raw key bytes.
    ///
    /// # Security
    ///
    /// Handle with extreme care - this exposes the raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CHANNEL_KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new((&self.0).into())
    }

    /// Encrypt plaintext under an explicit IV.
    ///
    /// Returns ciphertext with appended authentication tag (`plaintext.len()` + 16 bytes).
    /// Callers must never reuse an IV under the same key; [`ChannelKey::seal`]
    /// takes care of that.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn encrypt(&self, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher()
            .encrypt(
                iv.as_generic(),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt ciphertext (tag appended) under an explicit IV.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::AuthenticationFailed` on tag mismatch or truncated input.
    pub fn decrypt(&self, iv: &Iv, ciphertext_and_tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }

        self.cipher()
            .decrypt(
                iv.as_generic(),
                Payload {
                    msg: ciphertext_and_tag,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Seal plaintext into the wire form `base64(IV || ciphertext || tag)`.
    ///
    /// A fresh IV is drawn for every call.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::RandomFailed` or `CryptoError::EncryptionFailed`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let iv = Iv::generate()?;
        let ciphertext = self.encrypt(&iv, plaintext)?;

        let mut combined = Vec::with_capacity(IV_SIZE + ciphertext.len());
        combined.extend_from_slice(iv.as_bytes());
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    /// Open a sealed blob produced by [`ChannelKey::seal`] (or a browser peer).
    ///
    /// # Errors
    ///
    /// Any malformed input (bad base64, too short) or tag mismatch yields
    /// `CryptoError::AuthenticationFailed`.
    pub fn open(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        let combined = STANDARD
            .decode(blob.trim())
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        if combined.len() < IV_SIZE + TAG_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }

        let (iv, ciphertext) = combined.split_at(IV_SIZE);
        let iv = Iv::from_slice(iv).ok_or(CryptoError::AuthenticationFailed)?;
        self.decrypt(&iv, ciphertext)
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelKey(..)")
    }
}
