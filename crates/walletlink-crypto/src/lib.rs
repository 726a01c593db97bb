//! # WalletLink Crypto
//!
//! Cryptographic primitives for the WalletLink pairing protocol.
//!
//! This crate provides:
//! - HKDF-SHA256 derivation of the channel key from the shared session secret
//! - AES-256-GCM sealing of relay envelopes (`base64(IV || ciphertext || tag)`)
//! - Secure random identifiers and session secrets
//! - Ed25519 verification of wallet signatures
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | KDF | HKDF-SHA256 | 256-bit |
//! | AEAD | AES-256-GCM | 256-bit key, 128-bit tag |
//! | IV | 96-bit random per message | N/A |
//! | Signatures | Ed25519 | 128-bit |
//!
//! The salt and info strings match the browser implementation of the protocol,
//! so a channel key derived here opens envelopes sealed by a Web Crypto peer
//! holding the same session secret.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod random;
pub mod signatures;

pub use aead::ChannelKey;
pub use error::CryptoError;
pub use kdf::derive_channel_key;

/// Shared session secret size (carried out-of-band in the pairing link)
pub const SESSION_KEY_SIZE: usize = 32;

/// AES-256-GCM key size
pub const CHANNEL_KEY_SIZE: usize = 32;

/// AES-GCM IV size (96 bits)
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Random session/request identifier size in bytes (rendered as hex)
pub const ID_SIZE: usize = 16;

/// Ed25519 public key size
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Shared session secret handed to the wallet out-of-band.
///
/// Zeroized on drop. The channel key is always re-derived from this value,
/// which is the only form in which session key material is persisted.
#[derive(Clone, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct SessionSecret([u8; SESSION_KEY_SIZE]);

impl SessionSecret {
    /// Generate a fresh secret from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random::random_32()?))
    }

    /// Wrap raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode a secret from standard base64 (the pairing link and persisted form).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the decoded value is not
    /// 32 bytes, or [`CryptoError::InvalidEncoding`] if it is not base64.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        use base64::Engine;

        let mut decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        if decoded.len() != SESSION_KEY_SIZE {
            let actual = decoded.len();
            zeroize::Zeroize::zeroize(&mut decoded);
            return Err(CryptoError::InvalidKeyLength {
                expected: SESSION_KEY_SIZE,
                actual,
            });
        }
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        zeroize::Zeroize::zeroize(&mut decoded);
        Ok(Self(bytes))
    }

    /// Encode as standard base64 with padding.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Raw secret bytes.
    ///
    /// # Security
    ///
    /// Handle with extreme care - this exposes the raw key material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    /// Derive the channel key for this secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivationFailed`] if HKDF expansion fails.
    pub fn channel_key(&self) -> Result<ChannelKey, CryptoError> {
        derive_channel_key(&self.0)
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}
