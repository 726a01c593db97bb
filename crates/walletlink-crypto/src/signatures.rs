//! Ed25519 verification of wallet signatures.
//!
//! Wallets answer a `sign_message_request` with a signature and their public
//! key, both as strings. These helpers let a dApp check the response locally
//! before trusting it:
//!
//! ```ignore
//! use walletlink_crypto::signatures::verify_message_signature;
//!
//! verify_message_signature(&response.public_key, b"hello", &response.signature)?;
//! ```
//!
//! Keys and signatures are accepted as lowercase/uppercase hex or standard
//! base64. Hex is tried first because it is what the reference wallet emits.

use crate::{CryptoError, ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE};
use base64::Engine;
use ed25519_dalek::Verifier;

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; ED25519_SIGNATURE_SIZE]);

impl Signature {
    /// Create a signature from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; ED25519_SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a signature from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the slice is not exactly 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; ED25519_SIGNATURE_SIZE] =
            slice.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    /// Parse a hex or base64 encoded signature
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the text decodes to anything
    /// other than 64 bytes.
    pub fn from_encoded(text: &str) -> Result<Self, CryptoError> {
        let bytes = decode_flexible(text).ok_or(CryptoError::InvalidSignature)?;
        Self::from_slice(&bytes)
    }

    /// Get the raw signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; ED25519_SIGNATURE_SIZE] {
        &self.0
    }
}

/// Ed25519 verifying key (public key)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    /// Create from raw 32-byte public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes do not
    /// represent a valid Ed25519 public key point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Parse a hex or base64 encoded public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] on bad encoding, wrong length
    /// or an invalid curve point.
    pub fn from_encoded(text: &str) -> Result<Self, CryptoError> {
        let bytes = decode_flexible(text).ok_or(CryptoError::InvalidPublicKey)?;
        let bytes: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw public key bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Verify a signature on a message
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature does not
    /// authenticate the message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.inner
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Verify a wallet's signature over `message`.
///
/// `public_key` and `signature` are the strings carried in a
/// `sign_message_response`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] or [`CryptoError::InvalidSignature`].
pub fn verify_message_signature(
    public_key: &str,
    message: &[u8],
    signature: &str,
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_encoded(public_key)?;
    let signature = Signature::from_encoded(signature)?;
    key.verify(message, &signature)
}

fn decode_flexible(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    let text = text.strip_prefix("0x").unwrap_or(text);
    if let Ok(bytes) = hex::decode(text) {
        return Some(bytes);
    }
    base64::engine::general_purpose::STANDARD.decode(text).ok()
}
