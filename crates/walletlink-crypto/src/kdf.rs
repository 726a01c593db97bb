//! HKDF-SHA256 key derivation.
//!
//! The channel key is derived from the 32-byte session secret with a fixed
//! salt and info string. Both values are part of the wire protocol: a peer
//! using different constants derives a different key and every envelope it
//! seals fails authentication here.

use crate::aead::ChannelKey;
use crate::{CHANNEL_KEY_SIZE, CryptoError, SESSION_KEY_SIZE};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// HKDF salt for the channel key.
pub const CHANNEL_KEY_SALT: &[u8] = b"sultan-walletlink";

/// HKDF info for the channel key.
pub const CHANNEL_KEY_INFO: &[u8] = b"walletlink-v1";

/// HKDF-SHA256 extract-and-expand into `out`.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] if `out` is longer than
/// 255 * 32 bytes.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, out)
        .map_err(|_| CryptoError::KeyDerivationFailed)
}

/// Derive the AES-256-GCM channel key from a session secret.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] if HKDF expansion fails.
pub fn derive_channel_key(session_key: &[u8; SESSION_KEY_SIZE]) -> Result<ChannelKey, CryptoError> {
    let mut okm = [0u8; CHANNEL_KEY_SIZE];
    hkdf_sha256(CHANNEL_KEY_SALT, session_key, CHANNEL_KEY_INFO, &mut okm)?;
    let key = ChannelKey::new(okm);
    okm.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_channel_key(&[9u8; 32]).unwrap();
        let b = derive_channel_key(&[9u8; 32]).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_different_secrets_different_keys() {
        let a = derive_channel_key(&[1u8; 32]).unwrap();
        let b = derive_channel_key(&[2u8; 32]).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_channel_key_is_not_the_secret() {
        let secret = [5u8; 32];
        let key = derive_channel_key(&secret).unwrap();
        assert_ne!(key.as_bytes(), &secret);
    }

    #[test]
    fn test_derivation_uses_protocol_constants() {
        let secret = [3u8; 32];
        let mut expected = [0u8; 32];
        hkdf_sha256(b"sultan-walletlink", &secret, b"walletlink-v1", &mut expected).unwrap();
        assert_eq!(derive_channel_key(&secret).unwrap().as_bytes(), &expected);

        let mut other = [0u8; 32];
        hkdf_sha256(b"other-salt", &secret, b"walletlink-v1", &mut other).unwrap();
        assert_ne!(other, expected);
    }

    #[test]
    fn test_hkdf_output_too_long() {
        let mut out = vec![0u8; 255 * 32 + 1];
        assert_eq!(
            hkdf_sha256(b"s", b"ikm", b"i", &mut out),
            Err(CryptoError::KeyDerivationFailed)
        );
    }
}
