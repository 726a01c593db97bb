//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::{CryptoError, ID_SIZE};

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Generate a random 32-byte array.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random identifier: 16 bytes rendered as 32 lowercase hex characters.
///
/// Used for session ids, request ids and broadcast correlation ids.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_id() -> Result<String, CryptoError> {
    let mut buf = [0u8; ID_SIZE];
    fill_random(&mut buf)?;
    Ok(hex::encode(buf))
}
