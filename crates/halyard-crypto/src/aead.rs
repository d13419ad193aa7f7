//! XChaCha20-Poly1305 sealing with a nonce-prefixed layout.
//!
//! Wire layout of a sealed message:
//!
//! ```text
//! ┌──────────────┬────────────────────────────┬──────────┐
//! │ nonce (24 B) │ ciphertext (len(plaintext))│ tag (16) │
//! └──────────────┴────────────────────────────┴──────────┘
//! ```
//!
//! The 192-bit nonce is large enough to pick at random for every message.
//! Randomness is the caller's job.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{error::CryptoError, secret::SecretKey};

/// XChaCha20 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Encrypts `plaintext` and returns `nonce || ciphertext || tag`.
pub fn seal(
    key: &SecretKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad: associated_data })
        .map_err(|_| CryptoError::Aead)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts the output of [`seal`].
///
/// Fails with [`CryptoError::Aead`] if anything was modified, including the
/// associated data.
pub fn open(key: &SecretKey, sealed: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Aead);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad: associated_data })
        .map_err(|_| CryptoError::Aead)
}
