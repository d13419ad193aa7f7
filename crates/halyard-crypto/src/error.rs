//! Error types for cryptographic primitives.

use thiserror::Error;

/// Errors from cryptographic operations.
///
/// Variants deliberately carry no key or plaintext material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Input key or buffer had the wrong size.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// AEAD seal or open failed. On open this means the ciphertext, nonce or
    /// associated data was tampered with, or the key is wrong.
    #[error("AEAD operation failed")]
    Aead,

    /// HKDF expansion rejected the requested output length.
    #[error("key derivation failed")]
    Kdf,

    /// Diffie-Hellman produced an all-zero output (low-order peer point).
    #[error("Diffie-Hellman output is not contributory")]
    NonContributory,

    /// Bytes do not decode to a valid public key.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Ed25519 signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// ML-KEM encapsulation or decapsulation failed.
    #[cfg(feature = "pq")]
    #[error("KEM operation failed: {reason}")]
    Kem {
        /// Which step failed.
        reason: &'static str,
    },
}
