//! Session error types.
//!
//! Every fallible operation returns one of these; nothing panics. Each type
//! classifies itself with `is_fatal()`:
//!
//! - fatal: the session (or the handshake in progress) must be discarded and
//!   a fresh key agreement run.
//! - non-fatal: the offending message is dropped and the session state is
//!   exactly what it was before the call.

use halyard_crypto::CryptoError;
use thiserror::Error;

/// Errors from the initial key agreement.
///
/// All of them are fatal to the handshake: retry with fresh material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgreementError {
    /// The signed prekey (or identity binding) did not verify against the
    /// remote identity key.
    #[error("signed prekey signature is invalid")]
    SignatureInvalid,

    /// Required prekey material is absent or already consumed.
    #[error("missing prekey: {which}")]
    MissingPrekey {
        /// Which prekey was missing.
        which: &'static str,
    },

    /// A Diffie-Hellman step failed (invalid or low-order point).
    #[error("Diffie-Hellman computation failed")]
    DhComputationFailed,

    /// The initial message payload failed to authenticate.
    #[error("initial message failed authentication")]
    AuthenticationFailed,

    /// Key derivation or payload sealing failed.
    #[error("agreement crypto error: {0}")]
    Crypto(CryptoError),

    /// The post-quantum KEM step failed.
    #[cfg(feature = "pq")]
    #[error("KEM step failed: {0}")]
    KemFailed(CryptoError),
}

impl AgreementError {
    /// Agreement failures always abort the handshake.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

/// Errors from [`RatchetSession::encrypt`](crate::RatchetSession::encrypt).
///
/// Encryption only fails on conditions that require a re-key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptError {
    /// The sending counter would exceed `u32::MAX`.
    #[error("sending counter overflow")]
    CounterOverflow,

    /// The stored remote ratchet key produced a non-contributory DH output.
    #[error("remote ratchet key is invalid")]
    InvalidRatchetKey,

    /// Key derivation or AEAD sealing failed.
    #[error("cipher failure: {0}")]
    Cipher(#[from] CryptoError),
}

impl EncryptError {
    /// Encryption failures always require a fresh session.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

/// Errors from [`RatchetSession::decrypt`](crate::RatchetSession::decrypt).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    /// AEAD rejected the message, or its ratchet key was unusable.
    #[error("message failed authentication")]
    AuthenticationFailed,

    /// The message key was already consumed or never existed.
    #[error("duplicate or unknown message {message_num}")]
    DuplicateOrUnknownMessage {
        /// Message number from the rejected header.
        message_num: u32,
    },

    /// Decrypting would require storing more skipped keys than allowed.
    #[error("too many skipped messages: {requested} needed, {remaining} slots left")]
    TooManySkippedMessages {
        /// Keys that would have to be stored.
        requested: u64,
        /// Free slots in the skipped-key store.
        remaining: usize,
    },

    /// The receiving counter would exceed `u32::MAX`.
    #[error("receiving counter overflow")]
    CounterOverflow,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    Crypto(CryptoError),
}

impl DecryptError {
    /// Returns true if the session must be discarded.
    ///
    /// Authentication failures and duplicates leave the session untouched;
    /// the message is simply dropped.
    pub fn is_fatal(&self) -> bool {
        match self {
            // Fatal: gap beyond the bound, counter exhaustion, KDF failure
            Self::TooManySkippedMessages { .. } | Self::CounterOverflow | Self::Crypto(_) => true,

            // Transient: drop the message
            Self::AuthenticationFailed | Self::DuplicateOrUnknownMessage { .. } => false,
        }
    }
}

/// Errors from [`SkippedKeyStore`](crate::SkippedKeyStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store holds `capacity` keys and does not evict.
    #[error("skipped key store full ({capacity} entries)")]
    StoreFull {
        /// Configured capacity.
        capacity: usize,
    },
}

impl StoreError {
    /// A full store means the gap exceeded the bound; re-key.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_transient() {
        let err = DecryptError::DuplicateOrUnknownMessage { message_num: 3 };
        assert!(!err.is_fatal());
    }

    #[test]
    fn authentication_failure_is_transient() {
        assert!(!DecryptError::AuthenticationFailed.is_fatal());
    }

    #[test]
    fn skip_bound_is_fatal() {
        let err = DecryptError::TooManySkippedMessages { requested: 5000, remaining: 1000 };
        assert!(err.is_fatal());
        assert!(StoreError::StoreFull { capacity: 1000 }.is_fatal());
    }

    #[test]
    fn agreement_errors_are_fatal() {
        assert!(AgreementError::SignatureInvalid.is_fatal());
        assert!(AgreementError::MissingPrekey { which: "one-time prekey" }.is_fatal());
        assert!(AgreementError::DhComputationFailed.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = DecryptError::TooManySkippedMessages { requested: 12, remaining: 4 };
        assert_eq!(err.to_string(), "too many skipped messages: 12 needed, 4 slots left");
    }
}
