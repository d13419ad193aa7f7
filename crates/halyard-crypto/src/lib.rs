//! Halyard Cryptographic Primitives
//!
//! Building blocks for the Halyard session protocol: X3DH-style key agreement
//! inputs, the Double Ratchet KDF chains, and message sealing.
//!
//! # Design
//!
//! All functions in this crate are pure. Anything that needs randomness (key
//! generation, nonces, KEM encapsulation) takes the random bytes as an
//! argument, so the caller decides where entropy comes from:
//!
//! - Deterministic testing with seeded RNG
//! - Sans-IO architecture compatibility
//! - No process-wide initialization step
//!
//! # Security Properties
//!
//! - Every secret lives in a type that zeroizes on drop ([`SecretBuffer`],
//!   [`SecretKey`], the KDF chain keys, and the X25519/Ed25519 private keys).
//! - Chain steps are HMAC-based and one-way. A leaked message key reveals
//!   neither neighbouring message keys nor the chain key that produced it.
//! - `Debug` output never contains key bytes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
#[cfg(feature = "pq")]
pub mod kem;
pub mod keys;
pub mod secret;

pub use aead::{NONCE_SIZE, TAG_SIZE, open, seal};
pub use error::CryptoError;
pub use kdf::{ChainKey, MessageKey, RootKey, derive_shared_secret, expand_key};
pub use keys::{
    IdentityKeyPair, KeyPair, SIGNATURE_SIZE, encode_public_key, identity_x25519_from_ed25519,
    verify_signature,
};
pub use secret::{KEY_SIZE, SecretBuffer, SecretKey};
