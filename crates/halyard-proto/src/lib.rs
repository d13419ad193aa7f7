//! Halyard wire structures
//!
//! Everything a peer puts on the wire lives here: the published prekey bundle,
//! the initial message that bootstraps a responder, and the per-message
//! envelope produced by the ratchet.
//!
//! # Design
//!
//! The crate has no cryptographic dependencies. Keys travel as raw byte arrays
//! and are interpreted by `halyard-crypto` / `halyard-core`. Whole messages are
//! encoded as CBOR via [`encode`] and [`decode`]; the message header has an
//! additional fixed 40-byte form ([`MessageHeader::to_bytes`]) that is bound
//! into every AEAD call as associated data.
//!
//! # Invariants
//!
//! - The header encoding is stable: `ratchet_pub || prev_chain_length (BE) ||
//!   message_num (BE)`. Changing it breaks every live session.
//! - Wire types never carry secret material, but fields that are opaque
//!   ciphertext are still redacted in `Debug` output.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bundle;
pub mod error;
pub mod message;

use serde::{Serialize, de::DeserializeOwned};

pub use bundle::{KemPrekeyPublic, PublicKeyBundle, SignedPrekeyPublic, fingerprint};
pub use error::ProtoError;
pub use message::{
    EncryptedMessage, HEADER_SIZE, InitialMessage, MessageHeader, PUBLIC_KEY_SIZE, UsedPrekeys,
};

/// Encodes a wire value as CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| ProtoError::Encode { reason: e.to_string() })?;
    Ok(bytes)
}

/// Decodes a wire value from CBOR.
///
/// Trailing bytes after the first complete item are ignored by `ciborium`;
/// callers framing multiple values must length-prefix them.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtoError::Decode { reason: e.to_string() })
}
