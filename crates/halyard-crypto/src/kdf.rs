//! Key derivation: the agreement KDF, the root chain and the symmetric chains.
//!
//! ```text
//!  agreement ikm ──HKDF(salt=0)──► RootKey R0
//!
//!  RootKey Rn ──HKDF(salt=Rn, ikm=DH)──► RootKey Rn+1
//!                                    └─► ChainKey CK0
//!
//!  ChainKey CKi ──HMAC("chain")───► ChainKey CKi+1
//!               └─HMAC("message")─► MessageKey MKi
//! ```
//!
//! # Invariants
//!
//! - A root key is consumed by [`RootKey::ratchet`]; the old value is dropped
//!   (and wiped) by the caller once the new pair is committed.
//! - Chain and message keys are derived with distinct HMAC labels, so neither
//!   can be computed from the other.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::CryptoError,
    secret::{KEY_SIZE, SecretKey},
};

type HmacSha256 = Hmac<Sha256>;

/// HKDF info label for root-chain steps.
pub const ROOT_RATCHET_INFO: &[u8] = b"halyard-ratchet-root";

const MESSAGE_LABEL: &[u8] = b"message";
const CHAIN_LABEL: &[u8] = b"chain";

/// Derives the 32-byte agreement secret from concatenated DH outputs.
///
/// HKDF-SHA256 with an all-zero salt and the caller's domain-separation
/// `info`.
pub fn derive_shared_secret(ikm: &[u8], info: &[u8]) -> Result<SecretKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&[0u8; KEY_SIZE]), ikm);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(info, &mut okm).map_err(|_| CryptoError::Kdf)?;
    let key = SecretKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

/// Expands a sub-key from an existing secret under `label`.
pub fn expand_key(secret: &SecretKey, label: &[u8]) -> Result<SecretKey, CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(secret.as_bytes()).map_err(|_| CryptoError::Kdf)?;
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(label, &mut okm).map_err(|_| CryptoError::Kdf)?;
    let key = SecretKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

/// Root of the Double Ratchet. Mixes every DH ratchet output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RootKey(SecretKey);

impl RootKey {
    /// Wraps an agreed secret as the initial root key.
    pub fn new(secret: SecretKey) -> Self {
        Self(secret)
    }

    /// Performs one root-chain step with a fresh DH output.
    ///
    /// Returns the next root key and a new chain key.
    pub fn ratchet(&self, dh_output: &SecretKey) -> Result<(Self, ChainKey), CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(self.0.as_bytes()), dh_output.as_bytes());
        let mut okm = [0u8; 2 * KEY_SIZE];
        hk.expand(ROOT_RATCHET_INFO, &mut okm).map_err(|_| CryptoError::Kdf)?;

        let root = SecretKey::from_slice(&okm[..KEY_SIZE]);
        let chain = SecretKey::from_slice(&okm[KEY_SIZE..]);
        okm.zeroize();

        Ok((Self(root?), ChainKey(chain?)))
    }

    /// Borrows the raw secret.
    pub fn secret(&self) -> &SecretKey {
        &self.0
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootKey(<redacted>)")
    }
}

/// One direction's symmetric chain.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey(SecretKey);

impl ChainKey {
    /// Wraps raw chain key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(SecretKey::from_bytes(bytes))
    }

    /// Symmetric ratchet step: returns the next chain key and the message key
    /// for the current position.
    pub fn advance(&self) -> Result<(Self, MessageKey), CryptoError> {
        let message = hmac_label(&self.0, MESSAGE_LABEL)?;
        let next = hmac_label(&self.0, CHAIN_LABEL)?;
        Ok((Self(next), MessageKey(message)))
    }

    /// Borrows the raw secret.
    pub fn secret(&self) -> &SecretKey {
        &self.0
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChainKey(<redacted>)")
    }
}

/// Single-use key for exactly one AEAD operation.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MessageKey(SecretKey);

impl MessageKey {
    /// Borrows the raw secret.
    pub fn secret(&self) -> &SecretKey {
        &self.0
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageKey(<redacted>)")
    }
}

fn hmac_label(key: &SecretKey, label: &[u8]) -> Result<SecretKey, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: key.as_bytes().len() }
    })?;
    mac.update(label);
    let mut out: [u8; KEY_SIZE] = mac.finalize().into_bytes().into();
    let key = SecretKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}
