//! Asymmetric keys: X25519 key pairs and Ed25519 identities.
//!
//! # Security
//!
//! - Private halves are `StaticSecret` / `SigningKey`, both zeroized on drop.
//! - [`KeyPair::diffie_hellman`] rejects non-contributory results, which is
//!   what a low-order point from a malicious peer produces.
//! - An identity has one secret (the Ed25519 seed). Its X25519 form is derived
//!   from the same scalar, so a bundle can publish both without a second
//!   long-term secret.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{
    error::CryptoError,
    secret::{KEY_SIZE, SecretKey},
};

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Key-type tag prepended by [`encode_public_key`].
const CURVE25519_TAG: u8 = 0x01;

/// Encodes an X25519 public key for signing and associated data:
/// `0x01 || key`.
pub fn encode_public_key(public: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE + 1] {
    let mut out = [0u8; KEY_SIZE + 1];
    out[0] = CURVE25519_TAG;
    out[1..].copy_from_slice(public);
    out
}

/// An X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Builds a key pair from 32 random bytes. Clamping happens inside
    /// `x25519-dalek`.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self::from_static(StaticSecret::from(bytes))
    }

    fn from_static(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half as raw bytes.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    /// X25519 with a peer public key.
    pub fn diffie_hellman(&self, their_public: &[u8; KEY_SIZE]) -> Result<SecretKey, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*their_public));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(SecretKey::from_bytes(shared.to_bytes()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fingerprint: String =
            self.public.as_bytes().iter().take(4).map(|b| format!("{b:02x}")).collect();
        f.debug_struct("KeyPair")
            .field("public", &fingerprint)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Long-term identity: an Ed25519 signing key plus its X25519 form.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
    agreement: KeyPair,
}

impl IdentityKeyPair {
    /// Derives the identity from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let agreement = KeyPair::from_static(StaticSecret::from(signing.to_scalar_bytes()));
        Self { signing, agreement }
    }

    /// Ed25519 verifying key bytes.
    pub fn verifying_key_bytes(&self) -> [u8; KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// X25519 form of the identity, used in agreement DH steps.
    pub fn agreement_key(&self) -> &KeyPair {
        &self.agreement
    }

    /// Signs `message` with the identity key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair").field("agreement", &self.agreement).finish_non_exhaustive()
    }
}

/// Verifies an Ed25519 signature from raw bytes.
///
/// Strict verification: small-order keys and non-canonical `R` are rejected.
pub fn verify_signature(
    verifying_key: &[u8; KEY_SIZE],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(verifying_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify_strict(message, &signature).map_err(|_| CryptoError::InvalidSignature)
}

/// Maps an Ed25519 verifying key to the X25519 public key of the same
/// identity.
pub fn identity_x25519_from_ed25519(
    verifying_key: &[u8; KEY_SIZE],
) -> Result<[u8; KEY_SIZE], CryptoError> {
    let key = VerifyingKey::from_bytes(verifying_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(key.to_montgomery().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_is_symmetric() {
        let alice = KeyPair::from_secret_bytes([1; 32]);
        let bob = KeyPair::from_secret_bytes([2; 32]);
        let ab = alice.diffie_hellman(&bob.public_bytes()).unwrap();
        let ba = bob.diffie_hellman(&alice.public_bytes()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn dh_rejects_low_order_point() {
        let alice = KeyPair::from_secret_bytes([1; 32]);
        assert_eq!(alice.diffie_hellman(&[0u8; 32]), Err(CryptoError::NonContributory));
    }

    #[test]
    fn identity_forms_agree() {
        let identity = IdentityKeyPair::from_seed([9; 32]);
        let derived = identity_x25519_from_ed25519(&identity.verifying_key_bytes()).unwrap();
        assert_eq!(derived, identity.agreement_key().public_bytes());
    }

    #[test]
    fn identity_agreement_key_does_dh() {
        let identity = IdentityKeyPair::from_seed([9; 32]);
        let peer = KeyPair::from_secret_bytes([3; 32]);
        let a = identity.agreement_key().diffie_hellman(&peer.public_bytes()).unwrap();
        let b = peer.diffie_hellman(&identity.agreement_key().public_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signature_over_encoded_key_verifies() {
        let identity = IdentityKeyPair::from_seed([5; 32]);
        let prekey = KeyPair::from_secret_bytes([6; 32]);
        let encoded = encode_public_key(&prekey.public_bytes());
        let signature = identity.sign(&encoded);

        assert!(verify_signature(&identity.verifying_key_bytes(), &encoded, &signature).is_ok());
        assert_eq!(
            verify_signature(&identity.verifying_key_bytes(), &prekey.public_bytes(), &signature),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn short_signature_is_invalid() {
        let identity = IdentityKeyPair::from_seed([5; 32]);
        assert_eq!(
            verify_signature(&identity.verifying_key_bytes(), b"msg", &[0u8; 10]),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn small_order_key_is_rejected() {
        // Identity point as key, R = identity and s = 0 satisfy the
        // unbatched equation for any message.
        let mut identity_point = [0u8; 32];
        identity_point[0] = 1;
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature[0] = 1;

        assert_eq!(
            verify_signature(&identity_point, b"any message", &signature),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn encoded_key_has_tag() {
        let encoded = encode_public_key(&[0xEE; 32]);
        assert_eq!(encoded[0], 0x01);
        assert_eq!(hex::encode(&encoded[1..3]), "eeee");
    }

    #[test]
    fn debug_hides_secret() {
        let pair = KeyPair::from_secret_bytes([0x77; 32]);
        assert!(format!("{pair:?}").contains("<redacted>"));
    }
}
