//! Published prekey material.
//!
//! A [`PublicKeyBundle`] is what a prekey distribution service hands to an
//! initiator. It is public by construction, but signatures and KEM keys are
//! long, so `Debug` prints lengths for them.

use serde::{Deserialize, Serialize};

use crate::message::PUBLIC_KEY_SIZE;

/// A medium-term X25519 prekey signed by the owner's Ed25519 identity key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPrekeyPublic {
    /// X25519 public key.
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Ed25519 signature over the encoded public key.
    pub signature: Vec<u8>,
}

impl std::fmt::Debug for SignedPrekeyPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPrekeyPublic")
            .field("public_key", &fingerprint(&self.public_key))
            .field("signature", &format!("<{} bytes>", self.signature.len()))
            .finish()
    }
}

/// A signed post-quantum encapsulation key (ML-KEM-768).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemPrekeyPublic {
    /// Encoded encapsulation key.
    pub public_key: Vec<u8>,
    /// Ed25519 signature over `public_key`.
    pub signature: Vec<u8>,
}

impl std::fmt::Debug for KemPrekeyPublic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemPrekeyPublic")
            .field("public_key", &format!("<{} bytes>", self.public_key.len()))
            .field("signature", &format!("<{} bytes>", self.signature.len()))
            .finish()
    }
}

/// Publishable key material for one account.
///
/// # Invariants
///
/// - `identity_key_x25519` is the Montgomery form of `identity_key_ed25519`.
/// - One-time prekey slots keep their index for the lifetime of the bundle.
///   A consumed slot is published as `None` so that indices referenced by
///   in-flight initial messages stay valid.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyBundle {
    /// Ed25519 identity verifying key.
    pub identity_key_ed25519: [u8; PUBLIC_KEY_SIZE],
    /// X25519 form of the identity key, used for Diffie-Hellman.
    pub identity_key_x25519: [u8; PUBLIC_KEY_SIZE],
    /// Current signed prekey.
    pub signed_prekey: SignedPrekeyPublic,
    /// One-time prekeys by slot index.
    pub one_time_prekeys: Vec<Option<[u8; PUBLIC_KEY_SIZE]>>,
    /// Post-quantum prekey, present when the owner supports hybrid agreement.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kem_prekey: Option<KemPrekeyPublic>,
}

impl PublicKeyBundle {
    /// Returns the first unspent one-time prekey slot, if any.
    pub fn first_one_time_prekey(&self) -> Option<u32> {
        self.one_time_prekeys
            .iter()
            .position(Option::is_some)
            .and_then(|index| u32::try_from(index).ok())
    }

    /// Looks up a one-time prekey by slot index.
    pub fn one_time_prekey(&self, index: u32) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        let index = usize::try_from(index).ok()?;
        self.one_time_prekeys.get(index)?.as_ref()
    }
}

impl std::fmt::Debug for PublicKeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let available = self.one_time_prekeys.iter().filter(|slot| slot.is_some()).count();
        f.debug_struct("PublicKeyBundle")
            .field("identity_key_ed25519", &fingerprint(&self.identity_key_ed25519))
            .field("identity_key_x25519", &fingerprint(&self.identity_key_x25519))
            .field("signed_prekey", &self.signed_prekey)
            .field(
                "one_time_prekeys",
                &format!("{available}/{} available", self.one_time_prekeys.len()),
            )
            .field("kem_prekey", &self.kem_prekey)
            .finish()
    }
}

/// Short hex prefix of a public key, for logs and `Debug` output.
pub fn fingerprint(key: &[u8]) -> String {
    key.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
