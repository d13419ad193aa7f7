//! Local prekey material for the responder side of key agreement.
//!
//! Holds the identity, the current signed prekey and the one-time prekeys
//! whose public halves are published in a [`PublicKeyBundle`].
//!
//! # Invariants
//!
//! - One-time prekey slots never move. Consuming slot `i` leaves an empty
//!   slot, so an index in an in-flight `InitialMessage` always refers to the
//!   key that was published at that position.
//! - A one-time prekey is handed out at most once. The store is the single
//!   owner of "spent"; a second message referencing the slot fails with
//!   `MissingPrekey`.

#[cfg(feature = "pq")]
use halyard_crypto::kem::KemKeyPair;
use halyard_crypto::{IdentityKeyPair, KeyPair, SIGNATURE_SIZE, encode_public_key};
#[cfg(feature = "pq")]
use halyard_proto::KemPrekeyPublic;
use halyard_proto::{PublicKeyBundle, SignedPrekeyPublic};
use zeroize::Zeroize;

use crate::env::{Environment, generate_key_pair};

/// Private prekey material for one account.
pub struct PrekeyStore {
    identity: IdentityKeyPair,
    signed_prekey: KeyPair,
    signed_prekey_signature: [u8; SIGNATURE_SIZE],
    one_time_prekeys: Vec<Option<KeyPair>>,
    #[cfg(feature = "pq")]
    kem_prekey: Option<(KemKeyPair, Vec<u8>)>,
}

impl PrekeyStore {
    /// Generates a new identity, a signed prekey and `one_time_count`
    /// one-time prekeys.
    pub fn generate<E: Environment>(env: &E, one_time_count: u32) -> Self {
        let mut seed: [u8; 32] = env.random_array();
        let identity = IdentityKeyPair::from_seed(seed);
        seed.zeroize();
        Self::with_identity(env, identity, one_time_count)
    }

    /// Builds prekey material around an existing identity.
    pub fn with_identity<E: Environment>(
        env: &E,
        identity: IdentityKeyPair,
        one_time_count: u32,
    ) -> Self {
        let signed_prekey = generate_key_pair(env);
        let signed_prekey_signature = identity.sign(&encode_public_key(&signed_prekey.public_bytes()));
        let mut store = Self {
            identity,
            signed_prekey,
            signed_prekey_signature,
            one_time_prekeys: Vec::new(),
            #[cfg(feature = "pq")]
            kem_prekey: None,
        };
        store.add_one_time_prekeys(env, one_time_count);
        store
    }

    /// Long-term identity.
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Current signed prekey.
    pub fn signed_prekey(&self) -> &KeyPair {
        &self.signed_prekey
    }

    /// Public bundle for the distribution service.
    pub fn publish_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle {
            identity_key_ed25519: self.identity.verifying_key_bytes(),
            identity_key_x25519: self.identity.agreement_key().public_bytes(),
            signed_prekey: SignedPrekeyPublic {
                public_key: self.signed_prekey.public_bytes(),
                signature: self.signed_prekey_signature.to_vec(),
            },
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|slot| slot.as_ref().map(KeyPair::public_bytes))
                .collect(),
            kem_prekey: self.kem_prekey_public(),
        }
    }

    /// Replaces the signed prekey. Initial messages built against the old
    /// bundle will no longer authenticate.
    pub fn rotate_signed_prekey<E: Environment>(&mut self, env: &E) {
        self.signed_prekey = generate_key_pair(env);
        self.signed_prekey_signature =
            self.identity.sign(&encode_public_key(&self.signed_prekey.public_bytes()));
        tracing::debug!("rotated signed prekey");
    }

    /// Appends `count` fresh one-time prekeys and returns the index of the
    /// first new slot.
    pub fn add_one_time_prekeys<E: Environment>(&mut self, env: &E, count: u32) -> u32 {
        let first = u32::try_from(self.one_time_prekeys.len()).unwrap_or(u32::MAX);
        let room = u32::MAX - first;
        for _ in 0..count.min(room) {
            self.one_time_prekeys.push(Some(generate_key_pair(env)));
        }
        first
    }

    /// Borrows an unspent one-time prekey.
    pub fn one_time_prekey(&self, index: u32) -> Option<&KeyPair> {
        let index = usize::try_from(index).ok()?;
        self.one_time_prekeys.get(index)?.as_ref()
    }

    /// Consumes a one-time prekey. Returns `None` if the slot is empty or out
    /// of range.
    pub fn take_one_time_prekey(&mut self, index: u32) -> Option<KeyPair> {
        let index = usize::try_from(index).ok()?;
        let taken = self.one_time_prekeys.get_mut(index)?.take();
        if taken.is_some() {
            tracing::debug!(index, remaining = self.one_time_prekey_count(), "consumed one-time prekey");
        }
        taken
    }

    /// Number of unspent one-time prekeys.
    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.iter().filter(|slot| slot.is_some()).count()
    }

    /// Generates a signed ML-KEM prekey and publishes it from now on.
    #[cfg(feature = "pq")]
    pub fn enable_kem_prekey<E: Environment>(&mut self, env: &E) {
        let mut seed: [u8; 32] = env.random_array();
        let pair = KemKeyPair::from_seed(seed);
        seed.zeroize();
        let signature = self.identity.sign(&pair.public_bytes()).to_vec();
        self.kem_prekey = Some((pair, signature));
    }

    /// ML-KEM prekey, if enabled.
    #[cfg(feature = "pq")]
    pub fn kem_prekey(&self) -> Option<&KemKeyPair> {
        self.kem_prekey.as_ref().map(|(pair, _)| pair)
    }

    #[cfg(feature = "pq")]
    fn kem_prekey_public(&self) -> Option<KemPrekeyPublic> {
        self.kem_prekey.as_ref().map(|(pair, signature)| KemPrekeyPublic {
            public_key: pair.public_bytes(),
            signature: signature.clone(),
        })
    }

    #[cfg(not(feature = "pq"))]
    fn kem_prekey_public(&self) -> Option<halyard_proto::KemPrekeyPublic> {
        None
    }
}

impl std::fmt::Debug for PrekeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrekeyStore")
            .field("identity", &self.identity)
            .field("signed_prekey", &self.signed_prekey)
            .field("one_time_prekeys", &self.one_time_prekey_count())
            .finish_non_exhaustive()
    }
}
