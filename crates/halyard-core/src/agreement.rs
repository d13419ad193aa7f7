//! X3DH key agreement.
//!
//! The initiator fetches the responder's [`PublicKeyBundle`] and derives a
//! root key without the responder being online. The responder later derives
//! the same root key from the [`InitialMessage`] and its [`PrekeyStore`].
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)
//! DH2 = DH(EK_A, IK_B)
//! DH3 = DH(EK_A, SPK_B)
//! DH4 = DH(EK_A, OPK_B)        only if a one-time prekey was used
//! SS  = ML-KEM(KPK_B)          only with the `pq` feature and a KEM prekey
//!
//! SK  = HKDF(salt = 0^32, ikm = DH1 || DH2 || DH3 [|| DH4] [|| SS], info)
//! AD  = Encode(IK_A) || Encode(IK_B)
//! ```
//!
//! The order of the DH outputs is part of the protocol. Both sides must
//! concatenate them identically or they derive different secrets.
//!
//! # Security
//!
//! - The signed prekey signature is verified before any DH is computed.
//! - The bundle's X25519 identity must be the Montgomery form of its Ed25519
//!   identity; otherwise the signature would not vouch for the key used in
//!   DH2.
//! - The responder authenticates the sealed initial payload before it
//!   consumes the one-time prekey, so a forged message cannot burn prekeys.

use halyard_crypto::{
    IdentityKeyPair, KeyPair, NONCE_SIZE, RootKey, SecretBuffer, derive_shared_secret,
    encode_public_key, expand_key, identity_x25519_from_ed25519, open, seal, verify_signature,
};
use halyard_proto::{InitialMessage, PUBLIC_KEY_SIZE, PublicKeyBundle, UsedPrekeys, fingerprint};

use crate::{
    config::SessionConfig,
    env::{Environment, generate_key_pair},
    error::AgreementError,
    prekeys::PrekeyStore,
    session::RatchetSession,
};

/// Default HKDF info label for the agreement KDF.
pub const PROTOCOL_INFO: &[u8] = b"X3DHProtocol_v2";

/// Label for the key that seals the initial message payload.
const INITIAL_MESSAGE_LABEL: &[u8] = b"halyard-initial-message";

/// Largest possible IKM: four DH outputs plus a KEM secret.
const MAX_IKM_SIZE: usize = 5 * PUBLIC_KEY_SIZE;

/// Initiator's result: everything needed to open a session and the message
/// to send.
#[derive(Debug)]
pub struct Initiated {
    /// Agreed root key `R0`.
    pub root_key: RootKey,
    /// Ephemeral key pair; becomes the initiator's first ratchet key.
    pub ephemeral: KeyPair,
    /// Responder's signed prekey; the initiator's first remote ratchet key.
    pub remote_signed_prekey: [u8; PUBLIC_KEY_SIZE],
    /// `Encode(IK_A) || Encode(IK_B)`.
    pub associated_data: Vec<u8>,
    /// Message bootstrapping the responder.
    pub initial_message: InitialMessage,
}

/// Responder's result.
#[derive(Debug)]
pub struct Responded {
    /// Agreed root key `R0`.
    pub root_key: RootKey,
    /// Signed prekey pair; becomes the responder's first ratchet key.
    pub signed_prekey: KeyPair,
    /// Initiator's ephemeral key; the responder's first remote ratchet key.
    pub remote_ephemeral: [u8; PUBLIC_KEY_SIZE],
    /// Initiator's X25519 identity key.
    pub remote_identity: [u8; PUBLIC_KEY_SIZE],
    /// `Encode(IK_A) || Encode(IK_B)`.
    pub associated_data: Vec<u8>,
    /// Decrypted initial payload.
    pub payload: Vec<u8>,
}

impl Initiated {
    /// Opens the initiator's session. Returns it with the message to send.
    pub fn into_session<E: Environment>(
        self,
        env: E,
        config: SessionConfig,
    ) -> Result<(RatchetSession<E>, InitialMessage), AgreementError> {
        let session = RatchetSession::initiator(
            env,
            self.root_key,
            self.ephemeral,
            self.remote_signed_prekey,
            self.associated_data,
            config,
        )?;
        Ok((session, self.initial_message))
    }
}

impl Responded {
    /// Opens the responder's session. Returns it with the initial payload.
    pub fn into_session<E: Environment>(
        self,
        env: E,
        config: SessionConfig,
    ) -> Result<(RatchetSession<E>, Vec<u8>), AgreementError> {
        let session = RatchetSession::responder(
            env,
            self.root_key,
            self.signed_prekey,
            self.remote_ephemeral,
            self.associated_data,
            config,
        )?;
        Ok((session, self.payload))
    }
}

/// Runs X3DH with randomness from the environment.
#[derive(Debug, Clone)]
pub struct KeyAgreement<E: Environment> {
    env: E,
    info: &'static [u8],
}

impl<E: Environment> KeyAgreement<E> {
    /// Creates an agreement context with the default protocol label.
    pub fn new(env: E) -> Self {
        Self::with_info(env, PROTOCOL_INFO)
    }

    /// Creates an agreement context with a custom domain-separation label.
    /// Both peers must use the same label.
    pub fn with_info(env: E, info: &'static [u8]) -> Self {
        Self { env, info }
    }

    /// Starts a session with a fresh ephemeral key.
    ///
    /// `one_time_prekey` selects a slot in `bundle.one_time_prekeys`; pass
    /// [`PublicKeyBundle::first_one_time_prekey`] to use one when available.
    /// `payload` is sealed into the initial message.
    pub fn initiate(
        &self,
        identity: &IdentityKeyPair,
        bundle: &PublicKeyBundle,
        one_time_prekey: Option<u32>,
        payload: &[u8],
    ) -> Result<Initiated, AgreementError> {
        let ephemeral = generate_key_pair(&self.env);
        self.initiate_with_ephemeral(identity, ephemeral, bundle, one_time_prekey, payload)
    }

    /// Starts a session with a caller-supplied ephemeral key.
    pub fn initiate_with_ephemeral(
        &self,
        identity: &IdentityKeyPair,
        ephemeral: KeyPair,
        bundle: &PublicKeyBundle,
        one_time_prekey: Option<u32>,
        payload: &[u8],
    ) -> Result<Initiated, AgreementError> {
        verify_bundle(bundle)?;

        let remote_identity = bundle.identity_key_x25519;
        let remote_signed_prekey = bundle.signed_prekey.public_key;
        let remote_one_time = one_time_prekey
            .map(|index| {
                bundle
                    .one_time_prekey(index)
                    .ok_or(AgreementError::MissingPrekey { which: "one-time prekey" })
            })
            .transpose()?;

        let mut ikm = SecretBuffer::with_capacity(MAX_IKM_SIZE);
        append_dh(&mut ikm, identity.agreement_key(), &remote_signed_prekey)?;
        append_dh(&mut ikm, &ephemeral, &remote_identity)?;
        append_dh(&mut ikm, &ephemeral, &remote_signed_prekey)?;
        if let Some(one_time) = remote_one_time {
            append_dh(&mut ikm, &ephemeral, one_time)?;
        }
        let kem_ciphertext = self.encapsulate_kem(bundle, &mut ikm)?;

        let shared = derive_shared_secret(ikm.as_bytes(), self.info).map_err(AgreementError::Crypto)?;
        drop(ikm);

        let local_identity = identity.agreement_key().public_bytes();
        let associated_data = associated_data(&local_identity, &remote_identity);

        let payload_key =
            expand_key(&shared, INITIAL_MESSAGE_LABEL).map_err(AgreementError::Crypto)?;
        let nonce: [u8; NONCE_SIZE] = self.env.random_array();
        let sealed =
            seal(&payload_key, &nonce, payload, &associated_data).map_err(AgreementError::Crypto)?;

        let initial_message = InitialMessage {
            identity_key: local_identity,
            ephemeral_key: ephemeral.public_bytes(),
            used_prekeys: UsedPrekeys { signed_prekey: true, one_time_prekey_index: one_time_prekey },
            ciphertext: sealed[NONCE_SIZE..].to_vec(),
            nonce,
            kem_ciphertext,
        };

        tracing::debug!(
            remote = %fingerprint(&remote_identity),
            one_time_prekey,
            "initiated key agreement"
        );

        Ok(Initiated {
            root_key: RootKey::new(shared),
            ephemeral,
            remote_signed_prekey,
            associated_data,
            initial_message,
        })
    }

    /// Completes the agreement on the responder side.
    ///
    /// Consumes the referenced one-time prekey from `prekeys` only after the
    /// initial payload authenticates.
    pub fn respond(
        &self,
        prekeys: &mut PrekeyStore,
        message: &InitialMessage,
    ) -> Result<Responded, AgreementError> {
        if !message.used_prekeys.signed_prekey {
            return Err(AgreementError::MissingPrekey { which: "signed prekey" });
        }

        let one_time = message
            .used_prekeys
            .one_time_prekey_index
            .map(|index| {
                prekeys
                    .one_time_prekey(index)
                    .ok_or(AgreementError::MissingPrekey { which: "one-time prekey" })
            })
            .transpose()?;

        let mut ikm = SecretBuffer::with_capacity(MAX_IKM_SIZE);
        append_dh(&mut ikm, prekeys.signed_prekey(), &message.identity_key)?;
        append_dh(&mut ikm, prekeys.identity().agreement_key(), &message.ephemeral_key)?;
        append_dh(&mut ikm, prekeys.signed_prekey(), &message.ephemeral_key)?;
        if let Some(one_time) = one_time {
            append_dh(&mut ikm, one_time, &message.ephemeral_key)?;
        }
        decapsulate_kem(prekeys, message, &mut ikm)?;

        let shared = derive_shared_secret(ikm.as_bytes(), self.info).map_err(AgreementError::Crypto)?;
        drop(ikm);

        let local_identity = prekeys.identity().agreement_key().public_bytes();
        let associated_data = associated_data(&message.identity_key, &local_identity);

        let payload_key =
            expand_key(&shared, INITIAL_MESSAGE_LABEL).map_err(AgreementError::Crypto)?;
        let mut sealed = Vec::with_capacity(NONCE_SIZE + message.ciphertext.len());
        sealed.extend_from_slice(&message.nonce);
        sealed.extend_from_slice(&message.ciphertext);
        let payload = open(&payload_key, &sealed, &associated_data).map_err(|_| {
            tracing::warn!(
                remote = %fingerprint(&message.identity_key),
                "initial message failed authentication"
            );
            AgreementError::AuthenticationFailed
        })?;

        if let Some(index) = message.used_prekeys.one_time_prekey_index {
            prekeys.take_one_time_prekey(index);
        }

        tracing::debug!(
            remote = %fingerprint(&message.identity_key),
            one_time_prekey = message.used_prekeys.one_time_prekey_index,
            "responded to key agreement"
        );

        Ok(Responded {
            root_key: RootKey::new(shared),
            signed_prekey: prekeys.signed_prekey().clone(),
            remote_ephemeral: message.ephemeral_key,
            remote_identity: message.identity_key,
            associated_data,
            payload,
        })
    }

    #[cfg(feature = "pq")]
    fn encapsulate_kem(
        &self,
        bundle: &PublicKeyBundle,
        ikm: &mut SecretBuffer,
    ) -> Result<Option<Vec<u8>>, AgreementError> {
        let Some(kem_prekey) = &bundle.kem_prekey else {
            return Ok(None);
        };
        verify_signature(&bundle.identity_key_ed25519, &kem_prekey.public_key, &kem_prekey.signature)
            .map_err(|_| AgreementError::SignatureInvalid)?;

        let mut seed: [u8; 32] = self.env.random_array();
        let result = halyard_crypto::kem::encapsulate(&kem_prekey.public_key, seed);
        zeroize::Zeroize::zeroize(&mut seed);
        let (ciphertext, shared) = result.map_err(AgreementError::KemFailed)?;

        ikm.extend_from_slice(shared.as_bytes());
        Ok(Some(ciphertext))
    }

    #[cfg(not(feature = "pq"))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn encapsulate_kem(
        &self,
        _bundle: &PublicKeyBundle,
        _ikm: &mut SecretBuffer,
    ) -> Result<Option<Vec<u8>>, AgreementError> {
        Ok(None)
    }
}

#[cfg(feature = "pq")]
fn decapsulate_kem(
    prekeys: &PrekeyStore,
    message: &InitialMessage,
    ikm: &mut SecretBuffer,
) -> Result<(), AgreementError> {
    let Some(ciphertext) = &message.kem_ciphertext else {
        return Ok(());
    };
    let pair = prekeys.kem_prekey().ok_or(AgreementError::MissingPrekey { which: "KEM prekey" })?;
    let shared = pair.decapsulate(ciphertext).map_err(AgreementError::KemFailed)?;
    ikm.extend_from_slice(shared.as_bytes());
    Ok(())
}

#[cfg(not(feature = "pq"))]
fn decapsulate_kem(
    _prekeys: &PrekeyStore,
    message: &InitialMessage,
    _ikm: &mut SecretBuffer,
) -> Result<(), AgreementError> {
    if message.kem_ciphertext.is_some() {
        return Err(AgreementError::MissingPrekey { which: "KEM prekey" });
    }
    Ok(())
}

fn verify_bundle(bundle: &PublicKeyBundle) -> Result<(), AgreementError> {
    let encoded = encode_public_key(&bundle.signed_prekey.public_key);
    verify_signature(&bundle.identity_key_ed25519, &encoded, &bundle.signed_prekey.signature)
        .map_err(|_| AgreementError::SignatureInvalid)?;

    let expected = identity_x25519_from_ed25519(&bundle.identity_key_ed25519)
        .map_err(|_| AgreementError::SignatureInvalid)?;
    if expected != bundle.identity_key_x25519 {
        return Err(AgreementError::SignatureInvalid);
    }
    Ok(())
}

fn append_dh(
    ikm: &mut SecretBuffer,
    local: &KeyPair,
    remote: &[u8; PUBLIC_KEY_SIZE],
) -> Result<(), AgreementError> {
    let shared = local.diffie_hellman(remote).map_err(|_| AgreementError::DhComputationFailed)?;
    ikm.extend_from_slice(shared.as_bytes());
    Ok(())
}

fn associated_data(
    initiator: &[u8; PUBLIC_KEY_SIZE],
    responder: &[u8; PUBLIC_KEY_SIZE],
) -> Vec<u8> {
    let mut ad = Vec::with_capacity(2 * (PUBLIC_KEY_SIZE + 1));
    ad.extend_from_slice(&encode_public_key(initiator));
    ad.extend_from_slice(&encode_public_key(responder));
    ad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::TestEnv;

    fn setup(seed: u64) -> (KeyAgreement<TestEnv>, IdentityKeyPair, PrekeyStore) {
        let env = TestEnv::with_seed(seed);
        let alice = IdentityKeyPair::from_seed(env.random_array());
        let bob = PrekeyStore::generate(&env, 4);
        (KeyAgreement::new(env), alice, bob)
    }

    #[test]
    fn both_sides_derive_same_root_key() {
        let (agreement, alice, mut bob) = setup(1);
        let bundle = bob.publish_bundle();

        let initiated =
            agreement.initiate(&alice, &bundle, bundle.first_one_time_prekey(), b"hello").unwrap();
        let responded = agreement.respond(&mut bob, &initiated.initial_message).unwrap();

        assert_eq!(initiated.root_key, responded.root_key);
        assert_eq!(initiated.associated_data, responded.associated_data);
        assert_eq!(responded.payload, b"hello");
        assert_eq!(responded.remote_ephemeral, initiated.ephemeral.public_bytes());
        assert_eq!(responded.signed_prekey.public_bytes(), initiated.remote_signed_prekey);
    }

    #[test]
    fn agreement_without_one_time_prekey() {
        let (agreement, alice, mut bob) = setup(2);
        let bundle = bob.publish_bundle();

        let initiated = agreement.initiate(&alice, &bundle, None, b"").unwrap();
        let responded = agreement.respond(&mut bob, &initiated.initial_message).unwrap();

        assert_eq!(initiated.root_key, responded.root_key);
        assert_eq!(bob.one_time_prekey_count(), 4);
    }

    #[test]
    fn one_time_prekey_changes_secret() {
        let (agreement, alice, bob) = setup(3);
        let bundle = bob.publish_bundle();
        let ephemeral = KeyPair::from_secret_bytes([8; 32]);

        let with = agreement
            .initiate_with_ephemeral(&alice, ephemeral.clone(), &bundle, Some(0), b"")
            .unwrap();
        let without =
            agreement.initiate_with_ephemeral(&alice, ephemeral, &bundle, None, b"").unwrap();

        assert_ne!(with.root_key, without.root_key);
    }

    #[test]
    fn forged_signature_is_rejected() {
        let (agreement, alice, bob) = setup(4);
        let mut bundle = bob.publish_bundle();
        bundle.signed_prekey.signature[0] ^= 0x01;

        let err = agreement.initiate(&alice, &bundle, None, b"").unwrap_err();
        assert_eq!(err, AgreementError::SignatureInvalid);
    }

    #[test]
    fn substituted_signed_prekey_is_rejected() {
        let (agreement, alice, bob) = setup(5);
        let mut bundle = bob.publish_bundle();
        bundle.signed_prekey.public_key = KeyPair::from_secret_bytes([1; 32]).public_bytes();

        let err = agreement.initiate(&alice, &bundle, None, b"").unwrap_err();
        assert_eq!(err, AgreementError::SignatureInvalid);
    }

    #[test]
    fn mismatched_identity_forms_are_rejected() {
        let (agreement, alice, bob) = setup(6);
        let mut bundle = bob.publish_bundle();
        bundle.identity_key_x25519 = KeyPair::from_secret_bytes([1; 32]).public_bytes();

        let err = agreement.initiate(&alice, &bundle, None, b"").unwrap_err();
        assert_eq!(err, AgreementError::SignatureInvalid);
    }

    #[test]
    fn spent_one_time_prekey_in_bundle_is_missing() {
        let (agreement, alice, mut bob) = setup(7);
        bob.take_one_time_prekey(0);
        let bundle = bob.publish_bundle();

        let err = agreement.initiate(&alice, &bundle, Some(0), b"").unwrap_err();
        assert_eq!(err, AgreementError::MissingPrekey { which: "one-time prekey" });
    }

    #[test]
    fn one_time_prekey_cannot_be_reused() {
        let (agreement, alice, mut bob) = setup(8);
        let bundle = bob.publish_bundle();

        let first = agreement.initiate(&alice, &bundle, Some(2), b"one").unwrap();
        agreement.respond(&mut bob, &first.initial_message).unwrap();

        let second = agreement.initiate(&alice, &bundle, Some(2), b"two").unwrap();
        let err = agreement.respond(&mut bob, &second.initial_message).unwrap_err();
        assert_eq!(err, AgreementError::MissingPrekey { which: "one-time prekey" });
    }

    #[test]
    fn tampered_initial_message_keeps_prekey() {
        let (agreement, alice, mut bob) = setup(9);
        let bundle = bob.publish_bundle();

        let initiated = agreement.initiate(&alice, &bundle, Some(1), b"payload").unwrap();
        let mut forged = initiated.initial_message.clone();
        forged.ciphertext[0] ^= 0xFF;

        let err = agreement.respond(&mut bob, &forged).unwrap_err();
        assert_eq!(err, AgreementError::AuthenticationFailed);
        assert!(bob.one_time_prekey(1).is_some());

        agreement.respond(&mut bob, &initiated.initial_message).unwrap();
        assert!(bob.one_time_prekey(1).is_none());
    }

    #[test]
    fn low_order_ephemeral_fails_dh() {
        let (agreement, _alice, mut bob) = setup(10);
        let bundle = bob.publish_bundle();
        let message = InitialMessage {
            identity_key: bundle.identity_key_x25519,
            ephemeral_key: [0u8; 32],
            used_prekeys: UsedPrekeys { signed_prekey: true, one_time_prekey_index: None },
            ciphertext: vec![0; 16],
            nonce: [0; 24],
            kem_ciphertext: None,
        };

        let err = agreement.respond(&mut bob, &message).unwrap_err();
        assert_eq!(err, AgreementError::DhComputationFailed);
    }

    #[test]
    fn missing_signed_prekey_flag_is_rejected() {
        let (agreement, alice, mut bob) = setup(11);
        let bundle = bob.publish_bundle();
        let mut message = agreement.initiate(&alice, &bundle, None, b"").unwrap().initial_message;
        message.used_prekeys.signed_prekey = false;

        let err = agreement.respond(&mut bob, &message).unwrap_err();
        assert_eq!(err, AgreementError::MissingPrekey { which: "signed prekey" });
    }

    #[test]
    fn different_labels_do_not_agree() {
        let env = TestEnv::with_seed(12);
        let alice = IdentityKeyPair::from_seed(env.random_array());
        let mut bob = PrekeyStore::generate(&env, 0);
        let bundle = bob.publish_bundle();

        let initiated =
            KeyAgreement::with_info(env.clone(), b"label-a").initiate(&alice, &bundle, None, b"x").unwrap();
        let err = KeyAgreement::with_info(env, b"label-b")
            .respond(&mut bob, &initiated.initial_message)
            .unwrap_err();
        assert_eq!(err, AgreementError::AuthenticationFailed);
    }

    #[test]
    fn sessions_from_agreement_talk() {
        let (agreement, alice, mut bob) = setup(14);
        let bundle = bob.publish_bundle();
        let env = TestEnv::with_seed(15);

        let initiated =
            agreement.initiate(&alice, &bundle, bundle.first_one_time_prekey(), b"hi bob").unwrap();
        let (mut alice_session, initial) =
            initiated.into_session(env.clone(), SessionConfig::default()).unwrap();
        let (mut bob_session, payload) = agreement
            .respond(&mut bob, &initial)
            .unwrap()
            .into_session(env, SessionConfig::default())
            .unwrap();
        assert_eq!(payload, b"hi bob");

        let message = alice_session.encrypt(b"first").unwrap();
        assert_eq!(bob_session.decrypt(&message).unwrap(), b"first");
        let reply = bob_session.encrypt(b"reply").unwrap();
        assert_eq!(alice_session.decrypt(&reply).unwrap(), b"reply");
    }

    #[cfg(feature = "pq")]
    #[test]
    fn hybrid_agreement_matches() {
        let (agreement, alice, mut bob) = setup(13);
        bob.enable_kem_prekey(&TestEnv::with_seed(99));
        let bundle = bob.publish_bundle();

        let initiated = agreement.initiate(&alice, &bundle, None, b"pq").unwrap();
        assert!(initiated.initial_message.kem_ciphertext.is_some());

        let responded = agreement.respond(&mut bob, &initiated.initial_message).unwrap();
        assert_eq!(initiated.root_key, responded.root_key);
    }
}
