//! Two sessions wired together through a real key agreement.

use arbitrary::Arbitrary;
use halyard_core::{
    AgreementError, DecryptError, EncryptError, Environment, KeyAgreement, PrekeyStore,
    RatchetSession, SessionConfig,
};
use halyard_crypto::IdentityKeyPair;
use halyard_proto::EncryptedMessage;

/// One end of a conversation. Alice initiates, Bob responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum Side {
    /// Initiator.
    Alice,
    /// Responder.
    Bob,
}

impl Side {
    /// The other end.
    pub fn peer(self) -> Self {
        match self {
            Self::Alice => Self::Bob,
            Self::Bob => Self::Alice,
        }
    }
}

/// Alice and Bob after X3DH, ready to exchange ratchet messages.
pub struct Conversation<E: Environment> {
    alice: RatchetSession<E>,
    bob: RatchetSession<E>,
    bob_prekeys: PrekeyStore,
}

impl<E: Environment> Conversation<E> {
    /// Runs the full handshake: Bob publishes `one_time_prekeys` one-time
    /// prekeys, Alice initiates against Bob's bundle (using the first one-time
    /// prekey if there is one), Bob responds.
    pub fn establish(
        env: E,
        config: SessionConfig,
        one_time_prekeys: u32,
    ) -> Result<Self, AgreementError> {
        let agreement = KeyAgreement::new(env.clone());
        let alice_identity = IdentityKeyPair::from_seed(env.random_array());
        let mut bob_prekeys = PrekeyStore::generate(&env, one_time_prekeys);
        let bundle = bob_prekeys.publish_bundle();

        let initiated =
            agreement.initiate(&alice_identity, &bundle, bundle.first_one_time_prekey(), b"")?;
        let (alice, initial_message) = initiated.into_session(env.clone(), config)?;
        let (bob, _payload) =
            agreement.respond(&mut bob_prekeys, &initial_message)?.into_session(env, config)?;

        Ok(Self { alice, bob, bob_prekeys })
    }

    /// Session held by `side`.
    pub fn session(&self, side: Side) -> &RatchetSession<E> {
        match side {
            Side::Alice => &self.alice,
            Side::Bob => &self.bob,
        }
    }

    /// Bob's prekey material after the handshake.
    pub fn bob_prekeys(&self) -> &PrekeyStore {
        &self.bob_prekeys
    }

    /// Encrypts on `from`'s session.
    pub fn encrypt(&mut self, from: Side, plaintext: &[u8]) -> Result<EncryptedMessage, EncryptError> {
        self.session_mut(from).encrypt(plaintext)
    }

    /// Decrypts on `to`'s session.
    pub fn decrypt(&mut self, to: Side, message: &EncryptedMessage) -> Result<Vec<u8>, DecryptError> {
        self.session_mut(to).decrypt(message)
    }

    fn session_mut(&mut self, side: Side) -> &mut RatchetSession<E> {
        match side {
            Side::Alice => &mut self.alice,
            Side::Bob => &mut self.bob,
        }
    }
}

impl<E: Environment> std::fmt::Debug for Conversation<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("alice", &self.alice)
            .field("bob", &self.bob)
            .finish_non_exhaustive()
    }
}
