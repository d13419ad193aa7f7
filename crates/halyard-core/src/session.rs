//! Double Ratchet session.
//!
//! A [`RatchetSession`] owns one [`SessionState`] and mutates it only through
//! [`encrypt`](RatchetSession::encrypt) and
//! [`decrypt`](RatchetSession::decrypt).
//!
//! # Bootstrap
//!
//! The initiator's X3DH ephemeral key doubles as its first ratchet key `A1`,
//! and the responder's signed prekey doubles as its first ratchet key. Both
//! sides derive the first chain with `KDF_RK(R0, DH(A1, SPK_B))`: a sending
//! chain for the initiator, a receiving chain for the responder. The
//! responder therefore decrypts the initiator's first message without a DH
//! ratchet, and performs its own send-side ratchet on its first `encrypt`.
//!
//! # Atomicity
//!
//! `decrypt` computes every state change on copies (new root key, receiving
//! chain, counters, skipped keys to park) and commits them only after the
//! AEAD tag verifies. An error return leaves the state bit-for-bit unchanged,
//! so a forged or replayed message cannot desynchronize the session.
//!
//! # Concurrency
//!
//! Not thread-safe by design of the protocol: message numbering must be
//! strictly ordered. Methods take `&mut self`; wrap a session in a mutex or
//! give it a dedicated task if several callers share it.

use std::collections::VecDeque;

use halyard_crypto::{ChainKey, KeyPair, MessageKey, NONCE_SIZE, RootKey, open, seal};
use halyard_proto::{EncryptedMessage, MessageHeader, PUBLIC_KEY_SIZE, fingerprint};

use crate::{
    config::SessionConfig,
    env::{Environment, generate_key_pair},
    error::{AgreementError, DecryptError, EncryptError},
    skipped::SkippedKeyStore,
};

/// Mutable state of one session.
///
/// Fields are private; read accessors exist for inspection and tests.
pub struct SessionState {
    root_key: RootKey,
    send_chain: Option<ChainKey>,
    recv_chain: Option<ChainKey>,
    ratchet_key_pair: KeyPair,
    remote_ratchet_pub: [u8; PUBLIC_KEY_SIZE],
    prev_chain_length: u32,
    send_message_num: u32,
    recv_message_num: u32,
    skipped_keys: SkippedKeyStore,
    retired_remote_keys: VecDeque<[u8; PUBLIC_KEY_SIZE]>,
    retired_limit: usize,
    associated_data: Vec<u8>,
}

impl SessionState {
    /// Current root key.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    /// Current sending chain key, absent until the next send-side ratchet.
    pub fn send_chain_key(&self) -> Option<&ChainKey> {
        self.send_chain.as_ref()
    }

    /// Current receiving chain key.
    pub fn recv_chain_key(&self) -> Option<&ChainKey> {
        self.recv_chain.as_ref()
    }

    /// Our current ratchet public key.
    pub fn ratchet_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.ratchet_key_pair.public_bytes()
    }

    /// Most recently accepted remote ratchet public key.
    pub fn remote_ratchet_pub(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.remote_ratchet_pub
    }

    /// Length of our previous sending chain.
    pub fn prev_chain_length(&self) -> u32 {
        self.prev_chain_length
    }

    /// Next sending message number.
    pub fn send_message_num(&self) -> u32 {
        self.send_message_num
    }

    /// Next expected receiving message number on the current chain.
    pub fn recv_message_num(&self) -> u32 {
        self.recv_message_num
    }

    /// Parked keys for skipped messages.
    pub fn skipped_keys(&self) -> &SkippedKeyStore {
        &self.skipped_keys
    }

    /// Associated data bound into every message of this session.
    pub fn associated_data(&self) -> &[u8] {
        &self.associated_data
    }

    fn message_ad(&self, header: &MessageHeader) -> Vec<u8> {
        let header = header.to_bytes();
        let mut ad = Vec::with_capacity(self.associated_data.len() + header.len());
        ad.extend_from_slice(&self.associated_data);
        ad.extend_from_slice(&header);
        ad
    }

    fn retire_remote_key(&mut self, key: [u8; PUBLIC_KEY_SIZE]) {
        if self.retired_limit == 0 {
            return;
        }
        if self.retired_remote_keys.len() == self.retired_limit {
            self.retired_remote_keys.pop_front();
        }
        self.retired_remote_keys.push_back(key);
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("ratchet_pub", &fingerprint(&self.ratchet_key_pair.public_bytes()))
            .field("remote_ratchet_pub", &fingerprint(&self.remote_ratchet_pub))
            .field("has_send_chain", &self.send_chain.is_some())
            .field("has_recv_chain", &self.recv_chain.is_some())
            .field("prev_chain_length", &self.prev_chain_length)
            .field("send_message_num", &self.send_message_num)
            .field("recv_message_num", &self.recv_message_num)
            .field("skipped_keys", &self.skipped_keys)
            .finish_non_exhaustive()
    }
}

/// Key derived for a skipped message, waiting to be parked.
struct PendingSkip {
    ratchet_pub: [u8; PUBLIC_KEY_SIZE],
    message_num: u32,
    key: MessageKey,
}

/// Double Ratchet session bound to an environment.
pub struct RatchetSession<E: Environment> {
    env: E,
    state: SessionState,
}

impl<E: Environment> RatchetSession<E> {
    /// Opens the initiator side.
    ///
    /// `ratchet_key_pair` is the X3DH ephemeral key, `remote_signed_prekey`
    /// the responder's signed prekey.
    pub fn initiator(
        env: E,
        root_key: RootKey,
        ratchet_key_pair: KeyPair,
        remote_signed_prekey: [u8; PUBLIC_KEY_SIZE],
        associated_data: Vec<u8>,
        config: SessionConfig,
    ) -> Result<Self, AgreementError> {
        let dh = ratchet_key_pair
            .diffie_hellman(&remote_signed_prekey)
            .map_err(|_| AgreementError::DhComputationFailed)?;
        let (root_key, send_chain) = root_key.ratchet(&dh).map_err(AgreementError::Crypto)?;

        tracing::debug!(
            ratchet_pub = %fingerprint(&ratchet_key_pair.public_bytes()),
            "opened initiator session"
        );

        Ok(Self {
            env,
            state: SessionState {
                root_key,
                send_chain: Some(send_chain),
                recv_chain: None,
                ratchet_key_pair,
                remote_ratchet_pub: remote_signed_prekey,
                prev_chain_length: 0,
                send_message_num: 0,
                recv_message_num: 0,
                skipped_keys: SkippedKeyStore::new(config.skipped_key_capacity),
                retired_remote_keys: VecDeque::with_capacity(config.retired_ratchet_keys),
                retired_limit: config.retired_ratchet_keys,
                associated_data,
            },
        })
    }

    /// Opens the responder side.
    ///
    /// `signed_prekey` is the responder's signed prekey pair,
    /// `remote_ephemeral` the initiator's first ratchet key from the
    /// `InitialMessage`.
    pub fn responder(
        env: E,
        root_key: RootKey,
        signed_prekey: KeyPair,
        remote_ephemeral: [u8; PUBLIC_KEY_SIZE],
        associated_data: Vec<u8>,
        config: SessionConfig,
    ) -> Result<Self, AgreementError> {
        let dh = signed_prekey
            .diffie_hellman(&remote_ephemeral)
            .map_err(|_| AgreementError::DhComputationFailed)?;
        let (root_key, recv_chain) = root_key.ratchet(&dh).map_err(AgreementError::Crypto)?;

        tracing::debug!(
            remote_ratchet_pub = %fingerprint(&remote_ephemeral),
            "opened responder session"
        );

        Ok(Self {
            env,
            state: SessionState {
                root_key,
                send_chain: None,
                recv_chain: Some(recv_chain),
                ratchet_key_pair: signed_prekey,
                remote_ratchet_pub: remote_ephemeral,
                prev_chain_length: 0,
                send_message_num: 0,
                recv_message_num: 0,
                skipped_keys: SkippedKeyStore::new(config.skipped_key_capacity),
                retired_remote_keys: VecDeque::with_capacity(config.retired_ratchet_keys),
                retired_limit: config.retired_ratchet_keys,
                associated_data,
            },
        })
    }

    /// Read-only view of the session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Encrypts one message.
    ///
    /// Performs a send-side DH ratchet first if the sending chain is absent
    /// (first send after the peer's ratchet key changed).
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptedMessage, EncryptError> {
        let state = &self.state;

        let mut ratchet = None;
        let (chain, prev_chain_length, message_num) = match &state.send_chain {
            Some(chain) => (chain.clone(), state.prev_chain_length, state.send_message_num),
            None => {
                let key_pair = generate_key_pair(&self.env);
                let dh = key_pair
                    .diffie_hellman(&state.remote_ratchet_pub)
                    .map_err(|_| EncryptError::InvalidRatchetKey)?;
                let (root_key, chain) = state.root_key.ratchet(&dh)?;
                ratchet = Some((root_key, key_pair));
                (chain, state.send_message_num, 0)
            },
        };

        let next_message_num = message_num.checked_add(1).ok_or(EncryptError::CounterOverflow)?;
        let (next_chain, message_key) = chain.advance()?;

        let ratchet_pub = ratchet
            .as_ref()
            .map_or_else(|| state.ratchet_key_pair.public_bytes(), |(_, pair)| pair.public_bytes());
        let header = MessageHeader { ratchet_pub, prev_chain_length, message_num };

        let nonce: [u8; NONCE_SIZE] = self.env.random_array();
        let ciphertext = seal(message_key.secret(), &nonce, plaintext, &state.message_ad(&header))?;
        drop(message_key);

        if let Some((root_key, key_pair)) = ratchet {
            tracing::debug!(
                ratchet_pub = %fingerprint(&ratchet_pub),
                prev_chain_length,
                "send-side DH ratchet"
            );
            self.state.root_key = root_key;
            self.state.ratchet_key_pair = key_pair;
            self.state.prev_chain_length = prev_chain_length;
        }
        self.state.send_chain = Some(next_chain);
        self.state.send_message_num = next_message_num;

        Ok(EncryptedMessage { header, ciphertext })
    }

    /// Decrypts one message.
    ///
    /// On any error the session state is unchanged. Non-fatal errors
    /// ([`DecryptError::is_fatal`] is false) mean the message should simply be
    /// dropped.
    pub fn decrypt(&mut self, message: &EncryptedMessage) -> Result<Vec<u8>, DecryptError> {
        let header = &message.header;

        if let Some(plaintext) = self.decrypt_skipped(message)? {
            return Ok(plaintext);
        }

        let state = &self.state;
        let is_new_ratchet = header.ratchet_pub != state.remote_ratchet_pub;

        if is_new_ratchet && state.retired_remote_keys.contains(&header.ratchet_pub) {
            tracing::warn!(message_num = header.message_num, "message on retired chain");
            return Err(DecryptError::DuplicateOrUnknownMessage { message_num: header.message_num });
        }
        if !is_new_ratchet && header.message_num < state.recv_message_num {
            tracing::warn!(message_num = header.message_num, "duplicate message");
            return Err(DecryptError::DuplicateOrUnknownMessage { message_num: header.message_num });
        }

        let mut pending = Vec::new();
        let mut new_root = None;
        let mut parking_overflow = None;

        let (chain, recv_message_num) = if is_new_ratchet {
            // Park what is left of the old receiving chain before replacing it.
            // `prev_chain_length` is unauthenticated here, so an overflow only
            // counts once the message itself decrypts on the new chain.
            if let Some(old_chain) = &state.recv_chain {
                match skip_message_keys(
                    state,
                    old_chain.clone(),
                    state.remote_ratchet_pub,
                    state.recv_message_num,
                    header.prev_chain_length,
                    &mut pending,
                ) {
                    Ok(_) => {},
                    Err(overflow @ DecryptError::TooManySkippedMessages { .. }) => {
                        parking_overflow = Some(overflow);
                    },
                    Err(e) => return Err(e),
                }
            }
            let dh = state
                .ratchet_key_pair
                .diffie_hellman(&header.ratchet_pub)
                .map_err(|_| DecryptError::AuthenticationFailed)?;
            let (root_key, chain) = state.root_key.ratchet(&dh).map_err(DecryptError::Crypto)?;
            new_root = Some(root_key);
            (chain, 0)
        } else {
            let Some(chain) = &state.recv_chain else {
                return Err(DecryptError::DuplicateOrUnknownMessage {
                    message_num: header.message_num,
                });
            };
            (chain.clone(), state.recv_message_num)
        };

        let chain = skip_message_keys(
            state,
            chain,
            header.ratchet_pub,
            recv_message_num,
            header.message_num,
            &mut pending,
        )?;
        let next_recv_num =
            header.message_num.checked_add(1).ok_or(DecryptError::CounterOverflow)?;
        let (next_chain, message_key) = chain.advance().map_err(DecryptError::Crypto)?;

        let plaintext = open(message_key.secret(), &message.ciphertext, &state.message_ad(header))
            .map_err(|_| {
                tracing::warn!(
                    message_num = header.message_num,
                    new_ratchet = is_new_ratchet,
                    "message failed authentication"
                );
                DecryptError::AuthenticationFailed
            })?;
        drop(message_key);

        if let Some(overflow) = parking_overflow {
            return Err(overflow);
        }
        self.commit(header, new_root, next_chain, next_recv_num, pending)?;
        Ok(plaintext)
    }

    /// Tries a parked key. `Ok(None)` means no key is stored for the header.
    fn decrypt_skipped(&mut self, message: &EncryptedMessage) -> Result<Option<Vec<u8>>, DecryptError> {
        let header = &message.header;
        let Some(key) = self.state.skipped_keys.peek(&header.ratchet_pub, header.message_num) else {
            return Ok(None);
        };

        let plaintext = open(key.secret(), &message.ciphertext, &self.state.message_ad(header))
            .map_err(|_| {
                tracing::warn!(message_num = header.message_num, "skipped message failed authentication");
                DecryptError::AuthenticationFailed
            })?;

        self.state.skipped_keys.take(&header.ratchet_pub, header.message_num);
        tracing::debug!(
            message_num = header.message_num,
            remaining = self.state.skipped_keys.size(),
            "decrypted with skipped key"
        );
        Ok(Some(plaintext))
    }

    fn commit(
        &mut self,
        header: &MessageHeader,
        new_root: Option<RootKey>,
        recv_chain: ChainKey,
        recv_message_num: u32,
        pending: Vec<PendingSkip>,
    ) -> Result<(), DecryptError> {
        let state = &mut self.state;

        // Capacity was checked while deriving, so these inserts cannot fail.
        for skip in pending {
            state.skipped_keys.set(&skip.ratchet_pub, skip.message_num, skip.key).map_err(|_| {
                DecryptError::TooManySkippedMessages {
                    requested: 1,
                    remaining: state.skipped_keys.remaining(),
                }
            })?;
        }

        if let Some(root_key) = new_root {
            tracing::debug!(
                remote_ratchet_pub = %fingerprint(&header.ratchet_pub),
                prev_chain_length = header.prev_chain_length,
                "receive-side DH ratchet"
            );
            let retired = state.remote_ratchet_pub;
            state.retire_remote_key(retired);
            state.root_key = root_key;
            state.remote_ratchet_pub = header.ratchet_pub;
            state.send_chain = None;
        }
        state.recv_chain = Some(recv_chain);
        state.recv_message_num = recv_message_num;
        Ok(())
    }
}

impl<E: Environment> std::fmt::Debug for RatchetSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetSession").field("state", &self.state).finish_non_exhaustive()
    }
}

/// Advances `chain` from `from` to `until`, collecting each skipped message
/// key into `pending`. Returns the chain positioned at `until`.
///
/// Fails before deriving anything if the store could not hold the result.
fn skip_message_keys(
    state: &SessionState,
    mut chain: ChainKey,
    ratchet_pub: [u8; PUBLIC_KEY_SIZE],
    from: u32,
    until: u32,
    pending: &mut Vec<PendingSkip>,
) -> Result<ChainKey, DecryptError> {
    if until <= from {
        return Ok(chain);
    }

    let requested = u64::from(until - from);
    let remaining = state.skipped_keys.remaining().saturating_sub(pending.len());
    if requested > u64::try_from(remaining).unwrap_or(u64::MAX) {
        tracing::warn!(requested, remaining, "skip exceeds skipped-key capacity");
        return Err(DecryptError::TooManySkippedMessages { requested, remaining });
    }

    for message_num in from..until {
        let (next, key) = chain.advance().map_err(DecryptError::Crypto)?;
        pending.push(PendingSkip { ratchet_pub, message_num, key });
        chain = next;
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use halyard_crypto::SecretKey;

    use super::*;
    use crate::{config::DEFAULT_RETIRED_RATCHET_KEYS, env::testing::TestEnv};

    /// Builds a connected pair the same way the agreement does, from a fixed
    /// root key.
    fn pair_with(config: SessionConfig) -> (RatchetSession<TestEnv>, RatchetSession<TestEnv>) {
        let env = TestEnv::with_seed(42);
        let root = RootKey::new(SecretKey::from_bytes([7; 32]));
        let alice_ephemeral = generate_key_pair(&env);
        let bob_signed_prekey = generate_key_pair(&env);
        let ad = b"alice|bob".to_vec();

        let alice = RatchetSession::initiator(
            env.clone(),
            root.clone(),
            alice_ephemeral.clone(),
            bob_signed_prekey.public_bytes(),
            ad.clone(),
            config,
        )
        .unwrap();
        let bob = RatchetSession::responder(
            env,
            root,
            bob_signed_prekey,
            alice_ephemeral.public_bytes(),
            ad,
            config,
        )
        .unwrap();
        (alice, bob)
    }

    fn pair() -> (RatchetSession<TestEnv>, RatchetSession<TestEnv>) {
        pair_with(SessionConfig::default())
    }

    /// Everything observable about a state, for before/after comparisons.
    #[derive(Debug, PartialEq, Eq)]
    struct Snapshot {
        root_key: SecretKey,
        send_chain: Option<SecretKey>,
        recv_chain: Option<SecretKey>,
        ratchet_pub: [u8; 32],
        remote_ratchet_pub: [u8; 32],
        counters: (u32, u32, u32),
        skipped: usize,
    }

    fn snapshot(session: &RatchetSession<TestEnv>) -> Snapshot {
        let state = session.state();
        Snapshot {
            root_key: state.root_key().secret().clone(),
            send_chain: state.send_chain_key().map(|ck| ck.secret().clone()),
            recv_chain: state.recv_chain_key().map(|ck| ck.secret().clone()),
            ratchet_pub: state.ratchet_public(),
            remote_ratchet_pub: *state.remote_ratchet_pub(),
            counters: (state.prev_chain_length(), state.send_message_num(), state.recv_message_num()),
            skipped: state.skipped_keys().size(),
        }
    }

    #[test]
    fn first_message_scenario() {
        let (mut alice, mut bob) = pair();
        let a1 = alice.state().ratchet_public();
        assert_eq!(bob.state().remote_ratchet_pub(), &a1);

        let message = alice.encrypt(b"hi").unwrap();
        let expected = MessageHeader { ratchet_pub: a1, prev_chain_length: 0, message_num: 0 };
        assert_eq!(message.header, expected);

        assert_eq!(bob.decrypt(&message).unwrap(), b"hi");
        assert_eq!(bob.state().recv_message_num(), 1);
    }

    #[test]
    fn replies_ratchet_both_ways() {
        let (mut alice, mut bob) = pair();

        let m0 = alice.encrypt(b"a0").unwrap();
        let m1 = alice.encrypt(b"a1").unwrap();
        bob.decrypt(&m0).unwrap();
        bob.decrypt(&m1).unwrap();

        let bob_ratchet_before = bob.state().ratchet_public();
        let reply = bob.encrypt(b"b0").unwrap();
        assert_ne!(reply.header.ratchet_pub, bob_ratchet_before);
        assert_eq!(reply.header.message_num, 0);
        assert_eq!(alice.decrypt(&reply).unwrap(), b"b0");
        assert!(alice.state().send_chain_key().is_none());

        let next = alice.encrypt(b"a2").unwrap();
        assert_ne!(next.header.ratchet_pub, m0.header.ratchet_pub);
        assert_eq!(next.header.prev_chain_length, 2);
        assert_eq!(next.header.message_num, 0);
        assert_eq!(bob.decrypt(&next).unwrap(), b"a2");
    }

    #[test]
    fn out_of_order_within_chain() {
        let (mut alice, mut bob) = pair();
        let m0 = alice.encrypt(b"zero").unwrap();
        let m1 = alice.encrypt(b"one").unwrap();
        let m2 = alice.encrypt(b"two").unwrap();

        assert_eq!(bob.decrypt(&m2).unwrap(), b"two");
        assert_eq!(bob.state().skipped_keys().size(), 2);
        assert_eq!(bob.decrypt(&m0).unwrap(), b"zero");
        assert_eq!(bob.decrypt(&m1).unwrap(), b"one");
        assert_eq!(bob.state().skipped_keys().size(), 0);
    }

    #[test]
    fn replayed_skipped_message_is_duplicate() {
        let (mut alice, mut bob) = pair();
        let m0 = alice.encrypt(b"zero").unwrap();
        let m1 = alice.encrypt(b"one").unwrap();

        bob.decrypt(&m1).unwrap();
        bob.decrypt(&m0).unwrap();
        let err = bob.decrypt(&m0).unwrap_err();
        assert_eq!(err, DecryptError::DuplicateOrUnknownMessage { message_num: 0 });
        assert!(!err.is_fatal());
    }

    #[test]
    fn replayed_in_order_message_is_duplicate() {
        let (mut alice, mut bob) = pair();
        let m0 = alice.encrypt(b"zero").unwrap();
        bob.decrypt(&m0).unwrap();
        assert_eq!(
            bob.decrypt(&m0).unwrap_err(),
            DecryptError::DuplicateOrUnknownMessage { message_num: 0 }
        );
    }

    #[test]
    fn late_message_from_previous_chain() {
        let (mut alice, mut bob) = pair();
        let m0 = alice.encrypt(b"a0").unwrap();
        let m1 = alice.encrypt(b"a1").unwrap();
        bob.decrypt(&m0).unwrap();

        let reply = bob.encrypt(b"b0").unwrap();
        alice.decrypt(&reply).unwrap();
        let m2 = alice.encrypt(b"a2 new chain").unwrap();

        // m2 arrives first: the rest of the old chain (m1) gets parked.
        assert_eq!(bob.decrypt(&m2).unwrap(), b"a2 new chain");
        assert!(bob.state().skipped_keys().has(&m1.header.ratchet_pub, 1));
        assert_eq!(bob.decrypt(&m1).unwrap(), b"a1");
        assert_eq!(bob.state().skipped_keys().size(), 0);
    }

    #[test]
    fn replay_on_retired_chain_is_duplicate() {
        let (mut alice, mut bob) = pair();
        let m0 = alice.encrypt(b"a0").unwrap();
        bob.decrypt(&m0).unwrap();
        let reply = bob.encrypt(b"b0").unwrap();
        alice.decrypt(&reply).unwrap();
        bob.decrypt(&alice.encrypt(b"a1").unwrap()).unwrap();

        let before = snapshot(&bob);
        let err = bob.decrypt(&m0).unwrap_err();
        assert_eq!(err, DecryptError::DuplicateOrUnknownMessage { message_num: 0 });
        assert_eq!(snapshot(&bob), before);
    }

    fn round_trip(alice: &mut RatchetSession<TestEnv>, bob: &mut RatchetSession<TestEnv>) {
        bob.decrypt(&alice.encrypt(b"ping").unwrap()).unwrap();
        alice.decrypt(&bob.encrypt(b"pong").unwrap()).unwrap();
    }

    #[test]
    fn replay_after_retired_window_is_not_fatal() {
        let config = SessionConfig { skipped_key_capacity: 3, ..SessionConfig::default() };
        let (mut alice, mut bob) = pair_with(config);
        for i in 0..5 {
            bob.decrypt(&alice.encrypt(&[i]).unwrap()).unwrap();
        }
        alice.decrypt(&bob.encrypt(b"reply").unwrap()).unwrap();
        let next_chain = alice.encrypt(b"next chain").unwrap();
        assert_eq!(next_chain.header.prev_chain_length, 5);
        bob.decrypt(&next_chain).unwrap();

        for _ in 0..=DEFAULT_RETIRED_RATCHET_KEYS {
            round_trip(&mut alice, &mut bob);
        }

        let before = snapshot(&bob);
        let err = bob.decrypt(&next_chain).unwrap_err();
        assert!(!err.is_fatal(), "{err:?}");
        assert_eq!(snapshot(&bob), before);
        round_trip(&mut alice, &mut bob);
    }

    #[test]
    fn forged_previous_chain_length_is_not_fatal() {
        let config = SessionConfig { skipped_key_capacity: 3, ..SessionConfig::default() };
        let (mut alice, mut bob) = pair_with(config);
        bob.decrypt(&alice.encrypt(b"a0").unwrap()).unwrap();

        let forged = EncryptedMessage {
            header: MessageHeader { ratchet_pub: [9; 32], prev_chain_length: 1_000_000, message_num: 0 },
            ciphertext: vec![0; 64],
        };
        let before = snapshot(&bob);
        assert_eq!(bob.decrypt(&forged).unwrap_err(), DecryptError::AuthenticationFailed);
        assert_eq!(snapshot(&bob), before);
    }

    #[test]
    fn authentic_message_beyond_parking_capacity_is_fatal() {
        let config = SessionConfig { skipped_key_capacity: 3, ..SessionConfig::default() };
        let (mut alice, mut bob) = pair_with(config);
        let first_chain: Vec<_> = (0..5).map(|i| alice.encrypt(&[i]).unwrap()).collect();
        bob.decrypt(&first_chain[0]).unwrap();
        alice.decrypt(&bob.encrypt(b"reply").unwrap()).unwrap();
        let next_chain = alice.encrypt(b"next chain").unwrap();

        let before = snapshot(&bob);
        let err = bob.decrypt(&next_chain).unwrap_err();
        assert_eq!(err, DecryptError::TooManySkippedMessages { requested: 4, remaining: 3 });
        assert!(err.is_fatal());
        assert_eq!(snapshot(&bob), before);
    }

    #[test]
    fn skip_beyond_capacity_is_rejected_without_mutation() {
        let config = SessionConfig { skipped_key_capacity: 3, ..SessionConfig::default() };
        let (mut alice, mut bob) = pair_with(config);
        let messages: Vec<_> = (0..5).map(|i| alice.encrypt(&[i]).unwrap()).collect();

        let before = snapshot(&bob);
        let err = bob.decrypt(&messages[4]).unwrap_err();
        assert_eq!(err, DecryptError::TooManySkippedMessages { requested: 4, remaining: 3 });
        assert!(err.is_fatal());
        assert_eq!(snapshot(&bob), before);

        // A gap that fits still works.
        assert_eq!(bob.decrypt(&messages[3]).unwrap(), vec![3]);
        assert_eq!(bob.state().skipped_keys().size(), 3);
    }

    #[test]
    fn full_store_keeps_existing_entries() {
        let config = SessionConfig { skipped_key_capacity: 2, ..SessionConfig::default() };
        let (mut alice, mut bob) = pair_with(config);
        let messages: Vec<_> = (0..6).map(|i| alice.encrypt(&[i]).unwrap()).collect();

        bob.decrypt(&messages[2]).unwrap();
        assert_eq!(bob.state().skipped_keys().size(), 2);

        let err = bob.decrypt(&messages[5]).unwrap_err();
        assert!(matches!(err, DecryptError::TooManySkippedMessages { .. }));

        assert_eq!(bob.decrypt(&messages[0]).unwrap(), vec![0]);
        assert_eq!(bob.decrypt(&messages[1]).unwrap(), vec![1]);
    }

    #[test]
    fn tampered_ciphertext_leaves_state_unchanged() {
        let (mut alice, mut bob) = pair();
        let mut message = alice.encrypt(b"secret").unwrap();
        let last = message.ciphertext.len() - 1;
        message.ciphertext[last] ^= 0x80;

        let before = snapshot(&bob);
        assert_eq!(bob.decrypt(&message).unwrap_err(), DecryptError::AuthenticationFailed);
        assert_eq!(snapshot(&bob), before);
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let (mut alice, mut bob) = pair();
        let _m0 = alice.encrypt(b"zero").unwrap();
        let mut m1 = alice.encrypt(b"one").unwrap();
        m1.header.prev_chain_length ^= 1;

        let before = snapshot(&bob);
        assert_eq!(bob.decrypt(&m1).unwrap_err(), DecryptError::AuthenticationFailed);
        assert_eq!(snapshot(&bob), before);
    }

    #[test]
    fn forged_ratchet_key_does_not_commit_ratchet() {
        let (mut alice, mut bob) = pair();
        let mut message = alice.encrypt(b"x").unwrap();
        message.header.ratchet_pub[0] ^= 0x01;

        let before = snapshot(&bob);
        assert_eq!(bob.decrypt(&message).unwrap_err(), DecryptError::AuthenticationFailed);
        assert_eq!(snapshot(&bob), before);

        message.header.ratchet_pub[0] ^= 0x01;
        assert_eq!(bob.decrypt(&message).unwrap(), b"x");
    }

    #[test]
    fn tampered_skipped_message_keeps_key() {
        let (mut alice, mut bob) = pair();
        let m0 = alice.encrypt(b"zero").unwrap();
        let m1 = alice.encrypt(b"one").unwrap();
        bob.decrypt(&m1).unwrap();

        let mut forged = m0.clone();
        forged.ciphertext[NONCE_SIZE] ^= 0x01;
        assert_eq!(bob.decrypt(&forged).unwrap_err(), DecryptError::AuthenticationFailed);
        assert!(bob.state().skipped_keys().has(&m0.header.ratchet_pub, 0));
        assert_eq!(bob.decrypt(&m0).unwrap(), b"zero");
    }

    #[test]
    fn associated_data_binds_session() {
        let (mut alice, _bob) = pair();
        let env = TestEnv::with_seed(42);
        let root = RootKey::new(SecretKey::from_bytes([7; 32]));
        let alice_ephemeral = generate_key_pair(&env);
        let bob_signed_prekey = generate_key_pair(&env);
        let mut other_bob = RatchetSession::responder(
            env,
            root,
            bob_signed_prekey,
            alice_ephemeral.public_bytes(),
            b"mallory|bob".to_vec(),
            SessionConfig::default(),
        )
        .unwrap();

        let message = alice.encrypt(b"hi").unwrap();
        assert_eq!(other_bob.decrypt(&message).unwrap_err(), DecryptError::AuthenticationFailed);
    }

    #[test]
    fn message_on_unknown_send_chain_is_unknown() {
        let (mut alice, _bob) = pair();
        // Alice has no receiving chain yet; a header reusing her remote key
        // cannot be decrypted.
        let forged = EncryptedMessage {
            header: MessageHeader {
                ratchet_pub: *alice.state().remote_ratchet_pub(),
                prev_chain_length: 0,
                message_num: 0,
            },
            ciphertext: vec![0; 40],
        };
        assert_eq!(
            alice.decrypt(&forged).unwrap_err(),
            DecryptError::DuplicateOrUnknownMessage { message_num: 0 }
        );
    }

    #[test]
    fn receive_ratchet_replaces_old_chain() {
        let (mut alice, mut bob) = pair();
        bob.decrypt(&alice.encrypt(b"a0").unwrap()).unwrap();
        alice.decrypt(&bob.encrypt(b"b0").unwrap()).unwrap();

        let old_recv = bob.state().recv_chain_key().map(|ck| ck.secret().clone());
        let old_root = bob.state().root_key().secret().clone();
        bob.decrypt(&alice.encrypt(b"a1").unwrap()).unwrap();

        assert_ne!(bob.state().recv_chain_key().map(|ck| ck.secret().clone()), old_recv);
        assert_ne!(bob.state().root_key().secret(), &old_root);
        assert_eq!(bob.state().recv_message_num(), 1);
    }

    #[test]
    fn send_counter_overflow_is_fatal() {
        let (mut alice, _bob) = pair();
        alice.state.send_message_num = u32::MAX;
        let err = alice.encrypt(b"x").unwrap_err();
        assert_eq!(err, EncryptError::CounterOverflow);
        assert!(err.is_fatal());
        assert_eq!(alice.state().send_message_num(), u32::MAX);
    }

    #[test]
    fn recv_counter_overflow_is_fatal() {
        let (mut alice, mut bob) = pair();
        bob.state.recv_message_num = u32::MAX;
        let mut message = alice.encrypt(b"x").unwrap();
        message.header.message_num = u32::MAX;

        let before = snapshot(&bob);
        let err = bob.decrypt(&message).unwrap_err();
        assert_eq!(err, DecryptError::CounterOverflow);
        assert!(err.is_fatal());
        assert_eq!(snapshot(&bob), before);
    }

    #[test]
    fn debug_output_has_no_key_material() {
        let (alice, _bob) = pair();
        let rendered = format!("{alice:?}");
        assert!(rendered.contains("send_message_num"));
        assert!(!rendered.contains("root_key"));
    }
}
