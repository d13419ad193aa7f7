//! Fuzz target for [`RatchetSession::decrypt`]
//!
//! Hostile input on the receive path must never panic, never corrupt state
//! and never yield a plaintext the peer did not send.
//!
//! # Strategy
//!
//! - Genuine traffic: a prefix of real messages from the peer, delivered in
//!   fuzzer-chosen order and multiplicity
//! - Mutations: single-bit flips in header fields or ciphertext of genuine
//!   messages
//! - Forgeries: fully attacker-chosen headers and ciphertexts, including
//!   huge message numbers and unknown ratchet keys
//! - Raw wire: arbitrary bytes through the CBOR decoder
//!
//! # Invariants
//!
//! - Any `Err` leaves the observable session state unchanged
//! - A genuine message decrypts at most once, to its original plaintext
//! - Mutated or forged messages never decrypt
//! - The skipped-key store never exceeds its capacity
//! - NEVER panic on malformed input

#![no_main]

use arbitrary::Arbitrary;
use halyard_core::{RatchetSession, SessionConfig};
use halyard_harness::{Conversation, Side, SimEnv};
use halyard_proto::EncryptedMessage;
use libfuzzer_sys::fuzz_target;

const CAPACITY: usize = 64;

#[derive(Debug, Clone, Arbitrary)]
enum DecryptEvent {
    /// Deliver genuine message `index` (modulo the number sent).
    Deliver { index: u8 },
    /// Deliver a genuine message with one bit flipped.
    Mutate { index: u8, field: MutatedField, bit: u16 },
    /// Deliver an attacker-built message.
    Forge { ratchet_pub: [u8; 32], prev_chain_length: u32, message_num: u32, ciphertext: Vec<u8> },
    /// Deliver whatever the wire decoder makes of these bytes.
    Raw(Vec<u8>),
    /// Bob replies and Alice sends a fresh batch on a new chain.
    Ratchet { count: u8 },
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum MutatedField {
    RatchetPub,
    PrevChainLength,
    MessageNum,
    Ciphertext,
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    seed: u64,
    /// Genuine messages Alice sends before any event.
    initial: u8,
    events: Vec<DecryptEvent>,
}

/// Everything decrypt may touch.
#[derive(Debug, PartialEq, Eq)]
struct Observed {
    root_key: [u8; 32],
    recv_chain: Option<[u8; 32]>,
    send_chain: Option<[u8; 32]>,
    remote_ratchet_pub: [u8; 32],
    ratchet_public: [u8; 32],
    recv_message_num: u32,
    send_message_num: u32,
    skipped: usize,
}

fn observe(session: &RatchetSession<SimEnv>) -> Observed {
    let state = session.state();
    Observed {
        root_key: *state.root_key().secret().as_bytes(),
        recv_chain: state.recv_chain_key().map(|c| *c.secret().as_bytes()),
        send_chain: state.send_chain_key().map(|c| *c.secret().as_bytes()),
        remote_ratchet_pub: *state.remote_ratchet_pub(),
        ratchet_public: state.ratchet_public(),
        recv_message_num: state.recv_message_num(),
        send_message_num: state.send_message_num(),
        skipped: state.skipped_keys().size(),
    }
}

struct Genuine {
    message: EncryptedMessage,
    plaintext: Vec<u8>,
    delivered: bool,
}

fn send_batch(conv: &mut Conversation<SimEnv>, sent: &mut Vec<Genuine>, count: u8) {
    for _ in 0..count % 16 {
        let plaintext = format!("genuine {}", sent.len()).into_bytes();
        let Ok(message) = conv.encrypt(Side::Alice, &plaintext) else {
            return;
        };
        sent.push(Genuine { message, plaintext, delivered: false });
    }
}

fn flip(message: &mut EncryptedMessage, field: MutatedField, bit: u16) {
    let bit = usize::from(bit);
    match field {
        MutatedField::RatchetPub => message.header.ratchet_pub[(bit / 8) % 32] ^= 1 << (bit % 8),
        MutatedField::PrevChainLength => message.header.prev_chain_length ^= 1 << (bit % 32),
        MutatedField::MessageNum => message.header.message_num ^= 1 << (bit % 32),
        MutatedField::Ciphertext => {
            let len = message.ciphertext.len() * 8;
            let bit = bit % len;
            message.ciphertext[bit / 8] ^= 1 << (bit % 8);
        },
    }
}

/// Decrypts on Bob and checks the failure invariants. Returns the plaintext
/// on success.
fn deliver(conv: &mut Conversation<SimEnv>, message: &EncryptedMessage) -> Option<Vec<u8>> {
    let before = observe(conv.session(Side::Bob));
    let result = conv.decrypt(Side::Bob, message);
    let after = observe(conv.session(Side::Bob));

    assert!(after.skipped <= CAPACITY, "skipped store over capacity");
    match result {
        Ok(plaintext) => Some(plaintext),
        Err(e) => {
            assert_eq!(before, after, "failed decrypt ({e}) changed state");
            None
        },
    }
}

fuzz_target!(|input: FuzzInput| {
    let config = SessionConfig { skipped_key_capacity: CAPACITY, ..SessionConfig::default() };
    let Ok(mut conv) = Conversation::establish(SimEnv::with_seed(input.seed), config, 1) else {
        return;
    };

    let mut sent = Vec::new();
    send_batch(&mut conv, &mut sent, input.initial);

    for event in input.events.iter().take(256) {
        match event {
            DecryptEvent::Deliver { index } => {
                if sent.is_empty() {
                    continue;
                }
                let index = usize::from(*index) % sent.len();
                let genuine = &mut sent[index];
                let message = genuine.message.clone();
                if let Some(plaintext) = deliver(&mut conv, &message) {
                    assert!(!genuine.delivered, "genuine message delivered twice");
                    assert_eq!(plaintext, genuine.plaintext, "wrong plaintext");
                    genuine.delivered = true;
                }
            },
            DecryptEvent::Mutate { index, field, bit } => {
                if sent.is_empty() {
                    continue;
                }
                let mut message = sent[usize::from(*index) % sent.len()].message.clone();
                flip(&mut message, *field, *bit);
                assert!(deliver(&mut conv, &message).is_none(), "mutated message accepted");
            },
            DecryptEvent::Forge { ratchet_pub, prev_chain_length, message_num, ciphertext } => {
                let message = EncryptedMessage {
                    header: halyard_proto::MessageHeader {
                        ratchet_pub: *ratchet_pub,
                        prev_chain_length: *prev_chain_length,
                        message_num: *message_num,
                    },
                    ciphertext: ciphertext.clone(),
                };
                assert!(deliver(&mut conv, &message).is_none(), "forged message accepted");
            },
            DecryptEvent::Raw(bytes) => {
                let Ok(message) = halyard_proto::decode::<EncryptedMessage>(bytes) else {
                    continue;
                };
                if let Some(plaintext) = deliver(&mut conv, &message) {
                    let genuine = sent.iter_mut().find(|g| g.message == message);
                    let Some(genuine) = genuine else {
                        panic!("decoded garbage accepted");
                    };
                    assert!(!genuine.delivered, "genuine message delivered twice");
                    assert_eq!(plaintext, genuine.plaintext, "wrong plaintext");
                    genuine.delivered = true;
                }
            },
            DecryptEvent::Ratchet { count } => {
                let Ok(reply) = conv.encrypt(Side::Bob, b"reply") else {
                    continue;
                };
                if conv.decrypt(Side::Alice, &reply).is_err() {
                    continue;
                }
                send_batch(&mut conv, &mut sent, *count);
            },
        }
    }
});
