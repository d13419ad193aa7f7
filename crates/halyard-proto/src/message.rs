//! Session bootstrap and per-message envelopes.

use serde::{Deserialize, Serialize};

use crate::{bundle::fingerprint, error::ProtoError};

/// Size of an X25519 or Ed25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the fixed header encoding: key, previous chain length, message
/// number.
pub const HEADER_SIZE: usize = PUBLIC_KEY_SIZE + 4 + 4;

/// Which of the responder's prekeys the initiator consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedPrekeys {
    /// Whether the signed prekey participated. Always true for this protocol
    /// version; kept on the wire so the responder can reject anything else.
    pub signed_prekey: bool,
    /// Slot index of the one-time prekey, if one was used.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub one_time_prekey_index: Option<u32>,
}

/// First message from initiator to responder.
///
/// Carries the initiator's public key material plus an application payload
/// sealed under a key derived from the agreed secret. The responder locates
/// its private prekeys via `used_prekeys`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialMessage {
    /// Initiator's X25519 identity key.
    pub identity_key: [u8; PUBLIC_KEY_SIZE],
    /// Initiator's ephemeral key; also its first ratchet public key.
    pub ephemeral_key: [u8; PUBLIC_KEY_SIZE],
    /// Prekeys the initiator consumed.
    pub used_prekeys: UsedPrekeys,
    /// Sealed initial payload (AEAD ciphertext with tag).
    pub ciphertext: Vec<u8>,
    /// XChaCha20 nonce for `ciphertext`.
    pub nonce: [u8; 24],
    /// ML-KEM ciphertext when the agreement was hybrid.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kem_ciphertext: Option<Vec<u8>>,
}

impl std::fmt::Debug for InitialMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialMessage")
            .field("identity_key", &fingerprint(&self.identity_key))
            .field("ephemeral_key", &fingerprint(&self.ephemeral_key))
            .field("used_prekeys", &self.used_prekeys)
            .field("ciphertext", &format!("<redacted {} bytes>", self.ciphertext.len()))
            .field(
                "kem_ciphertext",
                &self.kem_ciphertext.as_ref().map(|ct| format!("<redacted {} bytes>", ct.len())),
            )
            .finish_non_exhaustive()
    }
}

/// Ratchet message header. Sent in the clear, authenticated as associated
/// data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Sender's current ratchet public key.
    pub ratchet_pub: [u8; PUBLIC_KEY_SIZE],
    /// Number of messages the sender sent on its previous sending chain.
    pub prev_chain_length: u32,
    /// Position of this message in the sender's current chain.
    pub message_num: u32,
}

impl MessageHeader {
    /// Fixed-size encoding used as AEAD associated data.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..PUBLIC_KEY_SIZE].copy_from_slice(&self.ratchet_pub);
        out[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + 4]
            .copy_from_slice(&self.prev_chain_length.to_be_bytes());
        out[PUBLIC_KEY_SIZE + 4..].copy_from_slice(&self.message_num.to_be_bytes());
        out
    }

    /// Parses the fixed-size encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        let bytes: &[u8; HEADER_SIZE] = bytes.try_into().map_err(|_| ProtoError::InvalidLength {
            field: "header",
            expected: HEADER_SIZE,
            actual: bytes.len(),
        })?;

        let mut ratchet_pub = [0u8; PUBLIC_KEY_SIZE];
        ratchet_pub.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        let mut prev = [0u8; 4];
        prev.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + 4]);
        let mut num = [0u8; 4];
        num.copy_from_slice(&bytes[PUBLIC_KEY_SIZE + 4..]);

        Ok(Self {
            ratchet_pub,
            prev_chain_length: u32::from_be_bytes(prev),
            message_num: u32::from_be_bytes(num),
        })
    }
}

impl std::fmt::Debug for MessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHeader")
            .field("ratchet_pub", &fingerprint(&self.ratchet_pub))
            .field("prev_chain_length", &self.prev_chain_length)
            .field("message_num", &self.message_num)
            .finish()
    }
}

/// A ratchet-encrypted message.
///
/// `ciphertext` is `nonce (24) || AEAD ciphertext || tag (16)`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Cleartext header.
    pub header: MessageHeader,
    /// Nonce-prefixed AEAD output.
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for EncryptedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedMessage")
            .field("header", &self.header)
            .field("ciphertext", &format!("<{} bytes>", self.ciphertext.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;
    use crate::{decode, encode};

    #[test]
    fn header_layout_is_big_endian() {
        let header =
            MessageHeader { ratchet_pub: [0xAB; 32], prev_chain_length: 0x0102_0304, message_num: 7 };
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..32], &[0xAB; 32]);
        assert_eq!(&bytes[32..], &hex!("01020304 00000007"));
    }

    #[test]
    fn header_rejects_short_input() {
        let result = MessageHeader::from_bytes(&[0u8; 39]);
        assert_eq!(
            result,
            Err(ProtoError::InvalidLength { field: "header", expected: 40, actual: 39 })
        );
    }

    #[test]
    fn initial_message_omits_absent_optionals() {
        let with = InitialMessage {
            identity_key: [1; 32],
            ephemeral_key: [2; 32],
            used_prekeys: UsedPrekeys { signed_prekey: true, one_time_prekey_index: Some(3) },
            ciphertext: vec![9; 20],
            nonce: [4; 24],
            kem_ciphertext: None,
        };
        let without = InitialMessage {
            used_prekeys: UsedPrekeys { signed_prekey: true, one_time_prekey_index: None },
            ..with.clone()
        };

        let with_bytes = encode(&with).expect("encode");
        let without_bytes = encode(&without).expect("encode");
        assert!(without_bytes.len() < with_bytes.len());

        let decoded: InitialMessage = decode(&without_bytes).expect("decode");
        assert_eq!(decoded.used_prekeys.one_time_prekey_index, None);
    }

    #[test]
    fn initial_message_debug_redacts_payload() {
        let msg = InitialMessage {
            identity_key: [1; 32],
            ephemeral_key: [2; 32],
            used_prekeys: UsedPrekeys { signed_prekey: true, one_time_prekey_index: None },
            ciphertext: vec![0x42; 10],
            nonce: [0; 24],
            kem_ciphertext: None,
        };
        let rendered = format!("{msg:?}");
        assert!(rendered.contains("<redacted 10 bytes>"));
        assert!(!rendered.contains("66, 66"));
    }

    proptest! {
        #[test]
        fn header_fixed_encoding_is_injective(
            pub_a in any::<[u8; 32]>(), pn_a in any::<u32>(), n_a in any::<u32>(),
            pub_b in any::<[u8; 32]>(), pn_b in any::<u32>(), n_b in any::<u32>(),
        ) {
            let a = MessageHeader { ratchet_pub: pub_a, prev_chain_length: pn_a, message_num: n_a };
            let b = MessageHeader { ratchet_pub: pub_b, prev_chain_length: pn_b, message_num: n_b };
            prop_assert_eq!(a == b, a.to_bytes() == b.to_bytes());
            prop_assert_eq!(MessageHeader::from_bytes(&a.to_bytes()), Ok(a));
        }
    }
}
