//! Operations for model-based testing.
//!
//! Operations represent everything the transport and the peers can do to a
//! conversation. They are generated randomly by proptest and applied to both
//! the model and the real sessions.

use arbitrary::Arbitrary;

use crate::conversation::Side;

/// Operations that can be applied to a conversation.
///
/// Delivery operations pick from every message ever sent toward a side, so
/// reordering and replays are both covered by `Deliver`.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// A side encrypts and sends a message.
    Send {
        /// Sender.
        from: Side,
        /// Message content (kept small for efficiency).
        content: SmallMessage,
    },

    /// The transport delivers some message sent toward `to`, possibly one
    /// that was already delivered.
    Deliver {
        /// Receiver.
        to: Side,
        /// Index into the sent history (taken modulo its length).
        pick: u8,
    },

    /// The transport delivers the oldest undelivered message toward `to`.
    DeliverOldest {
        /// Receiver.
        to: Side,
    },

    /// The transport delivers a copy of some message with one ciphertext byte
    /// flipped.
    Tamper {
        /// Receiver.
        to: Side,
        /// Index into the sent history (taken modulo its length).
        pick: u8,
        /// Byte position in the ciphertext (taken modulo its length).
        position: u16,
    },
}

/// Small message content for testing.
///
/// We use a compact representation to keep test cases small while still
/// exercising message handling. The content is deterministic from the seed.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// Message seed (expanded to content in real tests).
    pub seed: u8,
    /// Message length hint (0-3 maps to empty/small/medium/large).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to actual message bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len: u8 = match self.size_class % 4 {
            0 => 0,
            1 => 8,
            2 => 64,
            _ => 255,
        };

        // Deterministic content from seed
        (0..len).map(|i| self.seed.wrapping_add(i)).collect()
    }
}

/// Observable result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Message was encrypted and put on the wire.
    Sent,

    /// Message decrypted to this plaintext.
    Delivered(Vec<u8>),

    /// Message was already consumed.
    Duplicate,

    /// Message failed authentication.
    Rejected,

    /// Nothing has been sent toward the receiver yet.
    NothingToDeliver,

    /// Any other error (never expected in a well-behaved run).
    Failed(String),
}

impl OperationResult {
    /// Whether the operation changed what the receiver has seen.
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}
