//! Model world: sent history per direction, no cryptography.

use super::operation::{Operation, OperationResult};
use crate::conversation::Side;

/// A message as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMessage {
    /// Plaintext the receiver must eventually see.
    pub plaintext: Vec<u8>,
    /// Whether the receiver already decrypted it.
    pub delivered: bool,
}

/// Reference model of two peers exchanging messages.
#[derive(Debug, Default)]
pub struct ModelWorld {
    to_alice: Vec<ModelMessage>,
    to_bob: Vec<ModelMessage>,
}

impl ModelWorld {
    /// Empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one operation and returns the expected result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Send { from, content } => {
                self.history_mut(from.peer())
                    .push(ModelMessage { plaintext: content.to_bytes(), delivered: false });
                OperationResult::Sent
            },
            Operation::Deliver { to, pick } => {
                let history = self.history_mut(*to);
                let Some(index) = pick_index(history.len(), *pick) else {
                    return OperationResult::NothingToDeliver;
                };
                deliver(&mut history[index])
            },
            Operation::DeliverOldest { to } => {
                let history = self.history_mut(*to);
                match history.iter_mut().find(|m| !m.delivered) {
                    Some(message) => deliver(message),
                    None => OperationResult::NothingToDeliver,
                }
            },
            Operation::Tamper { to, pick, .. } => {
                let history = self.history(*to);
                let Some(index) = pick_index(history.len(), *pick) else {
                    return OperationResult::NothingToDeliver;
                };
                if history[index].delivered {
                    OperationResult::Duplicate
                } else {
                    OperationResult::Rejected
                }
            },
        }
    }

    /// Every message sent toward `to`, in send order.
    pub fn history(&self, to: Side) -> &[ModelMessage] {
        match to {
            Side::Alice => &self.to_alice,
            Side::Bob => &self.to_bob,
        }
    }

    /// Number of messages toward `to` not yet delivered.
    pub fn pending(&self, to: Side) -> usize {
        self.history(to).iter().filter(|m| !m.delivered).count()
    }

    fn history_mut(&mut self, to: Side) -> &mut Vec<ModelMessage> {
        match to {
            Side::Alice => &mut self.to_alice,
            Side::Bob => &mut self.to_bob,
        }
    }
}

/// Maps an arbitrary pick onto a history index.
fn pick_index(len: usize, pick: u8) -> Option<usize> {
    (len > 0).then(|| usize::from(pick) % len)
}

fn deliver(message: &mut ModelMessage) -> OperationResult {
    if message.delivered {
        OperationResult::Duplicate
    } else {
        message.delivered = true;
        OperationResult::Delivered(message.plaintext.clone())
    }
}
