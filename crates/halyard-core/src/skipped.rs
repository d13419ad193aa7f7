//! Bounded store for skipped-message keys.
//!
//! When a message arrives ahead of its predecessors, the receiving chain is
//! advanced past the gap and every intermediate message key is parked here
//! until its message shows up.
//!
//! # Invariants
//!
//! - `size() <= capacity()` at all times. A full store rejects inserts; it
//!   never evicts, because an evicted key strands a legitimately delayed
//!   message forever.
//! - Each key is handed out at most once: `take()` removes it.
//! - Removed and cleared keys are zeroized (`MessageKey` wipes on drop).

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use halyard_crypto::MessageKey;
use halyard_proto::PUBLIC_KEY_SIZE;
use zeroize::Zeroize;

use crate::error::StoreError;

/// Upper bound on entries reserved up front. Stores up to this capacity never
/// rehash; larger ones may, and a rehash moves entries without wiping the old
/// allocation.
const PREALLOCATE_LIMIT: usize = 4096;

/// Identifier for a skipped key: url-safe base64 of
/// `ratchet_pub || message_num (BE)`.
///
/// The public key has a fixed length, so two different keys can never
/// produce the same identifier through a shared numeric suffix.
pub fn key_id(ratchet_pub: &[u8; PUBLIC_KEY_SIZE], message_num: u32) -> String {
    let mut raw = [0u8; PUBLIC_KEY_SIZE + 4];
    raw[..PUBLIC_KEY_SIZE].copy_from_slice(ratchet_pub);
    raw[PUBLIC_KEY_SIZE..].copy_from_slice(&message_num.to_be_bytes());
    URL_SAFE_NO_PAD.encode(raw)
}

/// Bounded map from `(ratchet public key, message number)` to message key.
pub struct SkippedKeyStore {
    keys: HashMap<String, MessageKey>,
    capacity: usize,
}

impl SkippedKeyStore {
    /// Creates an empty store holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self { keys: HashMap::with_capacity(capacity.min(PREALLOCATE_LIMIT)), capacity }
    }

    /// Stores a key. Replacing an existing entry does not count against the
    /// bound.
    pub fn set(
        &mut self,
        ratchet_pub: &[u8; PUBLIC_KEY_SIZE],
        message_num: u32,
        key: MessageKey,
    ) -> Result<(), StoreError> {
        let id = key_id(ratchet_pub, message_num);
        if !self.keys.contains_key(&id) && self.keys.len() >= self.capacity {
            return Err(StoreError::StoreFull { capacity: self.capacity });
        }
        tracing::trace!(message_num, size = self.keys.len(), "storing skipped key");
        self.keys.insert(id, key);
        Ok(())
    }

    /// Removes and returns a key. The caller's copy is wiped when dropped.
    pub fn take(&mut self, ratchet_pub: &[u8; PUBLIC_KEY_SIZE], message_num: u32) -> Option<MessageKey> {
        let key = self.keys.remove(&key_id(ratchet_pub, message_num));
        if key.is_some() {
            tracing::trace!(message_num, size = self.keys.len(), "took skipped key");
        }
        key
    }

    /// Borrows a key without consuming it.
    pub fn peek(&self, ratchet_pub: &[u8; PUBLIC_KEY_SIZE], message_num: u32) -> Option<&MessageKey> {
        self.keys.get(&key_id(ratchet_pub, message_num))
    }

    /// Whether a key is stored.
    pub fn has(&self, ratchet_pub: &[u8; PUBLIC_KEY_SIZE], message_num: u32) -> bool {
        self.keys.contains_key(&key_id(ratchet_pub, message_num))
    }

    /// Number of stored keys.
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    /// Configured bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.keys.len())
    }

    /// Wipes and drops every entry.
    pub fn clear(&mut self) {
        for (_, mut key) in self.keys.drain() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for SkippedKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedKeyStore")
            .field("size", &self.keys.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
