//! Session configuration.

/// Default bound on stored skipped-message keys.
pub const DEFAULT_SKIPPED_KEY_CAPACITY: usize = 1000;

/// Default number of superseded remote ratchet keys remembered for replay
/// detection.
pub const DEFAULT_RETIRED_RATCHET_KEYS: usize = 16;

/// Tunables for a [`RatchetSession`](crate::RatchetSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of skipped-message keys held at once. A message that
    /// would push the store past this bound is rejected with
    /// `TooManySkippedMessages`.
    pub skipped_key_capacity: usize,
    /// How many previous remote ratchet keys to remember. Messages on a
    /// retired chain whose key is gone are reported as duplicates instead of
    /// triggering a DH ratchet.
    pub retired_ratchet_keys: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            skipped_key_capacity: DEFAULT_SKIPPED_KEY_CAPACITY,
            retired_ratchet_keys: DEFAULT_RETIRED_RATCHET_KEYS,
        }
    }
}
