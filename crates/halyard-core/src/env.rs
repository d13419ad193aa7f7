//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait is the capability handle that replaces any
//! process-wide crypto initialization. It is created once at startup and
//! passed by value into [`KeyAgreement`](crate::KeyAgreement) and
//! [`RatchetSession`](crate::RatchetSession). Randomness is the only resource
//! the session core needs:
//!
//! - Deterministic Simulation: a seeded RNG reproduces every key pair and
//!   nonce, so a failing conversation can be replayed exactly.
//!
//! - Production Runtime: the OS entropy pool, with no changes to protocol
//!   logic.
//!
//! # Invariants
//!
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use halyard_crypto::{KEY_SIZE, KeyPair};
use zeroize::Zeroize;

/// Abstract environment providing randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production
/// 2. Minimal panics: Methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use the OS entropy pool
    /// (`getrandom`). Simulation implementations MUST use a seeded RNG and
    /// log the seed for reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random fixed-size array.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}

/// Generates a fresh X25519 key pair.
pub fn generate_key_pair<E: Environment>(env: &E) -> KeyPair {
    let mut seed: [u8; KEY_SIZE] = env.random_array();
    let pair = KeyPair::from_secret_bytes(seed);
    seed.zeroize();
    pair
}


#[cfg(test)]
mod tests {
    use super::{testing::TestEnv, *};

    #[test]
    fn same_seed_same_key_pairs() {
        let a = generate_key_pair(&TestEnv::with_seed(7));
        let b = generate_key_pair(&TestEnv::with_seed(7));
        assert_eq!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn clones_share_one_stream() {
        let env = TestEnv::with_seed(7);
        let clone = env.clone();
        let first: [u8; 8] = env.random_array();
        let second: [u8; 8] = clone.random_array();
        assert_ne!(first, second);
    }
}
