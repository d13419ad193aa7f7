//! Production Environment implementation using the OS RNG.

use halyard_core::Environment;

/// Production environment backed by `getrandom`.
///
/// # Security
///
/// Every ratchet key pair, identity seed and nonce is drawn from here. If
/// the OS source fails there is no safe fallback, so the process aborts
/// rather than hand out predictable key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(e) = getrandom::fill(buffer) {
            tracing::error!("getrandom failed: {}", e);
            std::process::abort();
        }
    }
}
