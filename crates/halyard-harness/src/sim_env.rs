//! Seeded environment for simulations.

use std::sync::{Arc, Mutex, PoisonError};

use halyard_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic [`Environment`] backed by a seeded ChaCha20 stream.
///
/// Clones share one stream, so two sessions built from clones of the same
/// `SimEnv` draw interleaved but reproducible bytes.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    seed: u64,
}

impl SimEnv {
    /// Creates an environment from a seed. Log the seed to reproduce a run.
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "created simulation environment");
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))), seed }
    }

    /// The seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Environment for SimEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.fill_bytes(buffer);
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("seed", &self.seed).finish_non_exhaustive()
    }
}
