//! ML-KEM-768 for hybrid agreement.
//!
//! Only used during the initial agreement: the KEM shared secret is appended
//! to the DH outputs before the agreement KDF runs. Ratchet steps stay
//! classical.

use ml_kem::{
    EncodedSizeUser, KemCore, MlKem768, MlKem768Params,
    kem::{Decapsulate, DecapsulationKey, Encapsulate, EncapsulationKey},
};
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};

use crate::{
    error::CryptoError,
    secret::{KEY_SIZE, SecretKey},
};

/// ML-KEM-768 key pair.
pub struct KemKeyPair {
    decapsulation: DecapsulationKey<MlKem768Params>,
    encapsulation: EncapsulationKey<MlKem768Params>,
}

impl KemKeyPair {
    /// Generates a key pair from 32 bytes of caller-provided entropy.
    pub fn from_seed(seed: [u8; KEY_SIZE]) -> Self {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let (decapsulation, encapsulation) = MlKem768::generate(&mut rng);
        Self { decapsulation, encapsulation }
    }

    /// Encoded encapsulation key, for publishing.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.encapsulation.as_bytes().to_vec()
    }

    /// Recovers the shared secret from a KEM ciphertext.
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<SecretKey, CryptoError> {
        let ciphertext = ciphertext
            .try_into()
            .map_err(|_| CryptoError::Kem { reason: "ciphertext length" })?;
        let shared = self
            .decapsulation
            .decapsulate(&ciphertext)
            .map_err(|_| CryptoError::Kem { reason: "decapsulate" })?;
        SecretKey::from_slice(shared.as_slice())
    }
}

impl std::fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemKeyPair").finish_non_exhaustive()
    }
}

/// Encapsulates to a published key. Returns `(ciphertext, shared secret)`.
pub fn encapsulate(
    public_key: &[u8],
    seed: [u8; KEY_SIZE],
) -> Result<(Vec<u8>, SecretKey), CryptoError> {
    let encoded = public_key
        .try_into()
        .map_err(|_| CryptoError::Kem { reason: "encapsulation key length" })?;
    let encapsulation = EncapsulationKey::<MlKem768Params>::from_bytes(&encoded);

    let mut rng = ChaCha20Rng::from_seed(seed);
    let (ciphertext, shared) = encapsulation
        .encapsulate(&mut rng)
        .map_err(|_| CryptoError::Kem { reason: "encapsulate" })?;

    Ok((ciphertext.as_slice().to_vec(), SecretKey::from_slice(shared.as_slice())?))
}
