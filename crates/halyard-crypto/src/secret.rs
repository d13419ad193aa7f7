//! Owned secret storage.
//!
//! [`SecretBuffer`] holds variable-length secret bytes (concatenated DH
//! outputs, decrypted key material); [`SecretKey`] holds exactly one 32-byte
//! key. Both are wiped when dropped, so every exit path (including early
//! returns through `?`) releases them zeroed.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in the protocol.
pub const KEY_SIZE: usize = 32;

/// Heap buffer of secret bytes, zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBuffer(Vec<u8>);

impl SecretBuffer {
    /// Creates an empty buffer with room for `capacity` bytes.
    ///
    /// Reserving up front avoids reallocation, which would leave an unwiped
    /// copy of earlier contents behind in freed memory.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Copies `bytes` into a new buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buffer = Self::with_capacity(bytes.len());
        buffer.extend_from_slice(bytes);
        buffer
    }

    /// Appends bytes.
    ///
    /// Growing past the reserved capacity reallocates; size the buffer with
    /// [`Self::with_capacity`] when the final length is known.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let needed = self.0.len() + bytes.len();
        if needed > self.0.capacity() {
            let mut grown = Vec::with_capacity(needed.max(self.0.capacity() * 2));
            grown.extend_from_slice(&self.0);
            self.0.zeroize();
            self.0 = grown;
        }
        self.0.extend_from_slice(bytes);
    }

    /// Borrows the contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBuffer(<redacted {} bytes>)", self.0.len())
    }
}

/// A 32-byte symmetric secret, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copies a key out of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, crate::CryptoError> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            crate::CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Borrows the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}
