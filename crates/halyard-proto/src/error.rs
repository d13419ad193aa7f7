//! Wire codec errors.

use thiserror::Error;

/// Errors from encoding or decoding wire structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// CBOR serialization failed.
    #[error("encode failed: {reason}")]
    Encode {
        /// Underlying serializer message.
        reason: String,
    },

    /// CBOR deserialization failed.
    #[error("decode failed: {reason}")]
    Decode {
        /// Underlying deserializer message.
        reason: String,
    },

    /// A fixed-size field had the wrong length.
    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        /// Name of the offending field.
        field: &'static str,
        /// Required length in bytes.
        expected: usize,
        /// Observed length in bytes.
        actual: usize,
    },
}
