//! CLI error types.

use halyard_core::{AgreementError, DecryptError, EncryptError};
use halyard_proto::ProtoError;
use thiserror::Error;

/// Errors that end a run.
///
/// Only fatal session errors appear here; dropped and duplicate messages are
/// counted in the report instead.
#[derive(Debug, Error)]
pub enum CliError {
    /// Handshake failed.
    #[error("key agreement failed: {0}")]
    Agreement(#[from] AgreementError),

    /// A session refused to encrypt.
    #[error("encrypt failed: {0}")]
    Encrypt(#[from] EncryptError),

    /// A session hit a fatal receive error and must be re-keyed.
    #[error("session must be re-keyed after {received} receives: {source}")]
    Decrypt {
        /// Messages processed by the receiver before the failure.
        received: u64,
        /// Underlying session error.
        source: DecryptError,
    },

    /// Wire encoding failed.
    #[error("wire encoding failed: {0}")]
    Encode(#[from] ProtoError),
}
