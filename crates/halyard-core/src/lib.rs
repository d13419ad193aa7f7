//! Halyard session core
//!
//! End-to-end session establishment and message protection between two
//! peers: X3DH-style key agreement feeding a Double Ratchet, with a bounded
//! store for keys of skipped messages.
//!
//! # Design
//!
//! Sans-IO. Nothing here touches the network or the clock; the only external
//! resource is randomness, supplied through the [`Environment`] capability
//! handle passed into [`KeyAgreement`] and [`RatchetSession`].
//!
//! ```text
//! PrekeyStore ──publish──► PublicKeyBundle ──► KeyAgreement::initiate
//!                                                    │
//!       KeyAgreement::respond ◄── InitialMessage ────┘
//!              │                                     │
//!              ▼                                     ▼
//!   RatchetSession (responder)  ◄─EncryptedMessage─► RatchetSession (initiator)
//!              └── SkippedKeyStore                   └── SkippedKeyStore
//! ```
//!
//! # Security
//!
//! - Forward secrecy: chain keys advance one-way per message; DH ratchets
//!   replace the root key whenever the peer's ratchet key changes.
//! - Break-in recovery: each new DH ratchet mixes fresh key material that an
//!   attacker holding the old state does not know.
//! - Every secret is held in a zeroize-on-drop type.
//!
//! # Invariants
//!
//! - `decrypt` either fully commits or leaves the session unchanged.
//! - Counters never wrap; overflow is a fatal error.
//! - The skipped-key store never exceeds its capacity and never evicts.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod agreement;
pub mod config;
pub mod env;
pub mod error;
pub mod prekeys;
pub mod session;
pub mod skipped;

pub use agreement::{Initiated, KeyAgreement, PROTOCOL_INFO, Responded};
pub use config::{DEFAULT_RETIRED_RATCHET_KEYS, DEFAULT_SKIPPED_KEY_CAPACITY, SessionConfig};
pub use env::{Environment, generate_key_pair};
pub use error::{AgreementError, DecryptError, EncryptError, StoreError};
pub use prekeys::PrekeyStore;
pub use session::{RatchetSession, SessionState};
pub use skipped::{SkippedKeyStore, key_id};
