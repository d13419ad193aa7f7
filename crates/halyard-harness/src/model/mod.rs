//! Reference model for model-based testing.
//!
//! The model captures what a pair of sessions must do from the outside,
//! without any cryptography: every message that was sent and not yet
//! delivered decrypts to its plaintext exactly once, everything else is
//! rejected without side effects. It serves as the oracle against which the
//! real sessions are verified.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Observable behavior only: Captures WHAT, not HOW
//! - Deterministic: Same inputs produce same outputs

pub mod operation;
mod world;

pub use operation::{Operation, OperationResult, SmallMessage};
pub use world::{ModelMessage, ModelWorld};
