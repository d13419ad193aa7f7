//! Deterministic simulation harness for Halyard session testing.
//!
//! Seeded implementations of the `Environment` trait and of an unreliable
//! transport, for reproducible testing of sessions under reordering,
//! duplication and loss.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and a real pair of
//! sessions, and their observable results are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod conversation;
pub mod model;
pub mod sim_channel;
pub mod sim_env;

pub use conversation::{Conversation, Side};
pub use model::{ModelWorld, Operation, OperationResult, SmallMessage};
pub use sim_channel::{ChannelConfig, ChannelStats, SimChannel};
pub use sim_env::SimEnv;
