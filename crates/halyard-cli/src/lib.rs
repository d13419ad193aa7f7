//! Halyard command-line driver.
//!
//! Runs a two-party conversation end to end: X3DH against a freshly
//! published bundle, then ratchet messages over a simulated link that may
//! drop, duplicate and reorder. Messages cross the link in their CBOR wire
//! form.
//!
//! ## Architecture
//!
//! ```text
//! halyard-cli
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ RunConfig      (what to simulate)
//!   └─ run_conversation
//!        ├─ Conversation   (halyard-harness, X3DH + two sessions)
//!        └─ SimChannel     (halyard-harness, one per direction)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod run;
mod system_env;

pub use error::CliError;
pub use run::{RunConfig, RunReport, run_conversation};
pub use system_env::SystemEnv;
