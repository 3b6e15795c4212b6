//! Command queue — tamper-evident, single-use commands for agents.
//!
//! Every queued command carries a fresh nonce and an HMAC-SHA256
//! signature over `command_id || action || nonce` so agents can verify
//! authenticity and reject replays.

mod queue;
mod signer;

pub use queue::*;
pub use signer::*;
