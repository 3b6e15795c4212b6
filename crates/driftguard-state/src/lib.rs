//! DriftGuard state store.
//!
//! Durable persistence for agents, commands, the command audit log,
//! telemetry samples, and migration claims.

mod error;
mod store;
mod tables;
mod types;

pub use error::*;
pub use store::*;
pub use types::*;
