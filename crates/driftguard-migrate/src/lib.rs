//! driftguard-migrate — risk-triggered live migration.
//!
//! On a fixed tick, each active agent is considered as a migration
//! source. A cycle claims the agent (atomic conditional write, so two
//! orchestrator instances cannot both start on it), evaluates risk,
//! picks an idle target, and sequences:
//!
//! ```text
//! CHECKPOINT(source) → locate newest snapshot → RESTORE(target)
//! ```
//!
//! Each command is block-polled to a terminal state under a deadline.
//! A completed cycle commits a "Migration Completed" audit entry which
//! also arms the cooldown for the source agent. Every abort is logged
//! and the cycle is simply retried on a later tick.

pub mod orchestrator;
pub mod risk;
pub mod signal;

pub use orchestrator::{CycleOutcome, MigrationOrchestrator};
pub use risk::{
    NullAnalyzer, RiskAnalyzer, RiskAssessment, RiskRequest, STATUS_CRITICAL, STATUS_UNAVAILABLE,
};
pub use signal::read_rebalance_signal;
