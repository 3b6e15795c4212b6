//! driftguard-retention — bounded snapshot history.
//!
//! Periodically lists the snapshot store and deletes artifacts matching
//! the union of three criteria:
//!
//! ```text
//! age        : older than max_age_days
//! workload   : beyond the newest max_snapshots_per_workload per workload
//! total      : beyond the newest max_total_snapshots overall
//! ```
//!
//! Each artifact is deleted at most once even when several criteria
//! match it, and a failed delete never aborts the sweep.

pub mod sweeper;

pub use sweeper::{RetentionSweeper, SweepReport};
