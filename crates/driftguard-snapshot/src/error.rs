//! Error types for the snapshot store.

use thiserror::Error;

/// Result type alias for snapshot store operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur against either snapshot provider.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The workload id could not be reduced to a single path segment.
    #[error("invalid workload id: {0:?}")]
    InvalidWorkloadId(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
