//! Snapshot store — durable checkpoint archives keyed by workload.
//!
//! Two providers implement the same [`SnapshotStore`] trait: a local
//! directory tree and an S3-compatible bucket. The provider is chosen
//! once from configuration; callers never branch on it.

mod error;
mod local;
mod s3;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drift_core::StorageConfig;

pub use error::*;
pub use local::LocalSnapshotStore;
pub use s3::S3SnapshotStore;

/// All snapshot archives carry this suffix.
pub const SNAPSHOT_SUFFIX: &str = ".tar.gz";

/// Metadata for one stored checkpoint archive. Derived by listing the
/// store; exactly one of `local_path` / `object_key` is populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotDescriptor {
    pub workload_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub last_modified_utc: DateTime<Utc>,
    pub local_path: Option<PathBuf>,
    pub object_key: Option<String>,
}

impl SnapshotDescriptor {
    /// Case-insensitive identity key, used to delete each artifact at
    /// most once even when several retention criteria match it.
    pub fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.workload_id.to_lowercase(),
            self.file_name.to_lowercase(),
            self.local_path
                .as_deref()
                .map(|p| p.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            self.object_key
                .as_deref()
                .map(str::to_lowercase)
                .unwrap_or_default(),
        )
    }
}

/// A fetched snapshot archive.
#[derive(Debug, Clone)]
pub struct SnapshotPayload {
    pub file_name: String,
    pub data: Bytes,
}

/// Durable storage of checkpoint archives keyed by (workload, file name).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Write a full archive for the workload. Creates the workload's
    /// namespace on first use. Returns the generated file name.
    async fn store(&self, workload_id: &str, data: Bytes) -> SnapshotResult<String>;

    /// Descriptor of the most recently modified archive, if any.
    async fn latest_descriptor(
        &self,
        workload_id: &str,
    ) -> SnapshotResult<Option<SnapshotDescriptor>>;

    /// Direct fetch by descriptor. `None` when the underlying artifact
    /// has since been removed (soft fail, not an error).
    async fn open(&self, descriptor: &SnapshotDescriptor)
        -> SnapshotResult<Option<SnapshotPayload>>;

    /// All artifacts across all workloads, newest first, bounded by
    /// `max_entries` (clamped; zero yields nothing).
    async fn list(&self, max_entries: usize) -> SnapshotResult<Vec<SnapshotDescriptor>>;

    /// Remove one artifact. Returns false if it was already absent.
    async fn delete(&self, descriptor: &SnapshotDescriptor) -> SnapshotResult<bool>;

    /// Most recent archive for the workload, or `None`.
    async fn open_latest(&self, workload_id: &str) -> SnapshotResult<Option<SnapshotPayload>> {
        match self.latest_descriptor(workload_id).await? {
            Some(descriptor) => self.open(&descriptor).await,
            None => Ok(None),
        }
    }

    /// Existence probe without fetching bytes.
    async fn has_snapshot(&self, workload_id: &str) -> SnapshotResult<bool> {
        Ok(self.latest_descriptor(workload_id).await?.is_some())
    }
}

/// Build the configured provider.
///
/// Relative local paths resolve under `data_root`.
pub fn open_snapshot_store(
    storage: &StorageConfig,
    data_root: &Path,
) -> SnapshotResult<Arc<dyn SnapshotStore>> {
    if storage.uses_s3() {
        Ok(Arc::new(S3SnapshotStore::new(&storage.s3)?))
    } else {
        let raw = Path::new(&storage.local_path);
        let root = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            data_root.join(raw)
        };
        Ok(Arc::new(LocalSnapshotStore::new(root)))
    }
}

/// Reduce a workload identifier to a single safe path segment.
///
/// Fails closed: any input whose final path segment differs from the
/// trimmed input (traversal attempts, separators, `.`/`..`) is rejected
/// rather than silently rewritten.
pub fn sanitize_workload_id(raw: &str) -> SnapshotResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SnapshotError::InvalidWorkloadId(raw.to_string()));
    }
    let sanitized = Path::new(trimmed)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if sanitized.is_empty() || sanitized != trimmed {
        return Err(SnapshotError::InvalidWorkloadId(raw.to_string()));
    }
    Ok(sanitized.to_string())
}

/// Timestamp-based archive name: `{yyyyMMddHHmmssfff}.tar.gz`.
pub(crate) fn generate_file_name(now: DateTime<Utc>) -> String {
    format!("{}{}", now.format("%Y%m%d%H%M%S%3f"), SNAPSHOT_SUFFIX)
}

/// Shared clamp for listing bounds.
pub(crate) fn clamp_max_entries(max_entries: usize) -> Option<usize> {
    if max_entries == 0 {
        None
    } else {
        Some(max_entries.clamp(1, 10_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_plain_segments() {
        assert_eq!(sanitize_workload_id("wl-1").unwrap(), "wl-1");
        assert_eq!(sanitize_workload_id("  wl-1  ").unwrap(), "wl-1");
    }

    #[test]
    fn sanitize_fails_closed_on_traversal() {
        assert!(sanitize_workload_id("../etc/passwd").is_err());
        assert!(sanitize_workload_id("a/b").is_err());
        assert!(sanitize_workload_id("..").is_err());
        assert!(sanitize_workload_id(".").is_err());
        assert!(sanitize_workload_id("").is_err());
        assert!(sanitize_workload_id("/absolute").is_err());
    }

    #[test]
    fn file_name_shape() {
        let now = "2026-08-25T10:20:30.123Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(generate_file_name(now), "20260825102030123.tar.gz");
    }

    #[test]
    fn identity_covers_location() {
        let mut a = SnapshotDescriptor {
            workload_id: "wl-1".to_string(),
            file_name: "x.tar.gz".to_string(),
            size_bytes: 1,
            last_modified_utc: Utc::now(),
            local_path: Some(PathBuf::from("/data/wl-1/x.tar.gz")),
            object_key: None,
        };
        let b = a.clone();
        assert_eq!(a.identity(), b.identity());

        a.local_path = None;
        a.object_key = Some("snapshots/wl-1/x.tar.gz".to_string());
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_max_entries(0), None);
        assert_eq!(clamp_max_entries(5), Some(5));
        assert_eq!(clamp_max_entries(1_000_000), Some(10_000));
    }
}
