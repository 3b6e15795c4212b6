//! Local filesystem snapshot provider.
//!
//! Layout: `{root}/{workload_id}/{yyyyMMddHHmmssfff}.tar.gz`. The root is
//! created lazily on first write; listing a missing root yields nothing.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{SnapshotError, SnapshotResult};
use crate::{
    clamp_max_entries, generate_file_name, sanitize_workload_id, SnapshotDescriptor,
    SnapshotPayload, SnapshotStore, SNAPSHOT_SUFFIX,
};

/// Snapshot provider backed by a directory tree.
pub struct LocalSnapshotStore {
    root: PathBuf,
}

impl LocalSnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Enumerate archives for a single workload directory.
    async fn list_workload(&self, workload_id: &str) -> SnapshotResult<Vec<SnapshotDescriptor>> {
        let dir = self.root.join(workload_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(SNAPSHOT_SUFFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                // Raced with a concurrent delete; skip.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified: DateTime<Utc> = metadata.modified()?.into();
            results.push(SnapshotDescriptor {
                workload_id: workload_id.to_string(),
                file_name,
                size_bytes: metadata.len(),
                last_modified_utc: modified,
                local_path: Some(entry.path()),
                object_key: None,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn store(&self, workload_id: &str, data: Bytes) -> SnapshotResult<String> {
        let workload_id = sanitize_workload_id(workload_id)?;
        let dir = self.root.join(&workload_id);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = generate_file_name(Utc::now());
        let path = dir.join(&file_name);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        debug!(%workload_id, %file_name, bytes = data.len(), "snapshot stored");
        Ok(file_name)
    }

    async fn latest_descriptor(
        &self,
        workload_id: &str,
    ) -> SnapshotResult<Option<SnapshotDescriptor>> {
        let workload_id = sanitize_workload_id(workload_id)?;
        let mut archives = self.list_workload(&workload_id).await?;
        archives.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
        Ok(archives.into_iter().next())
    }

    async fn open(
        &self,
        descriptor: &SnapshotDescriptor,
    ) -> SnapshotResult<Option<SnapshotPayload>> {
        let path = match &descriptor.local_path {
            Some(path) => path,
            None => {
                return Err(SnapshotError::Storage(
                    "descriptor has no local path".to_string(),
                ))
            }
        };
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(SnapshotPayload {
                file_name: descriptor.file_name.clone(),
                data: Bytes::from(data),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, max_entries: usize) -> SnapshotResult<Vec<SnapshotDescriptor>> {
        let limit = match clamp_max_entries(max_entries) {
            Some(limit) => limit,
            None => return Ok(Vec::new()),
        };

        let mut workloads = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = workloads.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let workload_id = entry.file_name().to_string_lossy().into_owned();
            results.extend(self.list_workload(&workload_id).await?);
        }

        results.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
        results.truncate(limit);
        Ok(results)
    }

    async fn delete(&self, descriptor: &SnapshotDescriptor) -> SnapshotResult<bool> {
        let path = match &descriptor.local_path {
            Some(path) => path,
            None => return Ok(false),
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(
                    workload_id = %descriptor.workload_id,
                    file_name = %descriptor.file_name,
                    "snapshot deleted"
                );
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
