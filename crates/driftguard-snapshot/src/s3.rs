//! S3-compatible snapshot provider.
//!
//! Objects are keyed `{prefix}/{workload_id}/{file_name}`. Works against
//! AWS proper or any path-style endpoint (MinIO, LocalStack) via the
//! configured endpoint URL. The bucket is created on first write if the
//! credentials allow it.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::debug;

use drift_core::S3Config;

use crate::error::{SnapshotError, SnapshotResult};
use crate::{
    clamp_max_entries, generate_file_name, sanitize_workload_id, SnapshotDescriptor,
    SnapshotPayload, SnapshotStore, SNAPSHOT_SUFFIX,
};

/// Snapshot provider backed by an S3 bucket.
pub struct S3SnapshotStore {
    client: Client,
    bucket: String,
    prefix: String,
    bucket_ready: OnceCell<()>,
}

impl S3SnapshotStore {
    pub fn new(config: &S3Config) -> SnapshotResult<Self> {
        let bucket = config.bucket.trim().to_string();
        if bucket.is_empty() {
            return Err(SnapshotError::Storage(
                "s3 provider selected but no bucket configured".to_string(),
            ));
        }

        let credentials = resolve_credentials(config)?;
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.use_path_style);
        if !config.endpoint.trim().is_empty() {
            builder = builder.endpoint_url(config.endpoint.trim());
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            prefix: normalize_prefix(&config.prefix),
            bucket_ready: OnceCell::new(),
        })
    }

    fn object_key(&self, workload_id: &str, file_name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{workload_id}/{file_name}")
        } else {
            format!("{}/{workload_id}/{file_name}", self.prefix)
        }
    }

    fn workload_prefix(&self, workload_id: &str) -> String {
        if self.prefix.is_empty() {
            format!("{workload_id}/")
        } else {
            format!("{}/{workload_id}/", self.prefix)
        }
    }

    /// Pull the workload id back out of an object key.
    fn workload_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)?.strip_prefix('/')?
        };
        let (workload_id, file_name) = rest.split_once('/')?;
        if workload_id.is_empty() || file_name.contains('/') {
            return None;
        }
        Some(workload_id)
    }

    async fn ensure_bucket(&self) -> SnapshotResult<()> {
        self.bucket_ready
            .get_or_try_init(|| async {
                match self
                    .client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(SdkError::ServiceError(ctx))
                        if ctx.err().is_bucket_already_owned_by_you()
                            || ctx.err().is_bucket_already_exists() =>
                    {
                        Ok(())
                    }
                    Err(e) => Err(storage_err("create bucket", e)),
                }
            })
            .await?;
        Ok(())
    }

    /// All descriptors under a key prefix, unsorted.
    async fn list_prefix(&self, key_prefix: &str) -> SnapshotResult<Vec<SnapshotDescriptor>> {
        let mut results = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(key_prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }
            let page = match request.send().await {
                Ok(page) => page,
                // A bucket that was never written to holds no snapshots.
                Err(SdkError::ServiceError(ctx)) if ctx.err().is_no_such_bucket() => {
                    return Ok(Vec::new())
                }
                Err(e) => return Err(storage_err("list objects", e)),
            };

            for object in page.contents() {
                let key = match object.key() {
                    Some(key) if key.ends_with(SNAPSHOT_SUFFIX) => key,
                    _ => continue,
                };
                let workload_id = match self.workload_from_key(key) {
                    Some(workload_id) => workload_id.to_string(),
                    None => continue,
                };
                let file_name = match key.rsplit_once('/') {
                    Some((_, file_name)) => file_name.to_string(),
                    None => continue,
                };
                results.push(SnapshotDescriptor {
                    workload_id,
                    file_name,
                    size_bytes: object.size().unwrap_or_default().max(0) as u64,
                    last_modified_utc: object
                        .last_modified()
                        .map(smithy_to_chrono)
                        .unwrap_or_default(),
                    local_path: None,
                    object_key: Some(key.to_string()),
                });
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl SnapshotStore for S3SnapshotStore {
    async fn store(&self, workload_id: &str, data: Bytes) -> SnapshotResult<String> {
        let workload_id = sanitize_workload_id(workload_id)?;
        self.ensure_bucket().await?;

        let file_name = generate_file_name(Utc::now());
        let key = self.object_key(&workload_id, &file_name);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/gzip")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_err("put object", e))?;

        debug!(%workload_id, %key, "snapshot stored");
        Ok(file_name)
    }

    async fn latest_descriptor(
        &self,
        workload_id: &str,
    ) -> SnapshotResult<Option<SnapshotDescriptor>> {
        let workload_id = sanitize_workload_id(workload_id)?;
        let mut archives = self.list_prefix(&self.workload_prefix(&workload_id)).await?;
        archives.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
        Ok(archives.into_iter().next())
    }

    async fn open(
        &self,
        descriptor: &SnapshotDescriptor,
    ) -> SnapshotResult<Option<SnapshotPayload>> {
        let key = match &descriptor.object_key {
            Some(key) => key,
            None => {
                return Err(SnapshotError::Storage(
                    "descriptor has no object key".to_string(),
                ))
            }
        };
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_no_such_key() => return Ok(None),
            Err(e) => return Err(storage_err("get object", e)),
        };
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| storage_err("read object body", e))?
            .into_bytes();
        Ok(Some(SnapshotPayload {
            file_name: descriptor.file_name.clone(),
            data,
        }))
    }

    async fn list(&self, max_entries: usize) -> SnapshotResult<Vec<SnapshotDescriptor>> {
        let limit = match clamp_max_entries(max_entries) {
            Some(limit) => limit,
            None => return Ok(Vec::new()),
        };
        let base = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let mut results = self.list_prefix(&base).await?;
        results.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
        results.truncate(limit);
        Ok(results)
    }

    async fn delete(&self, descriptor: &SnapshotDescriptor) -> SnapshotResult<bool> {
        let key = match &descriptor.object_key {
            Some(key) => key,
            None => return Ok(false),
        };
        // DeleteObject succeeds on absent keys, so probe first to keep the
        // return value meaningful.
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => return Ok(false),
            Err(e) => return Err(storage_err("head object", e)),
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_err("delete object", e))?;
        debug!(
            workload_id = %descriptor.workload_id,
            %key,
            "snapshot deleted"
        );
        Ok(true)
    }
}

fn resolve_credentials(config: &S3Config) -> SnapshotResult<Credentials> {
    let access_key = non_empty(&config.access_key)
        .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty()));
    let secret_key = non_empty(&config.secret_key)
        .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok().filter(|v| !v.is_empty()));
    match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => Ok(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "driftguard-config",
        )),
        _ => Err(SnapshotError::Storage(
            "s3 credentials missing: set storage.s3.access_key/secret_key or \
             AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY"
                .to_string(),
        )),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_matches('/').to_string()
}

fn smithy_to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

fn storage_err<E>(context: &str, err: E) -> SnapshotError
where
    E: std::error::Error + Send + Sync + 'static,
{
    SnapshotError::Storage(format!("{context}: {}", DisplayErrorContext(&err)))
}
