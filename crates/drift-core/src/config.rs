//! driftguard.toml configuration parser.
//!
//! Every section has serde defaults so a partial (or absent) file yields a
//! runnable single-node configuration. The daemon overlays CLI flags on top.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub control: ControlConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
}

/// Orchestrator timings and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Heartbeat staleness bound for the liveness predicate.
    pub heartbeat_timeout_secs: u64,
    /// Tick interval of the migration driver loop.
    pub migration_interval_secs: u64,
    /// Deadline for a queued command to reach a terminal state.
    pub command_timeout_secs: u64,
    /// Interval between command status polls inside a cycle.
    pub poll_interval_secs: u64,
    /// Cooldown after a completed migration for the same source agent.
    pub cooldown_secs: u64,
    /// Base URL handed to agents for snapshot downloads.
    pub artifact_base_url: String,
    /// Rebalance-signal override file, relative to the data root.
    pub signal_path: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            migration_interval_secs: 10,
            command_timeout_secs: 60,
            poll_interval_secs: 2,
            cooldown_secs: 120,
            artifact_base_url: "http://localhost:8080".to_string(),
            signal_path: "rebalance_signal.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// HMAC key for command signatures. Empty means the development
    /// fallback key is used, which the command queue warns about.
    pub command_signing_key: String,
}

/// Snapshot storage provider selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "local" or "s3". An s3 bucket set below also selects s3.
    pub provider: String,
    /// Directory root for the local provider, relative to the data root
    /// unless absolute.
    pub local_path: String,
    pub s3: S3Config,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            local_path: "snapshots".to_string(),
            s3: S3Config::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack). Empty means AWS.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
    pub use_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            prefix: "snapshots".to_string(),
            use_path_style: true,
        }
    }
}

impl StorageConfig {
    /// Whether the object-storage provider should be used.
    pub fn uses_s3(&self) -> bool {
        self.provider.eq_ignore_ascii_case("s3") || !self.s3.bucket.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub sweep_interval_minutes: u64,
    /// 0 disables the age criterion.
    pub max_age_days: i64,
    /// 0 disables the per-workload cap.
    pub max_snapshots_per_workload: usize,
    /// 0 disables the global cap.
    pub max_total_snapshots: usize,
    /// Upper bound on descriptors examined per sweep.
    pub scan_limit: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_minutes: 60,
            max_age_days: 14,
            max_snapshots_per_workload: 5,
            max_total_snapshots: 500,
            scan_limit: 2000,
        }
    }
}

impl DriftConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DriftConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}
