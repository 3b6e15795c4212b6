//! Retention sweeper — periodic deletion of expired snapshot artifacts.
//!
//! Selection is pure (`select_victims`) so the criteria can be tested
//! without a live store; the sweeper wires it to the provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use drift_core::RetentionConfig;
use driftguard_snapshot::{SnapshotDescriptor, SnapshotResult, SnapshotStore};

/// Bounds applied to the configured scan limit.
const SCAN_LIMIT_MIN: usize = 50;
const SCAN_LIMIT_MAX: usize = 10_000;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Descriptors examined this pass.
    pub examined: usize,
    /// Unique artifacts selected for deletion.
    pub selected: usize,
    /// Artifacts actually removed.
    pub deleted: usize,
    /// Deletes that errored (logged, not fatal).
    pub failed: usize,
}

/// Periodic snapshot retention worker.
pub struct RetentionSweeper {
    store: Arc<dyn SnapshotStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn SnapshotStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// One sweep pass: list, select, delete.
    pub async fn sweep(&self) -> SnapshotResult<SweepReport> {
        if !self.config.enabled {
            return Ok(SweepReport::default());
        }

        let scan_limit = self.config.scan_limit.clamp(SCAN_LIMIT_MIN, SCAN_LIMIT_MAX);
        let descriptors = self.store.list(scan_limit).await?;
        let examined = descriptors.len();

        let victims = select_victims(&descriptors, &self.config, Utc::now());
        let mut report = SweepReport {
            examined,
            selected: victims.len(),
            ..SweepReport::default()
        };

        for victim in &victims {
            match self.store.delete(victim).await {
                Ok(true) => {
                    report.deleted += 1;
                    debug!(
                        workload_id = %victim.workload_id,
                        file_name = %victim.file_name,
                        "retention removed snapshot"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        workload_id = %victim.workload_id,
                        file_name = %victim.file_name,
                        error = %e,
                        "retention delete failed"
                    );
                }
            }
        }

        if report.selected > 0 {
            info!(
                examined = report.examined,
                selected = report.selected,
                deleted = report.deleted,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Run the sweeper loop until shutdown.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        if !self.config.enabled {
            info!("retention disabled");
            return;
        }
        info!(interval_secs = interval.as_secs(), "retention sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "retention sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("retention sweeper shutting down");
                    break;
                }
            }
        }
    }
}

/// Union of the three retention criteria, deduplicated by artifact
/// identity. A criterion with a zero bound is disabled.
fn select_victims(
    descriptors: &[SnapshotDescriptor],
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> Vec<SnapshotDescriptor> {
    let mut seen = HashSet::new();
    let mut victims = Vec::new();
    let mut push = |descriptor: &SnapshotDescriptor| {
        if seen.insert(descriptor.identity()) {
            victims.push(descriptor.clone());
        }
    };

    // Age.
    if config.max_age_days > 0 {
        let cutoff = now - chrono::Duration::days(config.max_age_days);
        for descriptor in descriptors {
            if descriptor.last_modified_utc < cutoff {
                push(descriptor);
            }
        }
    }

    // Per-workload cap, newest kept.
    if config.max_snapshots_per_workload > 0 {
        let mut by_workload: HashMap<&str, Vec<&SnapshotDescriptor>> = HashMap::new();
        for descriptor in descriptors {
            by_workload
                .entry(descriptor.workload_id.as_str())
                .or_default()
                .push(descriptor);
        }
        for group in by_workload.values_mut() {
            group.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
            for descriptor in group.iter().skip(config.max_snapshots_per_workload) {
                push(descriptor);
            }
        }
    }

    // Global cap, newest kept.
    if config.max_total_snapshots > 0 {
        let mut all: Vec<&SnapshotDescriptor> = descriptors.iter().collect();
        all.sort_by(|a, b| b.last_modified_utc.cmp(&a.last_modified_utc));
        for descriptor in all.iter().skip(config.max_total_snapshots) {
            push(descriptor);
        }
    }

    victims
}
