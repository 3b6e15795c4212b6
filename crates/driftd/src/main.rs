//! driftd — the DriftGuard daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Agent registry + workflow
//! - Signed command queue
//! - Snapshot store (local or S3) + retention sweeper
//! - Migration orchestrator
//!
//! # Usage
//!
//! ```text
//! driftd run --config driftguard.toml --data-dir /var/lib/driftguard
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use driftguard_migrate::{MigrationOrchestrator, NullAnalyzer};
use driftguard_retention::RetentionSweeper;

#[derive(Parser)]
#[command(name = "driftd", about = "DriftGuard daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run {
        /// Configuration file path.
        #[arg(long, default_value = "driftguard.toml")]
        config: PathBuf,

        /// Data directory for persistent state and local snapshots.
        #[arg(long, default_value = "/var/lib/driftguard")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,driftd=debug,driftguard=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, data_dir } => run(config, data_dir).await,
    }
}

async fn run(config_path: PathBuf, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("DriftGuard daemon starting");

    let config = drift_core::DriftConfig::load_or_default(&config_path)?;

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("driftguard.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = driftguard_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = driftguard_registry::AgentRegistry::new(state.clone())
        .with_heartbeat_timeout(Duration::from_secs(config.control.heartbeat_timeout_secs));
    info!(
        heartbeat_timeout_secs = config.control.heartbeat_timeout_secs,
        "agent registry initialized"
    );

    let queue =
        driftguard_command::CommandQueue::new(state.clone(), &config.security.command_signing_key);
    info!("command queue initialized");

    // Transport adapters (REST/RPC) attach to the workflow.
    let _workflow = driftguard_workflow::AgentWorkflow::new(registry.clone(), state.clone());
    info!("agent workflow initialized");

    let snapshots = driftguard_snapshot::open_snapshot_store(&config.storage, &data_dir)?;
    let provider = if config.storage.uses_s3() { "s3" } else { "local" };
    info!(provider, "snapshot store opened");

    let sweeper = RetentionSweeper::new(snapshots.clone(), config.retention.clone());
    let sweep_interval = Duration::from_secs(config.retention.sweep_interval_minutes * 60);
    info!(
        interval_minutes = config.retention.sweep_interval_minutes,
        enabled = config.retention.enabled,
        "retention sweeper initialized"
    );

    let orchestrator = MigrationOrchestrator::new(
        state.clone(),
        registry,
        queue,
        snapshots,
        Arc::new(NullAnalyzer),
        config.control.clone(),
        data_dir.clone(),
    );
    let migration_interval = Duration::from_secs(config.control.migration_interval_secs);
    info!(
        interval_secs = config.control.migration_interval_secs,
        "migration orchestrator initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_shutdown = shutdown_rx.clone();
    let migration_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let retention_handle = tokio::spawn(async move {
        sweeper.run(sweep_interval, retention_shutdown).await;
    });

    let migration_handle = tokio::spawn(async move {
        orchestrator.run(migration_interval, migration_shutdown).await;
    });

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = retention_handle.await;
    let _ = migration_handle.await;

    info!("DriftGuard daemon stopped");
    Ok(())
}
