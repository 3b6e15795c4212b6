//! Migration orchestrator — the per-agent cycle and its driver loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use drift_core::ControlConfig;
use driftguard_command::CommandQueue;
use driftguard_registry::AgentRegistry;
use driftguard_snapshot::{sanitize_workload_id, SnapshotStore};
use driftguard_state::*;

use crate::risk::{should_migrate, RiskAnalyzer, RiskAssessment, RiskRequest};
use crate::signal::read_rebalance_signal;

/// Extra slack on the claim TTL beyond the two command deadlines a cycle
/// can spend waiting.
const CLAIM_SLACK_SECS: i64 = 30;

/// How one migration cycle ended. Every non-`Completed` outcome is
/// retried from scratch on a later tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Eligibility gate not passed: inactive source, live claim,
    /// outstanding command, or cooldown.
    Skipped,
    /// Risk verdict did not call for migration.
    NotTriggered,
    /// No active, idle target agent available.
    NoTarget,
    /// CHECKPOINT did not reach COMPLETED before the deadline.
    CheckpointIncomplete,
    /// CHECKPOINT completed but no snapshot artifact was found.
    SnapshotMissing,
    /// RESTORE did not reach COMPLETED before the deadline.
    RestoreIncomplete,
    /// Snapshot moved; audit entry committed.
    Completed { target_agent_id: AgentId },
    /// A storage or queue failure ended the cycle early (logged).
    Aborted,
}

/// Drives risk-triggered migrations across the agent fleet.
pub struct MigrationOrchestrator {
    state: StateStore,
    registry: AgentRegistry,
    queue: CommandQueue,
    snapshots: Arc<dyn SnapshotStore>,
    analyzer: Arc<dyn RiskAnalyzer>,
    config: ControlConfig,
    data_root: PathBuf,
}

/// Releases the migration claim when the cycle ends, whichever way.
struct ClaimGuard<'a> {
    state: &'a StateStore,
    agent_id: &'a str,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.state.release_claim(self.agent_id) {
            warn!(agent_id = %self.agent_id, error = %e, "failed to release migration claim");
        }
    }
}

impl MigrationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateStore,
        registry: AgentRegistry,
        queue: CommandQueue,
        snapshots: Arc<dyn SnapshotStore>,
        analyzer: Arc<dyn RiskAnalyzer>,
        config: ControlConfig,
        data_root: PathBuf,
    ) -> Self {
        Self {
            state,
            registry,
            queue,
            snapshots,
            analyzer,
            config,
            data_root,
        }
    }

    /// One migration cycle for one source agent.
    ///
    /// Never returns an error: every failure is logged and mapped to an
    /// outcome so the driver loop keeps running.
    pub async fn run_cycle(
        &self,
        agent: &Agent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        let now = Utc::now();
        if !self.registry.is_active(agent, now) {
            return CycleOutcome::Skipped;
        }

        // Atomic eligibility gate: one conditional write checks for a
        // live claim, outstanding PENDING commands, and the cooldown
        // window, then inserts the claim.
        let claim_ttl =
            chrono::Duration::seconds(2 * self.config.command_timeout_secs as i64 + CLAIM_SLACK_SECS);
        let cooldown = chrono::Duration::seconds(self.config.cooldown_secs as i64);
        match self
            .state
            .try_claim_migration(&agent.id, now, claim_ttl, cooldown)
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(agent_id = %agent.id, "migration claim not acquired");
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "claim attempt failed");
                return CycleOutcome::Aborted;
            }
        }
        let _claim = ClaimGuard {
            state: &self.state,
            agent_id: &agent.id,
        };

        // Risk evaluation from the latest telemetry, with the signal
        // file overriding the telemetry flag when present.
        let telemetry = match self.state.latest_telemetry(&agent.id) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "telemetry read failed");
                return CycleOutcome::Aborted;
            }
        };
        let telemetry_signal = telemetry.as_ref().map(|t| t.rebalance_signal).unwrap_or(false);
        let rebalance_signal = read_rebalance_signal(&self.data_root, &self.config.signal_path)
            .unwrap_or(telemetry_signal);

        let request = RiskRequest {
            agent_id: agent.id.clone(),
            workload_tier: telemetry
                .as_ref()
                .map(|t| t.workload_tier.clone())
                .unwrap_or_default(),
            disk_available: telemetry.as_ref().map(|t| t.disk_available).unwrap_or(0),
            rebalance_signal,
        };
        let assessment = match self.analyzer.analyze(&request).await {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "risk analyzer unreachable");
                RiskAssessment::unavailable()
            }
        };
        if !should_migrate(&assessment, rebalance_signal) {
            debug!(
                agent_id = %agent.id,
                status = %assessment.status,
                rebalance_signal,
                "no migration needed"
            );
            return CycleOutcome::NotTriggered;
        }
        info!(
            agent_id = %agent.id,
            status = %assessment.status,
            confidence = assessment.confidence,
            rebalance_signal,
            "migration triggered"
        );

        // Target selection: first other active agent with nothing queued.
        let target = match self.select_target(&agent.id, now) {
            Ok(Some(target)) => target,
            Ok(None) => {
                warn!(agent_id = %agent.id, "no idle target agent available");
                return CycleOutcome::NoTarget;
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "target selection failed");
                return CycleOutcome::Aborted;
            }
        };

        // Checkpoint the source workload.
        let checkpoint = match self.queue.queue_command(&agent.id, "CHECKPOINT", &json!({})) {
            Ok(command) => command,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "failed to queue CHECKPOINT");
                return CycleOutcome::Aborted;
            }
        };
        match self.await_terminal(&checkpoint.command_id, shutdown).await {
            Some(CommandStatus::Completed) => {}
            other => {
                warn!(
                    agent_id = %agent.id,
                    command_id = %checkpoint.command_id,
                    outcome = ?other,
                    "CHECKPOINT did not complete"
                );
                return CycleOutcome::CheckpointIncomplete;
            }
        }

        // The agent uploads its archive keyed by its own id.
        let descriptor = match self.snapshots.latest_descriptor(&agent.id).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                warn!(agent_id = %agent.id, "checkpoint completed but no snapshot found");
                return CycleOutcome::SnapshotMissing;
            }
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "snapshot lookup failed");
                return CycleOutcome::Aborted;
            }
        };

        let snapshot_url = match self.download_url(&agent.id) {
            Ok(url) => url,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "could not build snapshot url");
                return CycleOutcome::Aborted;
            }
        };
        let restore = match self.queue.queue_command(
            &target.id,
            "RESTORE",
            &json!({ "snapshotUrl": snapshot_url }),
        ) {
            Ok(command) => command,
            Err(e) => {
                warn!(target_agent_id = %target.id, error = %e, "failed to queue RESTORE");
                return CycleOutcome::Aborted;
            }
        };
        match self.await_terminal(&restore.command_id, shutdown).await {
            Some(CommandStatus::Completed) => {}
            other => {
                warn!(
                    target_agent_id = %target.id,
                    command_id = %restore.command_id,
                    outcome = ?other,
                    "RESTORE did not complete"
                );
                return CycleOutcome::RestoreIncomplete;
            }
        }

        // Commit. This entry is what the cooldown check reads.
        let commit = CommandAuditEntry {
            command_id: restore.command_id.clone(),
            actor: agent.id.clone(),
            action: AUDIT_MIGRATION_COMPLETED.to_string(),
            result: target.id.clone(),
            error: String::new(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.state.append_audit(&commit) {
            warn!(agent_id = %agent.id, error = %e, "failed to record migration completion");
            return CycleOutcome::Aborted;
        }
        info!(
            source_agent_id = %agent.id,
            target_agent_id = %target.id,
            snapshot = %descriptor.file_name,
            "migration completed"
        );
        CycleOutcome::Completed {
            target_agent_id: target.id.clone(),
        }
    }

    /// One tick over the whole fleet, sources handled sequentially.
    pub async fn tick(&self, shutdown: &mut watch::Receiver<bool>) {
        let agents = match self.state.list_agents() {
            Ok(agents) => agents,
            Err(e) => {
                tracing::error!(error = %e, "could not list agents");
                return;
            }
        };
        for agent in &agents {
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.run_cycle(agent, shutdown).await;
            debug!(agent_id = %agent.id, ?outcome, "migration cycle finished");
        }
    }

    /// Run the orchestrator loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            "migration orchestrator started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick(&mut shutdown).await;
                }
                _ = shutdown.changed() => {
                    info!("migration orchestrator shutting down");
                    break;
                }
            }
        }
    }

    fn select_target(
        &self,
        source_agent_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> StateResult<Option<Agent>> {
        for candidate in self.state.list_agents()? {
            if candidate.id == source_agent_id {
                continue;
            }
            if !self.registry.is_active(&candidate, now) {
                continue;
            }
            if self.state.has_pending_commands(&candidate.id)? {
                continue;
            }
            return Ok(Some(candidate));
        }
        Ok(None)
    }

    fn download_url(&self, workload_id: &str) -> Result<String, driftguard_snapshot::SnapshotError> {
        let sanitized = sanitize_workload_id(workload_id)?;
        Ok(format!(
            "{}/download/{}",
            self.config.artifact_base_url.trim_end_matches('/'),
            sanitized
        ))
    }

    /// Poll the command status until terminal, deadline, or shutdown.
    ///
    /// Holds nothing while waiting; each probe is an independent read.
    /// `None` means the deadline passed or shutdown was requested; any
    /// late terminal transition by the agent is simply ignored.
    async fn await_terminal(
        &self,
        command_id: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<CommandStatus> {
        let deadline = Instant::now() + Duration::from_secs(self.config.command_timeout_secs);
        let poll = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            match self.state.get_command(command_id) {
                Ok(Some(command)) if command.status.is_terminal() => {
                    return Some(command.status)
                }
                Ok(Some(_)) => {}
                Ok(None) => return None,
                Err(e) => {
                    warn!(%command_id, error = %e, "command status poll failed");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = shutdown.changed() => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use driftguard_snapshot::LocalSnapshotStore;

    struct StubAnalyzer {
        verdict: Option<RiskAssessment>,
    }

    impl StubAnalyzer {
        fn critical() -> Self {
            Self {
                verdict: Some(RiskAssessment {
                    status: "CRITICAL".to_string(),
                    confidence: 0.97,
                    prediction: "reclamation imminent".to_string(),
                    root_cause: "spot capacity".to_string(),
                }),
            }
        }

        fn healthy() -> Self {
            Self {
                verdict: Some(RiskAssessment {
                    status: "HEALTHY".to_string(),
                    confidence: 0.8,
                    prediction: String::new(),
                    root_cause: String::new(),
                }),
            }
        }

        fn down() -> Self {
            Self { verdict: None }
        }
    }

    #[async_trait]
    impl RiskAnalyzer for StubAnalyzer {
        async fn analyze(&self, _request: &RiskRequest) -> anyhow::Result<RiskAssessment> {
            match &self.verdict {
                Some(verdict) => Ok(verdict.clone()),
                None => anyhow::bail!("analyzer unreachable"),
            }
        }
    }

    struct Fixture {
        state: StateStore,
        registry: AgentRegistry,
        orchestrator: MigrationOrchestrator,
        snapshots: Arc<dyn SnapshotStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(analyzer: StubAnalyzer, timeout_secs: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state = StateStore::open_in_memory().unwrap();
        let registry = AgentRegistry::new(state.clone());
        let queue = CommandQueue::new(state.clone(), "test-key");
        let snapshots: Arc<dyn SnapshotStore> =
            Arc::new(LocalSnapshotStore::new(dir.path().join("snapshots")));
        let config = ControlConfig {
            command_timeout_secs: timeout_secs,
            poll_interval_secs: 0,
            ..ControlConfig::default()
        };
        let orchestrator = MigrationOrchestrator::new(
            state.clone(),
            registry.clone(),
            queue,
            snapshots.clone(),
            Arc::new(analyzer),
            config,
            dir.path().to_path_buf(),
        );
        Fixture {
            state,
            registry,
            orchestrator,
            snapshots,
            _dir: dir,
        }
    }

    fn active_agent(fixture: &Fixture, hostname: &str) -> Agent {
        let reg = fixture.registry.register(hostname).unwrap();
        fixture.registry.heartbeat(&reg.token).unwrap();
        fixture.state.get_agent(&reg.agent_id).unwrap().unwrap()
    }

    /// The sender must stay alive or `changed()` resolves immediately.
    fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    /// Completes every PENDING command for the given agents in the
    /// background, standing in for live agents.
    fn spawn_completer(state: StateStore, agent_ids: Vec<String>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                for agent_id in &agent_ids {
                    for command in state.list_pending_commands(agent_id).unwrap() {
                        state
                            .transition_command(
                                &command.command_id,
                                CommandStatus::Completed,
                                Utc::now(),
                            )
                            .unwrap();
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }

    #[tokio::test]
    async fn full_cycle_commits_migration() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 5);
        let source = active_agent(&fixture, "host-src");
        let target = active_agent(&fixture, "host-dst");
        fixture
            .snapshots
            .store(&source.id, Bytes::from_static(b"checkpoint"))
            .await
            .unwrap();

        let completer = spawn_completer(
            fixture.state.clone(),
            vec![source.id.clone(), target.id.clone()],
        );
        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        completer.abort();

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                target_agent_id: target.id.clone()
            }
        );
        // Commit record arms the cooldown for the source.
        assert!(fixture
            .state
            .has_recent_migration(&source.id, Utc::now() - chrono::Duration::minutes(2))
            .unwrap());
        // Claim was released, but cooldown now blocks a fresh cycle.
        let again = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(again, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn healthy_verdict_does_not_trigger() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::healthy(), 5);
        let source = active_agent(&fixture, "host-src");
        active_agent(&fixture, "host-dst");

        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(outcome, CycleOutcome::NotTriggered);
        // A NotTriggered cycle leaves no residue: next tick re-evaluates.
        let again = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(again, CycleOutcome::NotTriggered);
    }

    #[tokio::test]
    async fn forced_signal_with_analyzer_down_triggers() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::down(), 5);
        let source = active_agent(&fixture, "host-src");
        std::fs::write(
            fixture._dir.path().join("rebalance_signal.json"),
            r#"{"rebalanceSignal": true}"#,
        )
        .unwrap();

        // Only one agent: trigger fires but there is nowhere to go.
        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(outcome, CycleOutcome::NoTarget);
    }

    #[tokio::test]
    async fn analyzer_down_without_signal_does_not_trigger() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::down(), 5);
        let source = active_agent(&fixture, "host-src");
        active_agent(&fixture, "host-dst");

        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(outcome, CycleOutcome::NotTriggered);
    }

    #[tokio::test]
    async fn checkpoint_deadline_aborts_cycle() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 0);
        let source = active_agent(&fixture, "host-src");
        active_agent(&fixture, "host-dst");

        // No completer: CHECKPOINT stays PENDING past the deadline.
        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(outcome, CycleOutcome::CheckpointIncomplete);

        // The cycle left its CHECKPOINT command behind, so the next
        // eligibility gate sees an outstanding command and skips.
        let again = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(again, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn missing_snapshot_aborts_after_checkpoint() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 5);
        let source = active_agent(&fixture, "host-src");
        let target = active_agent(&fixture, "host-dst");

        let completer = spawn_completer(
            fixture.state.clone(),
            vec![source.id.clone(), target.id.clone()],
        );
        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        completer.abort();

        assert_eq!(outcome, CycleOutcome::SnapshotMissing);
        // No commit record was written.
        assert!(!fixture
            .state
            .has_recent_migration(&source.id, Utc::now() - chrono::Duration::minutes(2))
            .unwrap());
    }

    #[tokio::test]
    async fn pending_command_blocks_eligibility() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 5);
        let source = active_agent(&fixture, "host-src");
        active_agent(&fixture, "host-dst");

        let queue = CommandQueue::new(fixture.state.clone(), "test-key");
        queue
            .queue_command(&source.id, "RESTART", &serde_json::Value::Null)
            .unwrap();

        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn inactive_source_is_skipped() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 5);
        let reg = fixture.registry.register("host-src").unwrap();
        // Never heartbeated: OFFLINE.
        let source = fixture.state.get_agent(&reg.agent_id).unwrap().unwrap();

        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        assert_eq!(outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn busy_targets_are_passed_over() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 5);
        let source = active_agent(&fixture, "host-src");
        let busy = active_agent(&fixture, "host-busy");
        let idle = active_agent(&fixture, "host-idle");
        fixture
            .snapshots
            .store(&source.id, Bytes::from_static(b"checkpoint"))
            .await
            .unwrap();

        let queue = CommandQueue::new(fixture.state.clone(), "test-key");
        queue
            .queue_command(&busy.id, "RESTART", &serde_json::Value::Null)
            .unwrap();

        let completer = spawn_completer(
            fixture.state.clone(),
            vec![source.id.clone(), idle.id.clone()],
        );
        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        completer.abort();

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                target_agent_id: idle.id.clone()
            }
        );
    }

    #[tokio::test]
    async fn restore_carries_snapshot_url() {
        let (_shutdown_tx, mut shutdown) = shutdown_channel();
        let fixture = fixture(StubAnalyzer::critical(), 5);
        let source = active_agent(&fixture, "host-src");
        let target = active_agent(&fixture, "host-dst");
        fixture
            .snapshots
            .store(&source.id, Bytes::from_static(b"checkpoint"))
            .await
            .unwrap();

        // Completer that records each command it sees before completing it.
        let seen = Arc::new(std::sync::Mutex::new(Vec::<Command>::new()));
        let completer = {
            let state = fixture.state.clone();
            let agent_ids = vec![source.id.clone(), target.id.clone()];
            let seen = seen.clone();
            tokio::spawn(async move {
                loop {
                    for agent_id in &agent_ids {
                        for command in state.list_pending_commands(agent_id).unwrap() {
                            seen.lock().unwrap().push(command.clone());
                            state
                                .transition_command(
                                    &command.command_id,
                                    CommandStatus::Completed,
                                    Utc::now(),
                                )
                                .unwrap();
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        let outcome = fixture
            .orchestrator
            .run_cycle(&source, &mut shutdown)
            .await;
        completer.abort();
        assert!(matches!(outcome, CycleOutcome::Completed { .. }));

        let seen = seen.lock().unwrap();
        let restore = seen
            .iter()
            .find(|c| c.action == "RESTORE")
            .expect("RESTORE was issued");
        assert_eq!(restore.agent_id, target.id);
        let params: serde_json::Value = serde_json::from_str(&restore.parameters).unwrap();
        assert_eq!(
            params["snapshotUrl"],
            format!("http://localhost:8080/download/{}", source.id)
        );

        // CHECKPOINT was observed (and completed) before RESTORE went out.
        let checkpoint_pos = seen.iter().position(|c| c.action == "CHECKPOINT").unwrap();
        let restore_pos = seen.iter().position(|c| c.action == "RESTORE").unwrap();
        assert!(checkpoint_pos < restore_pos);
    }
}
