//! StateStore — redb-backed persistence for the DriftGuard control plane.
//!
//! Provides typed operations over agents, commands, the append-only audit
//! log, telemetry samples, and migration claims. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of a command status transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandTransition {
    /// The command was PENDING and now carries the new status.
    Applied(Command),
    /// The command had already reached a terminal state; nothing changed.
    AlreadyTerminal(Command),
    /// No command with that id exists.
    NotFound,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(AGENTS).map_err(map_err!(Table))?;
        txn.open_table(TOKENS).map_err(map_err!(Table))?;
        txn.open_table(COMMANDS).map_err(map_err!(Table))?;
        txn.open_table(COMMAND_AUDITS).map_err(map_err!(Table))?;
        txn.open_table(TELEMETRY).map_err(map_err!(Table))?;
        txn.open_table(CLAIMS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Agents ─────────────────────────────────────────────────────

    /// Insert or update an agent, maintaining the unique token index in
    /// the same transaction.
    pub fn put_agent(&self, agent: &Agent) -> StateResult<()> {
        let value = serde_json::to_vec(agent).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut agents = txn.open_table(AGENTS).map_err(map_err!(Table))?;
            agents
                .insert(agent.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut tokens = txn.open_table(TOKENS).map_err(map_err!(Table))?;
            tokens
                .insert(agent.token.as_str(), agent.id.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(agent_id = %agent.id, "agent stored");
        Ok(())
    }

    /// Get an agent by id.
    pub fn get_agent(&self, agent_id: &str) -> StateResult<Option<Agent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
        match table.get(agent_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let agent: Agent =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    /// Look up an agent via the token index.
    pub fn find_agent_by_token(&self, token: &str) -> StateResult<Option<Agent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let tokens = txn.open_table(TOKENS).map_err(map_err!(Table))?;
        let agent_id = match tokens.get(token).map_err(map_err!(Read))? {
            Some(guard) => String::from_utf8_lossy(guard.value()).into_owned(),
            None => return Ok(None),
        };
        let agents = txn.open_table(AGENTS).map_err(map_err!(Table))?;
        match agents.get(agent_id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let agent: Agent =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    /// Look up an agent by hostname (registration identity).
    pub fn find_agent_by_hostname(&self, hostname: &str) -> StateResult<Option<Agent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let agent: Agent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if agent.hostname == hostname {
                return Ok(Some(agent));
            }
        }
        Ok(None)
    }

    /// List all agents.
    pub fn list_agents(&self) -> StateResult<Vec<Agent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AGENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let agent: Agent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(agent);
        }
        Ok(results)
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Insert or update a command.
    pub fn put_command(&self, command: &Command) -> StateResult<()> {
        let value = serde_json::to_vec(command).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
            table
                .insert(command.command_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a command by id.
    pub fn get_command(&self, command_id: &str) -> StateResult<Option<Command>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
        match table.get(command_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let command: Command =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(command))
            }
            None => Ok(None),
        }
    }

    /// List PENDING commands for an agent, oldest first.
    pub fn list_pending_commands(&self, agent_id: &str) -> StateResult<Vec<Command>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let command: Command =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if command.agent_id == agent_id && command.status == CommandStatus::Pending {
                results.push(command);
            }
        }
        results.sort_by_key(|c| c.created_at);
        Ok(results)
    }

    /// Whether any PENDING command is addressed to the agent.
    pub fn has_pending_commands(&self, agent_id: &str) -> StateResult<bool> {
        Ok(!self.list_pending_commands(agent_id)?.is_empty())
    }

    /// Transition a command out of PENDING.
    ///
    /// Terminal statuses are sticky: a command that already reached
    /// COMPLETED or FAILED is returned unchanged.
    pub fn transition_command(
        &self,
        command_id: &str,
        status: CommandStatus,
        updated_at: DateTime<Utc>,
    ) -> StateResult<CommandTransition> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
            let existing = match table.get(command_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let command: Command =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(command)
                }
                None => None,
            };
            outcome = match existing {
                None => CommandTransition::NotFound,
                Some(command) if command.status.is_terminal() => {
                    CommandTransition::AlreadyTerminal(command)
                }
                Some(mut command) => {
                    command.status = status;
                    command.updated_at = updated_at;
                    let value = serde_json::to_vec(&command).map_err(map_err!(Serialize))?;
                    table
                        .insert(command_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    CommandTransition::Applied(command)
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    // ── Audit log ──────────────────────────────────────────────────

    /// Append an audit entry. Entries are never updated or deleted.
    pub fn append_audit(&self, entry: &CommandAuditEntry) -> StateResult<()> {
        let key = audit_key(entry.created_at);
        let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COMMAND_AUDITS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All audit entries for a command, in append order.
    pub fn list_audits_for_command(&self, command_id: &str) -> StateResult<Vec<CommandAuditEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMMAND_AUDITS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let audit: CommandAuditEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if audit.command_id == command_id {
                results.push(audit);
            }
        }
        Ok(results)
    }

    /// Whether a "Migration Completed" entry exists for the actor at or
    /// after the cutoff. Range-scans the time-ordered audit keys.
    pub fn has_recent_migration(
        &self,
        actor: &str,
        cutoff: DateTime<Utc>,
    ) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMMAND_AUDITS).map_err(map_err!(Table))?;
        let lower = format!("{:020}", cutoff.timestamp_millis().max(0));
        for entry in table
            .range::<&str>(lower.as_str()..)
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let audit: CommandAuditEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if audit.action == AUDIT_MIGRATION_COMPLETED && audit.actor == actor {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Telemetry ──────────────────────────────────────────────────

    /// Upsert the latest telemetry sample for an agent.
    pub fn put_telemetry(&self, sample: &TelemetrySample) -> StateResult<()> {
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TELEMETRY).map_err(map_err!(Table))?;
            table
                .insert(sample.agent_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Latest telemetry sample for an agent, if any was ever recorded.
    pub fn latest_telemetry(&self, agent_id: &str) -> StateResult<Option<TelemetrySample>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TELEMETRY).map_err(map_err!(Table))?;
        match table.get(agent_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let sample: TelemetrySample =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(sample))
            }
            None => Ok(None),
        }
    }

    // ── Migration claims ───────────────────────────────────────────

    /// Atomic eligibility gate for a migration cycle.
    ///
    /// In a single write transaction: verifies no live claim exists for
    /// the agent, no PENDING command is addressed to it, and no
    /// "Migration Completed" audit entry was written for it inside the
    /// cooldown window. Only then inserts a claim with the given TTL.
    /// Returns whether the claim was acquired.
    pub fn try_claim_migration(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
        claim_ttl: Duration,
        cooldown: Duration,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let acquired;
        {
            let mut claims = txn.open_table(CLAIMS).map_err(map_err!(Table))?;
            let live = match claims.get(agent_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let claim: MigrationClaim =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    claim.expires_at > now
                }
                None => false,
            };

            let commands = txn.open_table(COMMANDS).map_err(map_err!(Table))?;
            let mut pending = false;
            if !live {
                for entry in commands.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let command: Command =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    if command.agent_id == agent_id && command.status == CommandStatus::Pending {
                        pending = true;
                        break;
                    }
                }
            }

            let audits = txn.open_table(COMMAND_AUDITS).map_err(map_err!(Table))?;
            let mut cooling = false;
            if !live && !pending {
                let cutoff = now - cooldown;
                let lower = format!("{:020}", cutoff.timestamp_millis().max(0));
                for entry in audits
                    .range::<&str>(lower.as_str()..)
                    .map_err(map_err!(Read))?
                {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let audit: CommandAuditEntry =
                        serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                    if audit.action == AUDIT_MIGRATION_COMPLETED && audit.actor == agent_id {
                        cooling = true;
                        break;
                    }
                }
            }

            acquired = !live && !pending && !cooling;
            if acquired {
                let claim = MigrationClaim {
                    agent_id: agent_id.to_string(),
                    claimed_at: now,
                    expires_at: now + claim_ttl,
                };
                let value = serde_json::to_vec(&claim).map_err(map_err!(Serialize))?;
                claims
                    .insert(agent_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%agent_id, acquired, "migration claim attempt");
        Ok(acquired)
    }

    /// Release a migration claim at cycle end. Returns true if it existed.
    pub fn release_claim(&self, agent_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLAIMS).map_err(map_err!(Table))?;
            existed = table.remove(agent_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

/// Time-ordered, collision-free audit key.
fn audit_key(created_at: DateTime<Utc>) -> String {
    format!(
        "{:020}:{}",
        created_at.timestamp_millis().max(0),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent(id: &str, hostname: &str) -> Agent {
        Agent {
            id: id.to_string(),
            token: format!("token-{id}"),
            hostname: hostname.to_string(),
            status: AgentStatus::Offline,
            last_heartbeat: Utc::now(),
        }
    }

    fn test_command(command_id: &str, agent_id: &str, created_at: DateTime<Utc>) -> Command {
        Command {
            command_id: command_id.to_string(),
            agent_id: agent_id.to_string(),
            workload_id: agent_id.to_string(),
            action: "CHECKPOINT".to_string(),
            parameters: "{}".to_string(),
            status: CommandStatus::Pending,
            nonce: "nonce".to_string(),
            signature: "sig".to_string(),
            expires_at: created_at + Duration::minutes(5),
            created_at,
            updated_at: created_at,
        }
    }

    fn audit(actor: &str, action: &str, created_at: DateTime<Utc>) -> CommandAuditEntry {
        CommandAuditEntry {
            command_id: "cmd-1".to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            result: String::new(),
            error: String::new(),
            created_at,
        }
    }

    // ── Agent CRUD ─────────────────────────────────────────────────

    #[test]
    fn agent_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = test_agent("a1", "host-a");

        store.put_agent(&agent).unwrap();
        assert_eq!(store.get_agent("a1").unwrap(), Some(agent));
    }

    #[test]
    fn agent_lookup_by_token() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_agent(&test_agent("a1", "host-a")).unwrap();

        let found = store.find_agent_by_token("token-a1").unwrap().unwrap();
        assert_eq!(found.id, "a1");
        assert!(store.find_agent_by_token("nope").unwrap().is_none());
    }

    #[test]
    fn agent_lookup_by_hostname() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_agent(&test_agent("a1", "host-a")).unwrap();
        store.put_agent(&test_agent("a2", "host-b")).unwrap();

        let found = store.find_agent_by_hostname("host-b").unwrap().unwrap();
        assert_eq!(found.id, "a2");
        assert!(store.find_agent_by_hostname("host-c").unwrap().is_none());
    }

    // ── Commands ───────────────────────────────────────────────────

    #[test]
    fn pending_commands_ordered_by_creation() {
        let store = StateStore::open_in_memory().unwrap();
        let base = Utc::now();
        store.put_command(&test_command("c2", "a1", base + Duration::seconds(5))).unwrap();
        store.put_command(&test_command("c1", "a1", base)).unwrap();
        store.put_command(&test_command("c3", "a2", base)).unwrap();

        let pending = store.list_pending_commands("a1").unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].command_id, "c1");
        assert_eq!(pending[1].command_id, "c2");
    }

    #[test]
    fn transition_applies_once() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.put_command(&test_command("c1", "a1", now)).unwrap();

        let first = store
            .transition_command("c1", CommandStatus::Completed, now)
            .unwrap();
        assert!(matches!(
            first,
            CommandTransition::Applied(ref c) if c.status == CommandStatus::Completed
        ));

        // Second transition is a no-op; the stored status never flips.
        let second = store
            .transition_command("c1", CommandStatus::Failed, now)
            .unwrap();
        assert!(matches!(
            second,
            CommandTransition::AlreadyTerminal(ref c) if c.status == CommandStatus::Completed
        ));
    }

    #[test]
    fn transition_unknown_command() {
        let store = StateStore::open_in_memory().unwrap();
        let outcome = store
            .transition_command("ghost", CommandStatus::Completed, Utc::now())
            .unwrap();
        assert_eq!(outcome, CommandTransition::NotFound);
    }

    // ── Audit log ──────────────────────────────────────────────────

    #[test]
    fn recent_migration_respects_cutoff() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .append_audit(&audit("a1", AUDIT_MIGRATION_COMPLETED, now - Duration::minutes(5)))
            .unwrap();

        // Outside the 2-minute window.
        assert!(!store
            .has_recent_migration("a1", now - Duration::minutes(2))
            .unwrap());

        store
            .append_audit(&audit("a1", AUDIT_MIGRATION_COMPLETED, now - Duration::seconds(30)))
            .unwrap();
        assert!(store
            .has_recent_migration("a1", now - Duration::minutes(2))
            .unwrap());
        // Other actors unaffected.
        assert!(!store
            .has_recent_migration("a2", now - Duration::minutes(2))
            .unwrap());
    }

    #[test]
    fn audits_for_command_in_append_order() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.append_audit(&audit("x", AUDIT_COMMAND_QUEUED, now)).unwrap();
        store
            .append_audit(&audit("x", AUDIT_RESULT_RECEIVED, now + Duration::seconds(1)))
            .unwrap();

        let audits = store.list_audits_for_command("cmd-1").unwrap();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].action, AUDIT_COMMAND_QUEUED);
        assert_eq!(audits[1].action, AUDIT_RESULT_RECEIVED);
    }

    // ── Telemetry ──────────────────────────────────────────────────

    #[test]
    fn telemetry_upsert_keeps_latest() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut sample = TelemetrySample {
            agent_id: "a1".to_string(),
            workload_tier: "T2".to_string(),
            rebalance_signal: false,
            disk_available: 10_000_000,
            timestamp: now,
        };
        store.put_telemetry(&sample).unwrap();

        sample.rebalance_signal = true;
        sample.timestamp = now + Duration::seconds(10);
        store.put_telemetry(&sample).unwrap();

        let latest = store.latest_telemetry("a1").unwrap().unwrap();
        assert!(latest.rebalance_signal);
        assert!(store.latest_telemetry("a2").unwrap().is_none());
    }

    // ── Migration claims ───────────────────────────────────────────

    #[test]
    fn claim_is_exclusive_until_released() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        let ttl = Duration::minutes(2);
        let cooldown = Duration::minutes(2);

        assert!(store.try_claim_migration("a1", now, ttl, cooldown).unwrap());
        assert!(!store.try_claim_migration("a1", now, ttl, cooldown).unwrap());
        // Different agent is unaffected.
        assert!(store.try_claim_migration("a2", now, ttl, cooldown).unwrap());

        assert!(store.release_claim("a1").unwrap());
        assert!(store.try_claim_migration("a1", now, ttl, cooldown).unwrap());
    }

    #[test]
    fn expired_claim_can_be_reacquired() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        let cooldown = Duration::minutes(2);

        assert!(store
            .try_claim_migration("a1", now, Duration::seconds(0), cooldown)
            .unwrap());
        // TTL of zero means the claim is already stale for a later now.
        assert!(store
            .try_claim_migration("a1", now + Duration::seconds(1), Duration::minutes(2), cooldown)
            .unwrap());
    }

    #[test]
    fn claim_blocked_by_pending_command() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.put_command(&test_command("c1", "a1", now)).unwrap();

        assert!(!store
            .try_claim_migration("a1", now, Duration::minutes(2), Duration::minutes(2))
            .unwrap());
    }

    #[test]
    fn claim_blocked_by_cooldown() {
        let store = StateStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .append_audit(&audit("a1", AUDIT_MIGRATION_COMPLETED, now - Duration::seconds(30)))
            .unwrap();

        assert!(!store
            .try_claim_migration("a1", now, Duration::minutes(2), Duration::minutes(2))
            .unwrap());
        // Once the completion falls outside the window the claim succeeds.
        assert!(store
            .try_claim_migration("a1", now + Duration::minutes(3), Duration::minutes(2), Duration::minutes(2))
            .unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_agent(&test_agent("a1", "host-a")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let agent = store.get_agent("a1").unwrap();
        assert!(agent.is_some());
        assert_eq!(agent.unwrap().hostname, "host-a");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_agents().unwrap().is_empty());
        assert!(store.list_pending_commands("any").unwrap().is_empty());
        assert!(!store.has_pending_commands("any").unwrap());
        assert!(store.get_command("any").unwrap().is_none());
        assert!(!store.release_claim("any").unwrap());
    }
}
