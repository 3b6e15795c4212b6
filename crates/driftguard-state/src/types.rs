//! Domain types for the DriftGuard state store.
//!
//! These types represent the persisted state of agents, commands, audit
//! entries, telemetry, and migration claims. All types are serializable
//! to/from JSON for storage in redb tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a registered agent (UUID string).
pub type AgentId = String;

/// Unique identifier for a queued command (UUID string).
pub type CommandId = String;

// ── Agent ─────────────────────────────────────────────────────────

/// Identity record for a remote execution agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    /// Unique credential presented on every heartbeat.
    pub token: String,
    /// Hostname determines identity at registration time.
    pub hostname: String,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
}

/// Heartbeat-derived agent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Offline,
    Online,
}

// ── Command ───────────────────────────────────────────────────────

/// Unit of remote work addressed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub command_id: CommandId,
    /// Target agent. Empty when the workload id is not agent-addressed.
    pub agent_id: AgentId,
    pub workload_id: String,
    /// Canonical upper-case action, e.g. CHECKPOINT, RESTORE, RESTART.
    pub action: String,
    /// Opaque JSON payload, serialized to a string before storage.
    pub parameters: String,
    pub status: CommandStatus,
    /// Single-use random token folded into the signature.
    pub nonce: String,
    /// base64(HMAC-SHA256(key, command_id || action || nonce)).
    pub signature: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Command lifecycle status. PENDING is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        self != CommandStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Completed => "COMPLETED",
            CommandStatus::Failed => "FAILED",
        }
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// Append-only audit log entry. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandAuditEntry {
    pub command_id: CommandId,
    /// Who or what produced the entry.
    pub actor: String,
    /// Human label, e.g. "Command Queued", "Migration Completed".
    pub action: String,
    pub result: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Audit action label written when a command is queued.
pub const AUDIT_COMMAND_QUEUED: &str = "Command Queued";
/// Audit action label written when an agent reports a command outcome.
pub const AUDIT_RESULT_RECEIVED: &str = "Execution Result Received";
/// Audit action label written when a migration cycle commits.
pub const AUDIT_MIGRATION_COMPLETED: &str = "Migration Completed";

// ── Telemetry ─────────────────────────────────────────────────────

/// Latest risk telemetry sample for an agent (consumed, not owned).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    pub agent_id: AgentId,
    /// Workload classification: T1/T2/T3.
    pub workload_tier: String,
    /// Externally set hint that risk conditions warrant migration.
    pub rebalance_signal: bool,
    /// Available disk in bytes.
    pub disk_available: u64,
    pub timestamp: DateTime<Utc>,
}

// ── Migration claim ───────────────────────────────────────────────

/// Exclusive claim on a source agent for the duration of one migration
/// cycle. Inserted by a single conditional write so two orchestrator
/// instances cannot both pass the eligibility gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationClaim {
    pub agent_id: AgentId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
