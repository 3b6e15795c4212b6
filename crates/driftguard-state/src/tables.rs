//! redb table definitions for the DriftGuard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Audit keys are `{created_at_millis:020}:{entry_id}` so a range
//! scan from a cutoff timestamp returns entries in creation order.

use redb::TableDefinition;

/// Agent records keyed by `{agent_id}`.
pub const AGENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("agents");

/// Token index: `{token}` -> agent id bytes. Enforces token uniqueness.
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// Commands keyed by `{command_id}`.
pub const COMMANDS: TableDefinition<&str, &[u8]> = TableDefinition::new("commands");

/// Append-only command audit log keyed by `{created_at_millis:020}:{entry_id}`.
pub const COMMAND_AUDITS: TableDefinition<&str, &[u8]> = TableDefinition::new("command_audits");

/// Latest telemetry sample per agent, keyed by `{agent_id}`.
pub const TELEMETRY: TableDefinition<&str, &[u8]> = TableDefinition::new("telemetry");

/// Active migration claims keyed by `{agent_id}`.
pub const CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("claims");
