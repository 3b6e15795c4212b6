//! Agent workflow — the request-facing state machine.
//!
//! Commands move PENDING → COMPLETED | FAILED, terminal states are sticky.
//! Two equivalent delivery paths exist: push via heartbeat (liveness ping
//! side effect) and pull via [`AgentWorkflow::poll_commands`] (stateless).
//! Agents report outcomes through [`AgentWorkflow::feedback`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use driftguard_registry::{AgentRegistry, Registration, RegistryError};
use driftguard_state::*;

/// Errors surfaced by workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<RegistryError> for WorkflowError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => WorkflowError::Validation(msg),
            RegistryError::Auth(msg) => WorkflowError::Auth(msg),
            RegistryError::State(e) => WorkflowError::State(e),
        }
    }
}

/// Wire shape of a delivered command. Both delivery paths return it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_id: CommandId,
    pub workload_id: String,
    pub action: String,
    /// Opaque JSON payload.
    pub parameters: serde_json::Value,
    pub nonce: String,
    pub signature: String,
    /// Agents must not act on a command past this instant.
    pub expires_at: DateTime<Utc>,
}

impl From<Command> for CommandEnvelope {
    fn from(command: Command) -> Self {
        let parameters = serde_json::from_str(&command.parameters)
            .unwrap_or(serde_json::Value::Object(Default::default()));
        Self {
            command_id: command.command_id,
            workload_id: command.workload_id,
            action: command.action,
            parameters,
            nonce: command.nonce,
            signature: command.signature,
            expires_at: command.expires_at,
        }
    }
}

/// Heartbeat response: liveness ack plus push-delivered commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub status: String,
    pub commands: Vec<CommandEnvelope>,
}

/// Acknowledgement returned by feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackAck {
    pub status: String,
}

/// Request-facing operations for agents.
#[derive(Clone)]
pub struct AgentWorkflow {
    registry: AgentRegistry,
    state: StateStore,
}

impl AgentWorkflow {
    pub fn new(registry: AgentRegistry, state: StateStore) -> Self {
        Self { registry, state }
    }

    /// Register an agent by hostname (idempotent).
    pub fn register(&self, hostname: &str) -> Result<Registration, WorkflowError> {
        Ok(self.registry.register(hostname)?)
    }

    /// Push delivery: liveness ping returning PENDING commands oldest first.
    pub fn heartbeat(&self, token: &str) -> Result<HeartbeatReply, WorkflowError> {
        let commands = self.registry.heartbeat(token)?;
        Ok(HeartbeatReply {
            status: "active".to_string(),
            commands: commands.into_iter().map(CommandEnvelope::from).collect(),
        })
    }

    /// Pull delivery: stateless PENDING listing, no liveness side effect.
    pub fn poll_commands(&self, agent_id: &str) -> Result<Vec<CommandEnvelope>, WorkflowError> {
        let agent_id = parse_id(agent_id, "agentId")?;
        let commands = self.state.list_pending_commands(&agent_id)?;
        Ok(commands.into_iter().map(CommandEnvelope::from).collect())
    }

    /// Record a command outcome reported by an agent.
    ///
    /// The reported status is normalized into {COMPLETED, FAILED}; a
    /// reported DUPLICATE counts as COMPLETED. Terminal statuses are
    /// sticky: repeated feedback acks the stored status without change.
    pub fn feedback(
        &self,
        agent_id: &str,
        command_id: &str,
        status: &str,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<FeedbackAck, WorkflowError> {
        let agent_id = parse_id(agent_id, "agentId")?;
        let command_id = parse_id(command_id, "commandId")?;

        let reported = status.trim().to_uppercase();
        let normalized = match reported.as_str() {
            "COMPLETED" | "DUPLICATE" => CommandStatus::Completed,
            "FAILED" => CommandStatus::Failed,
            _ => {
                return Err(WorkflowError::Validation(format!(
                    "unsupported status: {reported}"
                )))
            }
        };

        let command = self
            .state
            .get_command(&command_id)?
            .filter(|c| c.agent_id == agent_id)
            .ok_or_else(|| WorkflowError::NotFound("command not found".to_string()))?;

        let now = Utc::now();
        match self.state.transition_command(&command.command_id, normalized, now)? {
            CommandTransition::Applied(updated) => {
                self.state.append_audit(&CommandAuditEntry {
                    command_id: updated.command_id.clone(),
                    actor: agent_id,
                    action: AUDIT_RESULT_RECEIVED.to_string(),
                    result: result
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or(&reported)
                        .to_string(),
                    error: error.unwrap_or_default().to_string(),
                    created_at: now,
                })?;

                if normalized == CommandStatus::Failed {
                    // Downstream fallback recovery keys off this line.
                    warn!(
                        command_id = %updated.command_id,
                        "command execution failed; fallback recovery required"
                    );
                }

                Ok(FeedbackAck {
                    status: updated.status.as_str().to_string(),
                })
            }
            CommandTransition::AlreadyTerminal(existing) => {
                debug!(
                    command_id = %existing.command_id,
                    status = existing.status.as_str(),
                    "feedback for terminal command ignored"
                );
                Ok(FeedbackAck {
                    status: existing.status.as_str().to_string(),
                })
            }
            CommandTransition::NotFound => {
                Err(WorkflowError::NotFound("command not found".to_string()))
            }
        }
    }
}

/// Identifiers on the wire must be non-nil UUIDs.
fn parse_id(raw: &str, field: &str) -> Result<String, WorkflowError> {
    let raw = raw.trim();
    match Uuid::parse_str(raw) {
        Ok(id) if !id.is_nil() => Ok(id.to_string()),
        _ => Err(WorkflowError::Validation(format!("{field} is malformed"))),
    }
}
