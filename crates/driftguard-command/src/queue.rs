//! Queueing of signed agent commands with audit logging.

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use driftguard_state::*;

use crate::signer::CommandSigner;

/// Fallback key used when no signing key is configured. Signatures made
/// with it carry no authenticity guarantee.
pub const DEV_SIGNING_KEY: &str = "dev-secret";

/// Commands expire five minutes after they are queued.
const COMMAND_TTL_MINUTES: i64 = 5;

/// Errors surfaced by the command queue.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Issues signed, single-use commands and records their audit trail.
#[derive(Clone)]
pub struct CommandQueue {
    state: StateStore,
    signer: CommandSigner,
}

impl CommandQueue {
    /// Build a queue with the configured signing key.
    ///
    /// An empty key falls back to [`DEV_SIGNING_KEY`] with a loud warning;
    /// that configuration is unacceptable for production authenticity.
    pub fn new(state: StateStore, signing_key: &str) -> Self {
        let key = signing_key.trim();
        let signer = if key.is_empty() {
            warn!(
                "command signing key not configured; using the development fallback key. \
                 Signatures issued with it are NOT trustworthy."
            );
            CommandSigner::new(DEV_SIGNING_KEY)
        } else {
            CommandSigner::new(key)
        };
        Self { state, signer }
    }

    /// The signer in use, for signature verification.
    pub fn signer(&self) -> &CommandSigner {
        &self.signer
    }

    /// Queue a command for a workload.
    ///
    /// Normalizes the action to upper case, generates a fresh command id
    /// and nonce, signs the triple, and appends a "Command Queued" audit
    /// entry. When the workload id parses as a UUID it doubles as the
    /// target agent id.
    pub fn queue_command(
        &self,
        workload_id: &str,
        action: &str,
        parameters: &serde_json::Value,
    ) -> Result<Command, CommandError> {
        let workload_id = workload_id.trim();
        if workload_id.is_empty() {
            return Err(CommandError::Validation("workloadId is required".to_string()));
        }
        let action = action.trim();
        if action.is_empty() {
            return Err(CommandError::Validation("action is required".to_string()));
        }

        let action = action.to_uppercase();
        let command_id = Uuid::new_v4().to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let signature = self.signer.sign(&command_id, &action, &nonce);

        // Canonical form, so delivery lookups match however the caller
        // spelled the UUID (upper case, braced, simple).
        let agent_id = Uuid::parse_str(workload_id)
            .map(|u| u.to_string())
            .unwrap_or_default();

        let command = Command {
            command_id: command_id.clone(),
            agent_id,
            workload_id: workload_id.to_string(),
            action,
            parameters: serialize_parameters(parameters),
            status: CommandStatus::Pending,
            nonce,
            signature,
            expires_at: now + Duration::minutes(COMMAND_TTL_MINUTES),
            created_at: now,
            updated_at: now,
        };

        self.state.put_command(&command)?;
        self.state.append_audit(&CommandAuditEntry {
            command_id,
            actor: "control-plane".to_string(),
            action: AUDIT_COMMAND_QUEUED.to_string(),
            result: CommandStatus::Pending.as_str().to_string(),
            error: String::new(),
            created_at: now,
        })?;

        info!(
            command_id = %command.command_id,
            workload_id = %command.workload_id,
            action = %command.action,
            "command queued"
        );
        Ok(command)
    }
}

fn serialize_parameters(parameters: &serde_json::Value) -> String {
    if parameters.is_null() {
        "{}".to_string()
    } else {
        parameters.to_string()
    }
}
