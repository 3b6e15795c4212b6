//! Agent registry — identity, token issuance, and heartbeat liveness.
//!
//! Registration is idempotent by hostname: re-registering an existing
//! hostname returns the original token and agent id instead of minting a
//! new identity. Heartbeats authenticate by token, flip the agent ONLINE,
//! and push back every PENDING command in creation order.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use driftguard_state::*;

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Result of a registration call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub agent_id: AgentId,
    pub token: String,
}

/// Manages agent identity and heartbeat-derived liveness.
#[derive(Clone)]
pub struct AgentRegistry {
    state: StateStore,
    /// Staleness bound on `last_heartbeat` for the liveness predicate.
    heartbeat_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            heartbeat_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Register an agent by hostname.
    ///
    /// Idempotent: an existing hostname returns its existing credentials.
    pub fn register(&self, hostname: &str) -> Result<Registration, RegistryError> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(RegistryError::Validation("hostname is required".to_string()));
        }

        if let Some(existing) = self.state.find_agent_by_hostname(hostname)? {
            debug!(%hostname, agent_id = %existing.id, "re-registration, returning existing identity");
            return Ok(Registration {
                agent_id: existing.id,
                token: existing.token,
            });
        }

        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            token: Uuid::new_v4().simple().to_string(),
            hostname: hostname.to_string(),
            status: AgentStatus::Offline,
            last_heartbeat: Utc::now(),
        };
        self.state.put_agent(&agent)?;
        info!(%hostname, agent_id = %agent.id, "agent registered");

        Ok(Registration {
            agent_id: agent.id,
            token: agent.token,
        })
    }

    /// Process a heartbeat.
    ///
    /// Authenticates by token, marks the agent ONLINE with a fresh
    /// `last_heartbeat`, and returns its PENDING commands oldest first
    /// (push delivery).
    pub fn heartbeat(&self, token: &str) -> Result<Vec<Command>, RegistryError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RegistryError::Validation("token is required".to_string()));
        }

        let mut agent = match self.state.find_agent_by_token(token)? {
            Some(agent) => agent,
            None => {
                warn!("heartbeat with unknown token");
                return Err(RegistryError::Auth("invalid token".to_string()));
            }
        };

        agent.status = AgentStatus::Online;
        agent.last_heartbeat = Utc::now();
        self.state.put_agent(&agent)?;
        debug!(agent_id = %agent.id, "heartbeat received");

        Ok(self.state.list_pending_commands(&agent.id)?)
    }

    /// Liveness predicate: ONLINE and heartbeated within the timeout.
    pub fn is_active(&self, agent: &Agent, now: DateTime<Utc>) -> bool {
        agent.status == AgentStatus::Online
            && (now - agent.last_heartbeat).to_std().map_or(true, |age| age <= self.heartbeat_timeout)
    }

    /// All agents currently considered active.
    pub fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Agent>, RegistryError> {
        let agents = self.state.list_agents()?;
        Ok(agents.into_iter().filter(|a| self.is_active(a, now)).collect())
    }
}
