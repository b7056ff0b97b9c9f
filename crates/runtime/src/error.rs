//! Error types for the runtime crate

use crate::lifecycle::Operation;
use ftba_broker::BrokerError;
use ftba_core::AgentId;
use thiserror::Error;

/// Agent lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent {agent_id} failed during setup: {reason}")]
    Setup { agent_id: AgentId, reason: String },

    #[error("agent {agent_id} failed in {operation}: {reason}")]
    Processing {
        agent_id: AgentId,
        operation: Operation,
        reason: String,
    },

    #[error("agent {0} was already started")]
    AlreadyStarted(AgentId),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl AgentError {
    /// Agent the error belongs to
    pub fn agent_id(&self) -> &str {
        match self {
            AgentError::Setup { agent_id, .. }
            | AgentError::Processing { agent_id, .. }
            | AgentError::AlreadyStarted(agent_id) => agent_id,
            AgentError::Broker(BrokerError::DuplicateAgent(agent_id))
            | AgentError::Broker(BrokerError::UnknownAgent(agent_id)) => agent_id,
        }
    }
}

/// Supervisor errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("failed to build agent {agent_id}: {reason}")]
    Factory { agent_id: AgentId, reason: String },

    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("agent id {0} is reserved for the supervisor")]
    ReservedId(AgentId),
}
