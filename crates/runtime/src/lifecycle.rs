//! Agent lifecycle state machine
//!
//! ```text
//!   CREATED ──start──► SETUP ──ok──► RUNNING ──stop──► STOPPING ──► STOPPED
//!      │                 │              │                  │
//!      │ stop            │ error        │ error            │ error raised
//!      ▼                 ▼              ▼                  ▼ before the stop
//!   STOPPED           FAULTED        FAULTED            FAULTED
//! ```
//!
//! `STOPPING → FAULTED` covers a fault that was already being handled when
//! the stop request arrived.
//!
//! State is published through a `tokio::sync::watch` channel so callers can
//! await a terminal state. Transitions not in the diagram are ignored.

use ftba_core::AgentId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle state of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Created,
    Setup,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Created => "CREATED",
            AgentState::Setup => "SETUP",
            AgentState::Running => "RUNNING",
            AgentState::Stopping => "STOPPING",
            AgentState::Stopped => "STOPPED",
            AgentState::Faulted => "FAULTED",
        }
    }

    /// No further transitions leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Stopped | AgentState::Faulted)
    }

    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Created, Setup)
                | (Created, Stopped)
                | (Setup, Running)
                | (Setup, Faulted)
                | (Running, Stopping)
                | (Running, Faulted)
                | (Stopping, Stopped)
                | (Stopping, Faulted)
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent hook being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Setup,
    ProcessCycle,
    HandleMessage,
    Cleanup,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Setup => "setup",
            Operation::ProcessCycle => "process_cycle",
            Operation::HandleMessage => "handle_message",
            Operation::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, validated lifecycle state for one agent
#[derive(Clone)]
pub struct Lifecycle {
    agent_id: AgentId,
    state: Arc<watch::Sender<AgentState>>,
}

impl Lifecycle {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        let (state, _) = watch::channel(AgentState::Created);
        Self {
            agent_id: agent_id.into(),
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Apply `next` if allowed from the current state
    ///
    /// Returns `false` and leaves the state unchanged otherwise.
    pub fn transition(&self, next: AgentState) -> bool {
        let mut from = next;
        let applied = self.state.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if applied {
            log::debug!("[{}] {} -> {}", self.agent_id, from, next);
        } else {
            log::debug!("[{}] Ignoring transition {} -> {}", self.agent_id, from, next);
        }
        applied
    }

    /// Receiver that observes every subsequent transition
    pub fn watch(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("agent_id", &self.agent_id)
            .field("state", &self.current())
            .finish()
    }
}
