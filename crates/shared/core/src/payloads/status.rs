use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse state of the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Starting,
    Running,
    /// Some agents faulted, the rest keep working
    Degraded,
    ShuttingDown,
}

/// Alert attached to a system status broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "alert", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemAlert {
    /// A risk threshold was breached; pending trades should be canceled
    RiskLimitBreached { reason: String },
    TradingResumed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub state: SystemState,
    pub detail: String,
    pub alert: Option<SystemAlert>,
    pub timestamp: DateTime<Utc>,
}

impl SystemStatus {
    pub fn new(state: SystemState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
            alert: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_alert(mut self, alert: SystemAlert) -> Self {
        self.alert = Some(alert);
        self
    }
}

/// Lifecycle report for a single agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    /// Lifecycle state name (e.g. "RUNNING", "FAULTED")
    pub state: String,
    pub detail: Option<String>,
    pub restarts: u32,
    pub timestamp: DateTime<Utc>,
}
