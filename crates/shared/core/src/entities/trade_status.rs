use serde::{Deserialize, Serialize};

/// Trade lifecycle status, from proposal to close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// Initial proposal
    Proposed,
    /// Approved by risk management
    Approved,
    /// Rejected by risk management
    Rejected,
    /// Waiting for execution
    Pending,
    /// Filled at the gateway
    Executed,
    /// Canceled before execution
    Canceled,
    /// Position closed
    Closed,
    /// Expired without execution
    Expired,
}

impl TradeStatus {
    /// Returns true if no further transition is expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Rejected | TradeStatus::Canceled | TradeStatus::Closed | TradeStatus::Expired
        )
    }
}
