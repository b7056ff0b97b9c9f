use crate::entities::{Confidence, Direction, TradeStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Candidate trade produced by strategy logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub size: Decimal,
    pub strategy_name: String,
    pub technical_confidence: Confidence,
    pub fundamental_alignment: Confidence,
    /// 0.0 (safe) to 1.0 (risky)
    pub risk_score: f64,
    pub status: TradeStatus,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub time_limit_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl TradeProposal {
    /// Create a proposal with a fresh id and `Proposed` status
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        size: Decimal,
        strategy_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            direction,
            size,
            strategy_name: strategy_name.into(),
            technical_confidence: Confidence::Medium,
            fundamental_alignment: Confidence::Medium,
            risk_score: 0.5,
            status: TradeStatus::Proposed,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            time_limit_secs: 3600,
            created_at: Utc::now(),
        }
    }

    /// Creation time plus `time_limit_secs`, saturating at the latest
    /// representable time
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.time_limit_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|limit| self.created_at.checked_add_signed(limit))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once `time_limit_secs` has elapsed since creation
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Risk decision for one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub proposal: TradeProposal,
    pub approved: bool,
    /// Size cleared for execution (may be smaller than proposed)
    pub approved_size: Decimal,
    pub reason: String,
    pub max_position_size: Decimal,
    /// Total open size across symbols at decision time
    pub current_exposure: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn proposal_id(&self) -> Uuid {
        self.proposal.id
    }
}

/// Fill reported by the execution agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecution {
    pub proposal_id: Uuid,
    pub execution_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub executed_size: Decimal,
    pub executed_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub strategy_name: String,
    pub status: TradeStatus,
    pub execution_time: DateTime<Utc>,
}

impl TradeExecution {
    /// Profit or loss if the position were closed at `exit_price`
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        let price_move = exit_price - self.executed_price;
        price_move * self.executed_size * Decimal::from(self.direction.sign())
    }
}

/// Closed trade outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    /// Execution id of the closed trade
    pub trade_id: Uuid,
    pub proposal_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub profit_loss: Decimal,
    pub exit_reason: String,
    pub strategy_name: String,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.profit_loss > Decimal::ZERO
    }
}
