//! Strongly-typed message content
//!
//! [`Payload`] is a tagged union keyed by message type. The core never
//! interprets payload fields; it only routes them unchanged.

mod analysis;
mod status;
mod trade;

pub use analysis::{FundamentalUpdate, StrategyRecommendation, TechnicalSignal};
pub use status::{AgentStatus, SystemAlert, SystemState, SystemStatus};
pub use trade::{RiskAssessment, TradeExecution, TradeProposal, TradeResult};

use crate::message::MessageType;
use serde::{Deserialize, Serialize};

/// Message content, one variant per [`MessageType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    TechnicalSignal(TechnicalSignal),
    FundamentalUpdate(FundamentalUpdate),
    RiskAssessment(RiskAssessment),
    StrategyRecommendation(StrategyRecommendation),
    TradeProposal(TradeProposal),
    TradeExecution(TradeExecution),
    TradeResult(TradeResult),
    SystemStatus(SystemStatus),
    AgentStatus(AgentStatus),
    /// Free-form content for custom message types
    Custom {
        kind: String,
        body: serde_json::Value,
    },
}

impl Payload {
    pub fn custom(kind: impl Into<String>, body: serde_json::Value) -> Self {
        Payload::Custom {
            kind: kind.into(),
            body,
        }
    }

    /// Routing key for this payload
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::TechnicalSignal(_) => MessageType::TechnicalSignal,
            Payload::FundamentalUpdate(_) => MessageType::FundamentalUpdate,
            Payload::RiskAssessment(_) => MessageType::RiskAssessment,
            Payload::StrategyRecommendation(_) => MessageType::StrategyRecommendation,
            Payload::TradeProposal(_) => MessageType::TradeProposal,
            Payload::TradeExecution(_) => MessageType::TradeExecution,
            Payload::TradeResult(_) => MessageType::TradeResult,
            Payload::SystemStatus(_) => MessageType::SystemStatus,
            Payload::AgentStatus(_) => MessageType::AgentStatus,
            Payload::Custom { kind, .. } => MessageType::Custom(kind.clone()),
        }
    }
}

impl From<TechnicalSignal> for Payload {
    fn from(p: TechnicalSignal) -> Self {
        Payload::TechnicalSignal(p)
    }
}

impl From<FundamentalUpdate> for Payload {
    fn from(p: FundamentalUpdate) -> Self {
        Payload::FundamentalUpdate(p)
    }
}

impl From<RiskAssessment> for Payload {
    fn from(p: RiskAssessment) -> Self {
        Payload::RiskAssessment(p)
    }
}

impl From<StrategyRecommendation> for Payload {
    fn from(p: StrategyRecommendation) -> Self {
        Payload::StrategyRecommendation(p)
    }
}

impl From<TradeProposal> for Payload {
    fn from(p: TradeProposal) -> Self {
        Payload::TradeProposal(p)
    }
}

impl From<TradeExecution> for Payload {
    fn from(p: TradeExecution) -> Self {
        Payload::TradeExecution(p)
    }
}

impl From<TradeResult> for Payload {
    fn from(p: TradeResult) -> Self {
        Payload::TradeResult(p)
    }
}

impl From<SystemStatus> for Payload {
    fn from(p: SystemStatus) -> Self {
        Payload::SystemStatus(p)
    }
}

impl From<AgentStatus> for Payload {
    fn from(p: AgentStatus) -> Self {
        Payload::AgentStatus(p)
    }
}
