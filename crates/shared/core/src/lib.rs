//! FTBA Core Domain
//!
//! Message and payload types shared by every crate in the runtime.
//! This crate contains no async and no I/O.
//!
//! - [`Message`]: immutable envelope routed by the broker
//! - [`MessageType`]: routing key used for subscriptions
//! - [`Payload`]: strongly-typed content, one variant per message type
//! - Trading enums carried inside payloads ([`Direction`], [`Confidence`], ...)

pub mod entities;
pub mod ids;
pub mod message;
pub mod payloads;

// Re-export commonly used types at crate root
pub use entities::{Confidence, Direction, Timeframe, TradeStatus};
pub use ids::{AgentId, MessageId};
pub use message::{Message, MessageType};
pub use payloads::{
    AgentStatus, FundamentalUpdate, Payload, RiskAssessment, StrategyRecommendation, SystemAlert,
    SystemState, SystemStatus, TechnicalSignal, TradeExecution, TradeProposal, TradeResult,
};
