//! Message envelope and routing key
//!
//! A [`Message`] is created by the publishing agent and never mutated after
//! construction: fields are private and only read accessors are exposed.
//! The broker shares one `Arc<Message>` between every destination mailbox.

use crate::ids::{AgentId, MessageId};
use crate::payloads::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routing key for subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TechnicalSignal,
    FundamentalUpdate,
    RiskAssessment,
    StrategyRecommendation,
    TradeProposal,
    TradeExecution,
    TradeResult,
    SystemStatus,
    AgentStatus,
    /// Extension point for message kinds outside the fixed set
    Custom(String),
}

impl MessageType {
    /// Every fixed (non-custom) message type
    pub const FIXED: [MessageType; 9] = [
        MessageType::TechnicalSignal,
        MessageType::FundamentalUpdate,
        MessageType::RiskAssessment,
        MessageType::StrategyRecommendation,
        MessageType::TradeProposal,
        MessageType::TradeExecution,
        MessageType::TradeResult,
        MessageType::SystemStatus,
        MessageType::AgentStatus,
    ];

    pub fn custom(kind: impl Into<String>) -> Self {
        MessageType::Custom(kind.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::TechnicalSignal => "TECHNICAL_SIGNAL",
            Self::FundamentalUpdate => "FUNDAMENTAL_UPDATE",
            Self::RiskAssessment => "RISK_ASSESSMENT",
            Self::StrategyRecommendation => "STRATEGY_RECOMMENDATION",
            Self::TradeProposal => "TRADE_PROPOSAL",
            Self::TradeExecution => "TRADE_EXECUTION",
            Self::TradeResult => "TRADE_RESULT",
            Self::SystemStatus => "SYSTEM_STATUS",
            Self::AgentStatus => "AGENT_STATUS",
            Self::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable message routed between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: AgentId,
    /// Ordered, de-duplicated. Empty means broadcast to subscribers.
    recipients: Vec<AgentId>,
    payload: Payload,
    created_at: DateTime<Utc>,
    correlation_id: Option<MessageId>,
}

impl Message {
    /// Create a broadcast message from `sender`
    pub fn new(sender: impl Into<AgentId>, payload: Payload) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            recipients: Vec::new(),
            payload,
            created_at: Utc::now(),
            correlation_id: None,
        }
    }

    /// Restrict delivery to the given agents, bypassing subscriptions.
    /// Duplicates are dropped, first occurrence wins.
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AgentId>,
    {
        let mut ordered: Vec<AgentId> = Vec::new();
        for recipient in recipients {
            let recipient = recipient.into();
            if !ordered.contains(&recipient) {
                ordered.push(recipient);
            }
        }
        self.recipients = ordered;
        self
    }

    /// Link this message to a causally-prior message
    pub fn with_correlation(mut self, correlation_id: MessageId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Correlate with `original` (e.g. an execution answering a proposal)
    pub fn reply_to(self, original: &Message) -> Self {
        self.with_correlation(original.id)
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Routing key, always derived from the payload
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipients(&self) -> &[AgentId] {
        &self.recipients
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn correlation_id(&self) -> Option<MessageId> {
        self.correlation_id
    }

    /// True when no explicit recipients were given
    pub fn is_broadcast(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn is_addressed_to(&self, agent_id: &str) -> bool {
        self.recipients.iter().any(|r| r == agent_id)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(id={}, type={}, sender={}, recipients={:?})",
            self.id,
            self.message_type(),
            self.sender,
            self.recipients
        )
    }
}
