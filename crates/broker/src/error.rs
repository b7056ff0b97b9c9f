//! Error types for the broker crate

use ftba_core::{AgentId, MessageId};
use thiserror::Error;

/// Broker misuse, always returned to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),
}

/// Per-recipient delivery problem
///
/// Reported in a [`PublishReport`](crate::PublishReport) and logged; the other
/// recipients of the same message are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("directed message {message_id} names unregistered recipient {agent_id}")]
    UnknownRecipient {
        agent_id: AgentId,
        message_id: MessageId,
    },

    #[error("mailbox of {agent_id} is full ({capacity}), rejected message {message_id}")]
    MailboxFull {
        agent_id: AgentId,
        capacity: usize,
        message_id: MessageId,
    },

    #[error("mailbox of {agent_id} is full, evicted oldest message {evicted}")]
    Evicted { agent_id: AgentId, evicted: MessageId },

    #[error("mailbox of {agent_id} is closed, dropped message {message_id}")]
    MailboxClosed {
        agent_id: AgentId,
        message_id: MessageId,
    },
}

impl DeliveryError {
    /// Agent whose mailbox the error concerns
    pub fn agent_id(&self) -> &str {
        match self {
            DeliveryError::UnknownRecipient { agent_id, .. }
            | DeliveryError::MailboxFull { agent_id, .. }
            | DeliveryError::Evicted { agent_id, .. }
            | DeliveryError::MailboxClosed { agent_id, .. } => agent_id,
        }
    }

    /// True if the new message still reached the mailbox
    pub fn message_delivered(&self) -> bool {
        matches!(self, DeliveryError::Evicted { .. })
    }
}
