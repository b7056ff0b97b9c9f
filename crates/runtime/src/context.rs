//! Agent-side view of the broker

use crate::config::AgentConfig;
use ftba_broker::{Broker, BrokerError, PublishReport};
use ftba_core::{AgentId, Message, MessageId, MessageType, Payload};
use std::sync::Arc;

/// Handle passed to every agent hook
///
/// Messages built here always carry the agent's own id as sender, and
/// subscriptions can only target the agent itself.
#[derive(Clone)]
pub struct AgentContext {
    agent_id: AgentId,
    broker: Arc<Broker>,
    config: Arc<AgentConfig>,
}

impl AgentContext {
    pub fn new(agent_id: impl Into<AgentId>, broker: Arc<Broker>, config: Arc<AgentConfig>) -> Self {
        Self {
            agent_id: agent_id.into(),
            broker,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn subscribe<I>(&self, message_types: I) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = MessageType>,
    {
        self.broker.subscribe(&self.agent_id, message_types)
    }

    pub fn unsubscribe<I>(&self, message_types: I) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = MessageType>,
    {
        self.broker.unsubscribe(&self.agent_id, message_types)
    }

    /// New message from this agent
    pub fn message(&self, payload: impl Into<Payload>) -> Message {
        Message::new(self.agent_id.clone(), payload.into())
    }

    /// Broadcast to subscribers of the payload's type
    pub fn publish(&self, payload: impl Into<Payload>) -> PublishReport {
        self.broker.publish(self.message(payload))
    }

    /// Broadcast linked to an earlier message
    pub fn publish_correlated(
        &self,
        payload: impl Into<Payload>,
        correlation_id: MessageId,
    ) -> PublishReport {
        self.broker
            .publish(self.message(payload).with_correlation(correlation_id))
    }

    /// Deliver only to `recipients`, regardless of their subscriptions
    pub fn send_to<I, S>(&self, recipients: I, payload: impl Into<Payload>) -> PublishReport
    where
        I: IntoIterator<Item = S>,
        S: Into<AgentId>,
    {
        self.broker
            .publish(self.message(payload).with_recipients(recipients))
    }

    /// Directed answer to the sender of `original`
    pub fn reply(&self, original: &Message, payload: impl Into<Payload>) -> PublishReport {
        let message = self
            .message(payload)
            .with_recipients([original.sender()])
            .reply_to(original);
        self.broker.publish(message)
    }

    /// Broadcast several payloads with one enqueue per destination
    pub fn publish_batch<I>(&self, payloads: I) -> PublishReport
    where
        I: IntoIterator<Item = Payload>,
    {
        let messages: Vec<Message> = payloads
            .into_iter()
            .map(|payload| self.message(payload))
            .collect();
        self.broker.publish_batch(messages)
    }
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("kind", &self.config.kind)
            .finish()
    }
}
