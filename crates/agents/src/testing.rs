//! Test harness for driving agent hooks directly

use ftba_broker::{Broker, Mailbox};
use ftba_core::{Message, MessageType, Payload};
use ftba_runtime::{AgentConfig, AgentContext};
use std::sync::Arc;

/// Broker with the agent under test plus a tap subscribed to everything
pub(crate) struct Harness {
    pub ctx: AgentContext,
    pub broker: Arc<Broker>,
    pub tap: Mailbox,
    _own: Mailbox,
}

impl Harness {
    pub fn new(config: AgentConfig) -> Self {
        let broker = Arc::new(Broker::new());
        let own = broker.register(config.agent_id.clone()).unwrap();
        let tap = broker.register("tap").unwrap();
        broker.subscribe("tap", MessageType::FIXED).unwrap();

        let ctx = AgentContext::new(config.agent_id.clone(), broker.clone(), Arc::new(config));
        Self {
            ctx,
            broker,
            tap,
            _own: own,
        }
    }

    /// Also capture the given custom message kinds
    pub fn tap_custom<const N: usize>(&self, kinds: [&str; N]) {
        self.broker
            .subscribe("tap", kinds.map(MessageType::custom))
            .unwrap();
    }

    /// Payloads published since the last call
    pub fn published(&self) -> Vec<Payload> {
        self.tap
            .drain()
            .into_iter()
            .map(|message| message.payload().clone())
            .collect()
    }

    /// Messages published since the last call
    pub fn published_messages(&self) -> Vec<Arc<Message>> {
        self.tap.drain()
    }
}

/// Message as if sent by `sender`
pub(crate) fn inbound(sender: &str, payload: impl Into<Payload>) -> Message {
    Message::new(sender, payload.into())
}
