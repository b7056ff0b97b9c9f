//! Type-based routing hub
//!
//! Routing tables are the only state shared between agents. Lock order is
//! always `mailboxes` then `subscriptions`; publishing takes them one at a
//! time and never holds both.

use crate::error::{BrokerError, DeliveryError};
use crate::mailbox::{Enqueued, Mailbox, MailboxConfig, MailboxWriter};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ftba_core::{AgentId, Message, MessageType};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a publish call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// One entry per enqueued copy, in delivery order
    pub delivered: Vec<AgentId>,
    pub errors: Vec<DeliveryError>,
}

impl PublishReport {
    pub fn delivered_to(&self, agent_id: &str) -> bool {
        self.delivered.iter().any(|id| id == agent_id)
    }

    pub fn delivery_count(&self) -> usize {
        self.delivered.len()
    }

    /// True when every target received the message without incident
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Snapshot of broker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub registered_agents: usize,
    /// Messages handed to `publish`/`publish_batch`
    pub published: u64,
    /// Copies enqueued into mailboxes
    pub delivered: u64,
    /// Copies that never reached a mailbox
    pub failed: u64,
    /// Queued copies evicted by a drop-oldest mailbox
    pub evicted: u64,
}

/// In-process publish/subscribe broker
///
/// Constructed once and shared as `Arc<Broker>`; every operation takes
/// `&self` and may be called from any task.
pub struct Broker {
    mailbox_config: MailboxConfig,
    mailboxes: DashMap<AgentId, MailboxWriter>,
    subscriptions: DashMap<MessageType, BTreeSet<AgentId>>,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

impl Broker {
    /// Broker with unbounded mailboxes
    pub fn new() -> Self {
        Self::with_mailbox_config(MailboxConfig::default())
    }

    pub fn with_mailbox_config(mailbox_config: MailboxConfig) -> Self {
        Self {
            mailbox_config,
            mailboxes: DashMap::new(),
            subscriptions: DashMap::new(),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn mailbox_config(&self) -> MailboxConfig {
        self.mailbox_config
    }

    /// Add an agent with an empty subscription set and return its mailbox
    pub fn register(&self, agent_id: impl Into<AgentId>) -> Result<Mailbox, BrokerError> {
        let agent_id = agent_id.into();
        match self.mailboxes.entry(agent_id.clone()) {
            Entry::Occupied(_) => Err(BrokerError::DuplicateAgent(agent_id)),
            Entry::Vacant(slot) => {
                let (writer, mailbox) = Mailbox::channel(agent_id.clone(), self.mailbox_config);
                slot.insert(writer);
                log::info!("[broker] Registered agent {}", agent_id);
                Ok(mailbox)
            }
        }
    }

    /// Add message types to an agent's subscription set. Idempotent.
    pub fn subscribe<I>(&self, agent_id: &str, message_types: I) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = MessageType>,
    {
        // Holding the mailbox guard keeps a concurrent unregister from
        // leaving a stale subscription behind.
        let _registered = self
            .mailboxes
            .get(agent_id)
            .ok_or_else(|| BrokerError::UnknownAgent(agent_id.to_string()))?;

        for message_type in message_types {
            let added = self
                .subscriptions
                .entry(message_type.clone())
                .or_default()
                .insert(agent_id.to_string());
            if added {
                log::debug!("[broker] {} subscribed to {}", agent_id, message_type);
            }
        }
        Ok(())
    }

    /// Remove message types from an agent's subscription set
    pub fn unsubscribe<I>(&self, agent_id: &str, message_types: I) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = MessageType>,
    {
        let _registered = self
            .mailboxes
            .get(agent_id)
            .ok_or_else(|| BrokerError::UnknownAgent(agent_id.to_string()))?;

        for message_type in message_types {
            if let Some(mut subscribers) = self.subscriptions.get_mut(&message_type)
                && subscribers.remove(agent_id)
            {
                log::debug!("[broker] {} unsubscribed from {}", agent_id, message_type);
            }
        }
        Ok(())
    }

    /// Remove an agent from routing and close its mailbox.
    ///
    /// Messages already queued stay available to the mailbox holder.
    pub fn unregister(&self, agent_id: &str) -> Result<(), BrokerError> {
        let Entry::Occupied(entry) = self.mailboxes.entry(agent_id.to_string()) else {
            return Err(BrokerError::UnknownAgent(agent_id.to_string()));
        };

        for mut subscribers in self.subscriptions.iter_mut() {
            subscribers.value_mut().remove(agent_id);
        }
        let (_, writer) = entry.remove_entry();
        writer.close();

        log::info!("[broker] Unregistered agent {}", agent_id);
        Ok(())
    }

    /// Route one message to its directed recipients or type subscribers
    pub fn publish(&self, message: Message) -> PublishReport {
        self.publish_shared(Arc::new(message))
    }

    /// Same as [`publish`](Self::publish) for a message that is already shared
    pub fn publish_shared(&self, message: Arc<Message>) -> PublishReport {
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut report = PublishReport::default();
        for (agent_id, writer) in self.route(&message, &mut report) {
            let result = writer.push(message.clone());
            self.record(agent_id, result, &mut report);
        }

        log::debug!(
            "[broker] {} from {} delivered to {} mailbox(es)",
            message.message_type(),
            message.sender(),
            report.delivery_count()
        );
        report
    }

    /// Publish several messages with one enqueue per destination mailbox.
    ///
    /// Deliveries match publishing each message in order; per-mailbox
    /// order follows batch order.
    pub fn publish_batch<I>(&self, messages: I) -> PublishReport
    where
        I: IntoIterator<Item = Message>,
    {
        let mut report = PublishReport::default();
        let mut slots: HashMap<AgentId, usize> = HashMap::new();
        let mut groups: Vec<(AgentId, MailboxWriter, Vec<Arc<Message>>)> = Vec::new();
        let mut count = 0u64;

        for message in messages {
            count += 1;
            let message = Arc::new(message);
            for (agent_id, writer) in self.route(&message, &mut report) {
                match slots.get(&agent_id) {
                    Some(&slot) => groups[slot].2.push(message.clone()),
                    None => {
                        slots.insert(agent_id.clone(), groups.len());
                        groups.push((agent_id, writer, vec![message.clone()]));
                    }
                }
            }
        }
        self.published.fetch_add(count, Ordering::Relaxed);

        for (agent_id, writer, batch) in groups {
            for result in writer.push_all(batch) {
                self.record(agent_id.clone(), result, &mut report);
            }
        }

        log::debug!(
            "[broker] Batch of {} message(s) produced {} deliveries",
            count,
            report.delivery_count()
        );
        report
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }

    /// Sorted ids of every registered agent
    pub fn registered_agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Message types the agent is currently subscribed to
    pub fn subscriptions_of(&self, agent_id: &str) -> BTreeSet<MessageType> {
        self.subscriptions
            .iter()
            .filter(|entry| entry.value().contains(agent_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Agents currently subscribed to `message_type`
    pub fn subscribers_of(&self, message_type: &MessageType) -> BTreeSet<AgentId> {
        self.subscriptions
            .get(message_type)
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            registered_agents: self.mailboxes.len(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Resolve target mailboxes for one message
    fn route(
        &self,
        message: &Message,
        report: &mut PublishReport,
    ) -> Vec<(AgentId, MailboxWriter)> {
        if !message.is_broadcast() {
            let mut targets = Vec::with_capacity(message.recipients().len());
            for recipient in message.recipients() {
                match self.mailboxes.get(recipient) {
                    Some(writer) => targets.push((recipient.clone(), writer.clone())),
                    None => {
                        let error = DeliveryError::UnknownRecipient {
                            agent_id: recipient.clone(),
                            message_id: message.id(),
                        };
                        log::warn!("[broker] {}", error);
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        report.errors.push(error);
                    }
                }
            }
            return targets;
        }

        // Snapshot, so the subscription guard is released before any
        // mailbox lookup.
        let subscribers = self.subscribers_of(&message.message_type());
        subscribers
            .into_iter()
            .filter(|agent_id| agent_id != message.sender())
            .filter_map(|agent_id| {
                // Unregistered since the snapshot
                let writer = self.mailboxes.get(&agent_id)?.clone();
                Some((agent_id, writer))
            })
            .collect()
    }

    fn record(
        &self,
        agent_id: AgentId,
        result: Result<Enqueued, DeliveryError>,
        report: &mut PublishReport,
    ) {
        match result {
            Ok(Enqueued::Queued) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                report.delivered.push(agent_id);
            }
            Ok(Enqueued::Evicted(evicted)) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.evicted.fetch_add(1, Ordering::Relaxed);
                let error = DeliveryError::Evicted {
                    agent_id: agent_id.clone(),
                    evicted,
                };
                log::warn!("[broker] {}", error);
                report.delivered.push(agent_id);
                report.errors.push(error);
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("[broker] {}", error);
                report.errors.push(error);
            }
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("mailbox_config", &self.mailbox_config)
            .field("stats", &self.stats())
            .finish()
    }
}
