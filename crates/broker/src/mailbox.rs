//! Per-agent mailbox
//!
//! The write side ([`MailboxWriter`]) is held by the broker only; the read
//! side ([`Mailbox`]) is handed to the agent at registration and is not
//! cloneable, so each mailbox has exactly one consumer.

use crate::error::DeliveryError;
use ftba_core::{AgentId, Message, MessageId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// What to do when a bounded mailbox is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room
    #[default]
    DropOldest,
    /// Refuse the incoming message
    RejectNew,
}

/// Mailbox sizing, applied to every mailbox a broker creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// `None` means unbounded
    pub capacity: Option<usize>,
    /// Only consulted when `capacity` is set
    pub overflow: OverflowPolicy,
}

impl MailboxConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            capacity: Some(capacity),
            overflow,
        }
    }
}

/// Result of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Queued,
    /// Queued after evicting the given message
    Evicted(MessageId),
}

struct Queue {
    messages: VecDeque<Arc<Message>>,
    closed: bool,
}

struct Shared {
    owner: AgentId,
    config: MailboxConfig,
    queue: Mutex<Queue>,
    notify: Notify,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl Shared {
    /// Enqueue under an already held lock
    fn enqueue(&self, queue: &mut Queue, message: Arc<Message>) -> Result<Enqueued, DeliveryError> {
        if queue.closed {
            return Err(DeliveryError::MailboxClosed {
                agent_id: self.owner.clone(),
                message_id: message.id(),
            });
        }

        let mut outcome = Enqueued::Queued;
        if let Some(capacity) = self.config.capacity
            && queue.messages.len() >= capacity
        {
            match self.config.overflow {
                OverflowPolicy::RejectNew => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(DeliveryError::MailboxFull {
                        agent_id: self.owner.clone(),
                        capacity,
                        message_id: message.id(),
                    });
                }
                OverflowPolicy::DropOldest => {
                    if let Some(oldest) = queue.messages.pop_front() {
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                        outcome = Enqueued::Evicted(oldest.id());
                    }
                }
            }
        }

        queue.messages.push_back(message);
        Ok(outcome)
    }
}

/// Broker-side handle used to enqueue messages
#[derive(Clone)]
pub(crate) struct MailboxWriter {
    shared: Arc<Shared>,
}

impl MailboxWriter {
    pub(crate) fn push(&self, message: Arc<Message>) -> Result<Enqueued, DeliveryError> {
        let result = {
            let mut queue = self.shared.queue.lock();
            self.shared.enqueue(&mut queue, message)
        };
        if result.is_ok() {
            self.shared.notify.notify_one();
        }
        result
    }

    /// Enqueue several messages under one lock, in order
    pub(crate) fn push_all(
        &self,
        messages: Vec<Arc<Message>>,
    ) -> Vec<Result<Enqueued, DeliveryError>> {
        let results: Vec<_> = {
            let mut queue = self.shared.queue.lock();
            messages
                .into_iter()
                .map(|message| self.shared.enqueue(&mut queue, message))
                .collect()
        };
        if results.iter().any(Result::is_ok) {
            self.shared.notify.notify_one();
        }
        results
    }

    /// Stop accepting messages; queued ones stay drainable
    pub(crate) fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.notify.notify_one();
    }
}

/// Agent-side read handle
pub struct Mailbox {
    shared: Arc<Shared>,
}

impl Mailbox {
    /// Create a connected mailbox/writer pair
    pub(crate) fn channel(owner: AgentId, config: MailboxConfig) -> (MailboxWriter, Mailbox) {
        let shared = Arc::new(Shared {
            owner,
            config,
            queue: Mutex::new(Queue {
                messages: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });
        (
            MailboxWriter {
                shared: shared.clone(),
            },
            Mailbox { shared },
        )
    }

    /// Agent id this mailbox belongs to
    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the mailbox is closed and drained. Cancel-safe:
    /// a message is only removed from the queue by the poll that returns it.
    pub async fn recv(&self) -> Option<Arc<Message>> {
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if let Some(message) = queue.messages.pop_front() {
                    return Some(message);
                }
                if queue.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the next message without waiting
    pub fn try_recv(&self) -> Option<Arc<Message>> {
        self.shared.queue.lock().messages.pop_front()
    }

    /// Take every queued message, oldest first
    pub fn drain(&self) -> Vec<Arc<Message>> {
        self.shared.queue.lock().messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the owner has been unregistered
    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    pub fn config(&self) -> MailboxConfig {
        self.shared.config
    }

    /// Messages evicted by the drop-oldest policy so far
    pub fn evicted_count(&self) -> u64 {
        self.shared.evicted.load(Ordering::Relaxed)
    }

    /// Messages refused by the reject-new policy so far
    pub fn rejected_count(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("owner", &self.shared.owner)
            .field("len", &self.len())
            .finish()
    }
}
