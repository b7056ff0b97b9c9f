//! FTBA Broker
//!
//! Type-based publish/subscribe routing between agents of a single process.
//! Provides:
//! - Per-agent [`Mailbox`] (FIFO, written only by the broker, read only by its agent)
//! - Subscription index keyed by [`MessageType`](ftba_core::MessageType)
//! - Directed delivery through explicit recipient lists
//! - Batch publishing with per-destination ordering preserved
//!
//! ## Architecture
//!
//! ```text
//!   Agent A ──publish──┐
//!                      ▼
//!              ┌───────────────┐   subscriptions: TYPE → {agent ids}
//!              │    Broker     │   mailboxes:     agent id → writer
//!              └───────┬───────┘
//!        fan-out       │       (Arc<Message> shared, never copied)
//!         ┌────────────┼────────────┐
//!         ▼            ▼            ▼
//!    ┌─────────┐  ┌─────────┐  ┌─────────┐
//!    │Mailbox B│  │Mailbox C│  │Mailbox D│
//!    └────┬────┘  └────┬────┘  └────┬────┘
//!         ▼            ▼            ▼
//!      Agent B      Agent C      Agent D
//! ```
//!
//! ## Delivery guarantees
//!
//! Within one run every registered agent receives each message it is entitled
//! to exactly once, in publish order relative to other messages for the same
//! agent. There is no total order across mailboxes. Publishing never waits
//! on a consumer; see [`MailboxConfig`] for the overflow policy.

pub mod broker;
pub mod error;
pub mod mailbox;

// Re-export main types
pub use broker::{Broker, BrokerStats, PublishReport};
pub use error::{BrokerError, DeliveryError};
pub use mailbox::{Mailbox, MailboxConfig, OverflowPolicy};
