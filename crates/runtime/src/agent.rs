//! Agent capability trait
//!
//! Every concrete agent implements the same four hooks. The runtime calls
//! them from a single task per agent, so hooks of one agent never run
//! concurrently and `&mut self` is all the synchronisation agent state needs.

use crate::config::AgentConfig;
use crate::context::AgentContext;
use async_trait::async_trait;
use ftba_core::Message;

/// A unit of periodic domain logic plus reactive message handling
///
/// Errors (and panics) from any hook are caught by the runner and move the
/// agent to `FAULTED`; they never reach other agents.
#[async_trait]
pub trait Agent: Send {
    /// Implementation name for logs and status reports
    fn name(&self) -> &str;

    /// One-time initialisation, typically subscribing through `ctx`.
    ///
    /// Runs before any message is consumed. `cleanup` still runs if this fails.
    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()>;

    /// One iteration of autonomous work, invoked every configured interval
    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()>;

    /// Invoked once per mailbox message, in arrival order
    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message)
    -> anyhow::Result<()>;

    /// Release held resources. Called exactly once per started agent.
    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()>;
}

/// Builds a fresh agent instance from its configuration
///
/// The supervisor keeps the factory so it can restart a faulted agent with
/// new state under the same id.
pub type AgentFactory =
    Box<dyn Fn(&AgentConfig) -> anyhow::Result<Box<dyn Agent>> + Send + Sync>;
