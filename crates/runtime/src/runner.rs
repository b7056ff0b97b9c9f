//! Agent Runner - drives one agent through its lifecycle
//!
//! Each started agent gets exactly one tokio task that multiplexes:
//! - the stop signal (always checked first)
//! - the processing-cycle interval
//! - the agent's mailbox
//!
//! Because a single task owns the agent, `process_cycle` and
//! `handle_message` can interleave only between invocations.

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::lifecycle::{AgentState, Lifecycle, Operation};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use ftba_broker::{Broker, Mailbox};
use ftba_core::{AgentId, Message, MessageId};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Sent to the supervisor when a running agent faults
#[derive(Debug, Clone)]
pub struct FaultNotice {
    pub agent_id: AgentId,
    pub error: AgentError,
    /// Message being handled when the fault happened
    pub message_id: Option<MessageId>,
    pub at: DateTime<Utc>,
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    /// Already faulted before (or while) stopping
    Faulted,
    /// Did not stop within the timeout; its task was aborted
    Abandoned,
}

/// Point-in-time view of one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub name: String,
    pub kind: String,
    pub state: AgentState,
    pub cycles: u64,
    pub messages_handled: u64,
    pub last_operation: Option<Operation>,
    pub last_fault: Option<String>,
    pub abandoned: bool,
}

#[derive(Default)]
struct AgentMetrics {
    cycles: AtomicU64,
    messages_handled: AtomicU64,
    last_operation: Mutex<Option<Operation>>,
    last_fault: Mutex<Option<String>>,
}

impl AgentMetrics {
    fn begin(&self, operation: Operation) {
        *self.last_operation.lock() = Some(operation);
    }

    fn record_fault(&self, reason: &str) {
        *self.last_fault.lock() = Some(reason.to_string());
    }
}

/// Owns one agent from registration to a terminal state
pub struct AgentRunner {
    agent_id: AgentId,
    name: String,
    broker: Arc<Broker>,
    config: Arc<AgentConfig>,
    lifecycle: Lifecycle,
    metrics: Arc<AgentMetrics>,
    /// Agent and mailbox until `start` hands them to the task
    pending: Option<(Box<dyn Agent>, Mailbox)>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    faults: Option<mpsc::UnboundedSender<FaultNotice>>,
    abandoned: bool,
}

impl AgentRunner {
    /// Register `config.agent_id` with the broker and wrap `agent`
    ///
    /// Fails synchronously with [`BrokerError::DuplicateAgent`](ftba_broker::BrokerError)
    /// if the id is taken.
    pub fn new(
        agent: Box<dyn Agent>,
        config: Arc<AgentConfig>,
        broker: Arc<Broker>,
    ) -> Result<Self, AgentError> {
        let agent_id = config.agent_id.clone();
        let mailbox = broker.register(agent_id.clone())?;
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            name: agent.name().to_string(),
            lifecycle: Lifecycle::new(agent_id.clone()),
            agent_id,
            broker,
            config,
            metrics: Arc::new(AgentMetrics::default()),
            pending: Some((agent, mailbox)),
            stop_tx,
            task: None,
            faults: None,
            abandoned: false,
        })
    }

    /// Report faults of the running agent on `faults`
    pub fn with_fault_channel(mut self, faults: mpsc::UnboundedSender<FaultNotice>) -> Self {
        self.faults = Some(faults);
        self
    }

    pub fn id(&self) -> &str {
        &self.agent_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        self.lifecycle.current()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.lifecycle.watch()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.agent_id.clone(),
            name: self.name.clone(),
            kind: self.config.kind.clone(),
            state: self.state(),
            cycles: self.metrics.cycles.load(Ordering::Relaxed),
            messages_handled: self.metrics.messages_handled.load(Ordering::Relaxed),
            last_operation: *self.metrics.last_operation.lock(),
            last_fault: self.metrics.last_fault.lock().clone(),
            abandoned: self.abandoned,
        }
    }

    /// Run `setup`, then spawn the agent task
    ///
    /// On setup failure the agent is cleaned up, unregistered and left
    /// `FAULTED`; the error is returned to the caller.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        if self.state() != AgentState::Created {
            return Err(AgentError::AlreadyStarted(self.agent_id.clone()));
        }
        let Some((mut agent, mailbox)) = self.pending.take() else {
            return Err(AgentError::AlreadyStarted(self.agent_id.clone()));
        };
        self.lifecycle.transition(AgentState::Setup);

        let ctx = AgentContext::new(
            self.agent_id.clone(),
            self.broker.clone(),
            self.config.clone(),
        );

        log::info!("[{}] Setting up {}", self.agent_id, self.name);
        self.metrics.begin(Operation::Setup);
        if let Err(err) = guarded(agent.setup(&ctx)).await {
            let reason = format!("{err:#}");
            log::error!("[{}] Setup failed: {}", self.agent_id, reason);
            self.metrics.record_fault(&reason);

            unregister(&self.broker, &self.agent_id);
            run_cleanup(agent.as_mut(), &ctx, &self.metrics).await;
            drop(agent);
            drop(mailbox);

            self.lifecycle.transition(AgentState::Faulted);
            return Err(AgentError::Setup {
                agent_id: self.agent_id.clone(),
                reason,
            });
        }

        self.lifecycle.transition(AgentState::Running);
        let task = AgentTask {
            agent,
            ctx,
            mailbox,
            lifecycle: self.lifecycle.clone(),
            metrics: self.metrics.clone(),
            stop_rx: self.stop_tx.subscribe(),
            faults: self.faults.clone(),
        };
        self.task = Some(tokio::spawn(task.run()));

        log::info!("[{}] Agent started", self.agent_id);
        Ok(())
    }

    /// Ask a running agent to stop without waiting
    ///
    /// Returns `false` if the agent was not running.
    pub fn signal_stop(&self) -> bool {
        if !self.lifecycle.transition(AgentState::Stopping) {
            return false;
        }
        log::info!("[{}] Stopping", self.agent_id);
        self.stop_tx.send_replace(true);
        true
    }

    /// Wait until the agent reaches `STOPPED` or `FAULTED`
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait_terminal(&self, timeout: Duration) -> Option<AgentState> {
        let mut state_rx = self.lifecycle.watch();
        match tokio::time::timeout(timeout, state_rx.wait_for(AgentState::is_terminal)).await {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) => Some(self.state()),
            Err(_) => None,
        }
    }

    /// Stop the agent, abandoning it if it has not stopped within `timeout`
    pub async fn stop(&mut self, timeout: Duration) -> StopOutcome {
        if self.state() == AgentState::Created {
            // Never started: nothing to clean up
            self.pending = None;
            unregister(&self.broker, &self.agent_id);
            self.lifecycle.transition(AgentState::Stopped);
            return StopOutcome::Stopped;
        }

        self.signal_stop();
        match self.wait_terminal(timeout).await {
            Some(AgentState::Faulted) => {
                self.join().await;
                StopOutcome::Faulted
            }
            Some(_) => {
                self.join().await;
                log::info!("[{}] Agent stopped", self.agent_id);
                StopOutcome::Stopped
            }
            None => {
                self.abandon();
                StopOutcome::Abandoned
            }
        }
    }

    /// Abort the agent task without running cleanup
    pub fn abandon(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.abandoned = true;
        unregister(&self.broker, &self.agent_id);
        log::warn!(
            "[{}] Abandoned in state {} (last operation: {:?})",
            self.agent_id,
            self.state(),
            *self.metrics.last_operation.lock()
        );
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            log::error!("[{}] Agent task ended abnormally: {}", self.agent_id, e);
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Why the agent loop ended
enum Exit {
    Stopped,
    MailboxClosed,
    Fault {
        operation: Operation,
        message: Option<Arc<Message>>,
        error: anyhow::Error,
    },
}

/// State moved into the spawned task
struct AgentTask {
    agent: Box<dyn Agent>,
    ctx: AgentContext,
    mailbox: Mailbox,
    lifecycle: Lifecycle,
    metrics: Arc<AgentMetrics>,
    stop_rx: watch::Receiver<bool>,
    faults: Option<mpsc::UnboundedSender<FaultNotice>>,
}

impl AgentTask {
    async fn run(mut self) {
        let exit = self.run_loop().await;
        let agent_id = self.ctx.id().to_string();

        // No further deliveries once the loop has exited
        drop(self.mailbox);
        unregister(self.ctx.broker(), &agent_id);

        let mut notice = None;
        match exit {
            Exit::Stopped => {
                self.lifecycle.transition(AgentState::Stopping);
            }
            Exit::MailboxClosed => {
                log::warn!("[{}] Mailbox closed, stopping", agent_id);
                self.lifecycle.transition(AgentState::Stopping);
            }
            Exit::Fault {
                operation,
                message,
                error,
            } => {
                let reason = format!("{error:#}");
                self.metrics.record_fault(&reason);
                match &message {
                    Some(m) => log::error!(
                        "[{}] {} failed on message {} ({} from {}): {}",
                        agent_id,
                        operation,
                        m.id(),
                        m.message_type(),
                        m.sender(),
                        reason
                    ),
                    None => log::error!("[{}] {} failed: {}", agent_id, operation, reason),
                }

                // A failure while already stopping still ends in STOPPED
                if self.lifecycle.current() != AgentState::Stopping {
                    notice = Some(FaultNotice {
                        agent_id: agent_id.clone(),
                        error: AgentError::Processing {
                            agent_id: agent_id.clone(),
                            operation,
                            reason,
                        },
                        message_id: message.map(|m| m.id()),
                        at: Utc::now(),
                    });
                }
            }
        }

        // Decided before cleanup: a stop request arriving while cleanup runs
        // must not change how the agent ends
        let terminal = if notice.is_some() {
            AgentState::Faulted
        } else {
            AgentState::Stopped
        };

        run_cleanup(self.agent.as_mut(), &self.ctx, &self.metrics).await;
        drop(self.agent);

        if !self.lifecycle.transition(terminal) {
            log::warn!(
                "[{}] Could not enter {} from {}",
                agent_id,
                terminal,
                self.lifecycle.current()
            );
        }
        if let (Some(notice), Some(faults)) = (notice, &self.faults) {
            let _ = faults.send(notice);
        }
    }

    async fn run_loop(&mut self) -> Exit {
        let mut ticker = tokio::time::interval(self.ctx.config().interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *self.stop_rx.borrow_and_update() {
                return Exit::Stopped;
            }

            tokio::select! {
                biased;

                changed = self.stop_rx.changed() => {
                    // Sender gone means the runner was dropped
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return Exit::Stopped;
                    }
                }

                _ = ticker.tick() => {
                    self.metrics.begin(Operation::ProcessCycle);
                    if let Err(error) = guarded(self.agent.process_cycle(&self.ctx)).await {
                        return Exit::Fault { operation: Operation::ProcessCycle, message: None, error };
                    }
                    self.metrics.cycles.fetch_add(1, Ordering::Relaxed);
                }

                received = self.mailbox.recv() => {
                    let Some(message) = received else {
                        return Exit::MailboxClosed;
                    };
                    self.metrics.begin(Operation::HandleMessage);
                    if let Err(error) = guarded(self.agent.handle_message(&self.ctx, &message)).await {
                        return Exit::Fault { operation: Operation::HandleMessage, message: Some(message), error };
                    }
                    self.metrics.messages_handled.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Await a hook, turning a panic into an error
async fn guarded<F>(hook: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

async fn run_cleanup(agent: &mut dyn Agent, ctx: &AgentContext, metrics: &AgentMetrics) {
    metrics.begin(Operation::Cleanup);
    if let Err(err) = guarded(agent.cleanup(ctx)).await {
        log::error!("[{}] Cleanup failed: {:#}", ctx.id(), err);
    }
}

fn unregister(broker: &Broker, agent_id: &str) {
    // Already gone if the agent was unregistered elsewhere
    if broker.unregister(agent_id).is_err() {
        log::debug!("[{}] Already unregistered", agent_id);
    }
}
