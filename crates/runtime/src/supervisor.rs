//! Supervisor - owns the agent cohort
//!
//! Registers agents with the broker, starts them as a group (one failure
//! never blocks the others), reacts to fault notices and stops everything
//! with a bounded timeout. Status changes are broadcast as `SYSTEM_STATUS`
//! and `AGENT_STATUS` messages sent as [`SUPERVISOR_ID`].

use crate::agent::{Agent, AgentFactory};
use crate::config::{AgentConfig, MAX_INTERVAL};
use crate::error::{AgentError, SupervisorError};
use crate::lifecycle::{AgentState, Operation};
use crate::runner::{AgentRunner, AgentSnapshot, FaultNotice, StopOutcome};
use chrono::{DateTime, Utc};
use ftba_broker::{Broker, BrokerError, BrokerStats};
use ftba_core::{AgentId, AgentStatus, Message, MessageId, SystemState, SystemStatus};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sender id used for supervisor broadcasts
pub const SUPERVISOR_ID: &str = "supervisor";

/// Supervisor policy
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Replace a faulted agent with a fresh instance under the same id
    pub restart_on_fault: bool,
    /// Restarts allowed per agent when `restart_on_fault` is set
    pub max_restarts: u32,
    /// Fault records kept for status reports
    pub fault_history: usize,
    /// Period of the health log line in `run_until`
    pub health_interval: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_on_fault: false,
            max_restarts: 3,
            fault_history: 100,
            health_interval: None,
        }
    }
}

/// One observed fault
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultRecord {
    pub agent_id: AgentId,
    pub operation: Operation,
    pub error: String,
    pub message_id: Option<MessageId>,
    pub at: DateTime<Utc>,
}

impl FaultRecord {
    fn from_error(error: &AgentError, message_id: Option<MessageId>, at: DateTime<Utc>) -> Self {
        let (operation, detail) = match error {
            AgentError::Setup { reason, .. } => (Operation::Setup, reason.clone()),
            AgentError::Processing {
                operation, reason, ..
            } => (*operation, reason.clone()),
            other => (Operation::Setup, other.to_string()),
        };
        Self {
            agent_id: error.agent_id().to_string(),
            operation,
            error: detail,
            message_id,
            at,
        }
    }
}

/// Result of [`Supervisor::start_all`]
#[derive(Debug, Default)]
pub struct StartupReport {
    pub started: Vec<AgentId>,
    pub failed: Vec<AgentError>,
}

impl StartupReport {
    /// True when every agent started
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of [`Supervisor::stop_all`]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stopped: Vec<AgentId>,
    pub faulted: Vec<AgentId>,
    pub abandoned: Vec<AgentId>,
}

impl ShutdownReport {
    /// True when no agent had to be abandoned
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Agent snapshot plus supervision data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReport {
    #[serde(flatten)]
    pub snapshot: AgentSnapshot,
    pub restarts: u32,
}

/// Whole-system status
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub agents: Vec<AgentReport>,
    /// Oldest first
    pub faults: Vec<FaultRecord>,
    pub broker: BrokerStats,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentReport> {
        self.agents.iter().find(|a| a.snapshot.agent_id == agent_id)
    }

    pub fn faulted(&self) -> Vec<&AgentReport> {
        self.agents
            .iter()
            .filter(|a| a.snapshot.state == AgentState::Faulted)
            .collect()
    }

    pub fn running(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| a.snapshot.state == AgentState::Running)
            .count()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} agent(s), {} running | broker: published={} delivered={} failed={} evicted={}",
            self.agents.len(),
            self.running(),
            self.broker.published,
            self.broker.delivered,
            self.broker.failed,
            self.broker.evicted
        )?;
        for agent in &self.agents {
            let s = &agent.snapshot;
            write!(
                f,
                "  {:<24} {:<9} cycles={:<6} messages={:<6} restarts={}",
                s.agent_id, s.state, s.cycles, s.messages_handled, agent.restarts
            )?;
            if let Some(fault) = &s.last_fault {
                write!(f, " last_fault={}", fault)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

struct ManagedAgent {
    config: Arc<AgentConfig>,
    factory: AgentFactory,
    runner: AgentRunner,
    restarts: u32,
}

/// Owns every agent of one system
pub struct Supervisor {
    broker: Arc<Broker>,
    config: SupervisorConfig,
    agents: Vec<ManagedAgent>,
    fault_tx: mpsc::UnboundedSender<FaultNotice>,
    fault_rx: mpsc::UnboundedReceiver<FaultNotice>,
    faults: VecDeque<FaultRecord>,
}

impl Supervisor {
    pub fn new(broker: Arc<Broker>, config: SupervisorConfig) -> Self {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            config,
            agents: Vec::new(),
            fault_tx,
            fault_rx,
            faults: VecDeque::new(),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Ids in registration order
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .map(|m| m.runner.id().to_string())
            .collect()
    }

    pub fn agent_state(&self, agent_id: &str) -> Option<AgentState> {
        self.find(agent_id).map(|i| self.agents[i].runner.state())
    }

    /// Build an agent and register it with the broker
    ///
    /// The factory is kept for restarts. Duplicate ids fail here.
    pub fn add_agent<F>(&mut self, config: AgentConfig, factory: F) -> Result<(), SupervisorError>
    where
        F: Fn(&AgentConfig) -> anyhow::Result<Box<dyn Agent>> + Send + Sync + 'static,
    {
        // Broadcasts are never delivered back to their sender
        if config.agent_id == SUPERVISOR_ID {
            return Err(SupervisorError::ReservedId(config.agent_id));
        }
        if self.find(&config.agent_id).is_some() {
            let duplicate = BrokerError::DuplicateAgent(config.agent_id.clone());
            return Err(AgentError::from(duplicate).into());
        }

        let config = Arc::new(config);
        let factory: AgentFactory = Box::new(factory);
        let runner = self.build_runner(&config, &factory)?;

        log::info!(
            "[{}] Added agent {} ({})",
            SUPERVISOR_ID,
            config.agent_id,
            runner.name()
        );
        self.agents.push(ManagedAgent {
            config,
            factory,
            runner,
            restarts: 0,
        });
        Ok(())
    }

    /// Start every agent that has not been started yet
    pub async fn start_all(&mut self) -> StartupReport {
        self.publish_system(
            SystemState::Starting,
            format!("starting {} agent(s)", self.agents.len()),
        );

        let mut report = StartupReport::default();
        for managed in &mut self.agents {
            if managed.runner.state() != AgentState::Created {
                continue;
            }
            match managed.runner.start().await {
                Ok(()) => report.started.push(managed.runner.id().to_string()),
                Err(e) => {
                    log::error!("[{}] {}", SUPERVISOR_ID, e);
                    report.failed.push(e);
                }
            }
        }

        let now = Utc::now();
        for error in &report.failed {
            self.record_fault(FaultRecord::from_error(error, None, now));
        }

        let state = if report.is_complete() {
            SystemState::Running
        } else {
            SystemState::Degraded
        };
        let detail = format!(
            "{} agent(s) started, {} failed",
            report.started.len(),
            report.failed.len()
        );
        log::info!("[{}] {}", SUPERVISOR_ID, detail);
        self.publish_system(state, detail);
        report
    }

    /// Stop every agent concurrently, abandoning stragglers after `timeout`
    pub async fn stop_all(&mut self, timeout: Duration) -> ShutdownReport {
        self.publish_system(SystemState::ShuttingDown, "shutdown requested");
        log::info!(
            "[{}] Stopping {} agent(s) (timeout {:?})",
            SUPERVISOR_ID,
            self.agents.len(),
            timeout
        );

        let outcomes = futures_util::future::join_all(self.agents.iter_mut().map(|m| async move {
            let outcome = m.runner.stop(timeout).await;
            (m.runner.id().to_string(), outcome)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (agent_id, outcome) in outcomes {
            match outcome {
                StopOutcome::Stopped => report.stopped.push(agent_id),
                StopOutcome::Faulted => report.faulted.push(agent_id),
                StopOutcome::Abandoned => {
                    log::warn!("[{}] Abandoned agent {}", SUPERVISOR_ID, agent_id);
                    report.abandoned.push(agent_id);
                }
            }
        }

        // Faults raised during shutdown are recorded but never restarted
        while let Ok(notice) = self.fault_rx.try_recv() {
            self.record_notice(&notice);
        }

        log::info!(
            "[{}] Shutdown complete: {} stopped, {} faulted, {} abandoned",
            SUPERVISOR_ID,
            report.stopped.len(),
            report.faulted.len(),
            report.abandoned.len()
        );
        report
    }

    /// Stop a single agent
    pub async fn stop_agent(
        &mut self,
        agent_id: &str,
        timeout: Duration,
    ) -> Result<StopOutcome, SupervisorError> {
        let index = self
            .find(agent_id)
            .ok_or_else(|| SupervisorError::UnknownAgent(agent_id.to_string()))?;
        let outcome = self.agents[index].runner.stop(timeout).await;
        self.publish_agent_status(index, None);
        Ok(outcome)
    }

    /// Handle fault notices until `shutdown` completes
    ///
    /// Does not stop the agents; call [`stop_all`](Self::stop_all) afterwards.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut health = self.config.health_interval.map(|period| {
            let period = period.clamp(Duration::from_millis(1), MAX_INTERVAL);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("[{}] Shutdown signal received", SUPERVISOR_ID);
                    break;
                }

                Some(notice) = self.fault_rx.recv() => {
                    self.handle_fault(notice).await;
                }

                _ = async {
                    match health.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    log::info!("[{}] Health\n{}", SUPERVISOR_ID, self.status_report());
                }
            }
        }
    }

    /// Wait for the next fault notice, apply the crash policy and return its record
    pub async fn next_fault(&mut self) -> Option<FaultRecord> {
        let notice = self.fault_rx.recv().await?;
        let record = FaultRecord::from_error(&notice.error, notice.message_id, notice.at);
        self.handle_fault(notice).await;
        Some(record)
    }

    /// Fault records, oldest first
    pub fn fault_history(&self) -> impl Iterator<Item = &FaultRecord> {
        self.faults.iter()
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            agents: self
                .agents
                .iter()
                .map(|m| AgentReport {
                    snapshot: m.runner.snapshot(),
                    restarts: m.restarts,
                })
                .collect(),
            faults: self.faults.iter().cloned().collect(),
            broker: self.broker.stats(),
            generated_at: Utc::now(),
        }
    }

    async fn handle_fault(&mut self, notice: FaultNotice) {
        self.record_notice(&notice);
        let Some(index) = self.find(&notice.agent_id) else {
            return;
        };
        self.publish_agent_status(index, Some(notice.error.to_string()));

        let restarts = self.agents[index].restarts;
        if !self.config.restart_on_fault {
            self.publish_system(
                SystemState::Degraded,
                format!("agent {} faulted", notice.agent_id),
            );
            return;
        }
        if restarts >= self.config.max_restarts {
            log::warn!(
                "[{}] Agent {} reached its restart limit ({})",
                SUPERVISOR_ID,
                notice.agent_id,
                self.config.max_restarts
            );
            self.publish_system(
                SystemState::Degraded,
                format!("agent {} faulted, restart limit reached", notice.agent_id),
            );
            return;
        }

        self.restart(index).await;
    }

    async fn restart(&mut self, index: usize) {
        let agent_id = self.agents[index].config.agent_id.clone();
        let mut runner = match self.build_runner(&self.agents[index].config, &self.agents[index].factory) {
            Ok(runner) => runner,
            Err(e) => {
                log::error!("[{}] Cannot rebuild {}: {}", SUPERVISOR_ID, agent_id, e);
                return;
            }
        };

        let result = runner.start().await;
        let managed = &mut self.agents[index];
        managed.restarts += 1;
        managed.runner = runner;

        match result {
            Ok(()) => {
                log::info!(
                    "[{}] Restarted {} ({}/{})",
                    SUPERVISOR_ID,
                    agent_id,
                    managed.restarts,
                    self.config.max_restarts
                );
                self.publish_agent_status(index, Some("restarted".to_string()));
            }
            Err(e) => {
                log::error!("[{}] Restart of {} failed: {}", SUPERVISOR_ID, agent_id, e);
                self.record_fault(FaultRecord::from_error(&e, None, Utc::now()));
                self.publish_agent_status(index, Some(e.to_string()));
            }
        }
    }

    fn build_runner(
        &self,
        config: &Arc<AgentConfig>,
        factory: &AgentFactory,
    ) -> Result<AgentRunner, SupervisorError> {
        let agent = factory(config).map_err(|e| SupervisorError::Factory {
            agent_id: config.agent_id.clone(),
            reason: format!("{e:#}"),
        })?;
        let runner = AgentRunner::new(agent, config.clone(), self.broker.clone())?;
        Ok(runner.with_fault_channel(self.fault_tx.clone()))
    }

    fn find(&self, agent_id: &str) -> Option<usize> {
        self.agents.iter().position(|m| m.runner.id() == agent_id)
    }

    fn record_notice(&mut self, notice: &FaultNotice) {
        log::error!(
            "[{}] Agent {} faulted: {}",
            SUPERVISOR_ID,
            notice.agent_id,
            notice.error
        );
        self.record_fault(FaultRecord::from_error(
            &notice.error,
            notice.message_id,
            notice.at,
        ));
    }

    fn record_fault(&mut self, record: FaultRecord) {
        self.faults.push_back(record);
        while self.faults.len() > self.config.fault_history {
            self.faults.pop_front();
        }
    }

    fn publish_system(&self, state: SystemState, detail: impl Into<String>) {
        let status = SystemStatus::new(state, detail);
        self.broker
            .publish(Message::new(SUPERVISOR_ID, status.into()));
    }

    fn publish_agent_status(&self, index: usize, detail: Option<String>) {
        let managed = &self.agents[index];
        let status = AgentStatus {
            agent_id: managed.runner.id().to_string(),
            state: managed.runner.state().as_str().to_string(),
            detail,
            restarts: managed.restarts,
            timestamp: Utc::now(),
        };
        self.broker
            .publish(Message::new(SUPERVISOR_ID, status.into()));
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("agents", &self.agent_ids())
            .field("faults", &self.faults.len())
            .finish()
    }
}
