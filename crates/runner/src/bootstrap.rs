//! Bootstrap - Turn a [`SystemConfig`] into a running system
//!
//! Creates the broker with the configured mailbox policy, a single
//! simulated market shared by every agent that trades, and a supervisor
//! holding one agent per enabled configuration entry.

use crate::config::{ConfigError, SystemConfig};
use ftba_agents::{MarketConfig, SimulatedGateway, TradingGateway};
use ftba_broker::Broker;
use ftba_runtime::{ShutdownReport, StartupReport, StatusReport, Supervisor, SupervisorError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Broker, market and supervised agents built from one configuration
pub struct TradingSystem {
    config: SystemConfig,
    broker: Arc<Broker>,
    gateway: Arc<SimulatedGateway>,
    supervisor: Supervisor,
}

impl TradingSystem {
    /// Validate `config` and assemble the system without starting any agent
    pub fn build(config: SystemConfig) -> Result<Self, BootstrapError> {
        config.validate()?;

        let broker = Arc::new(Broker::with_mailbox_config(config.system.mailbox));
        let gateway = Arc::new(SimulatedGateway::new(config.market.clone()));
        let shared: Arc<dyn TradingGateway> = gateway.clone();

        let mut supervisor = Supervisor::new(broker.clone(), config.supervisor_config());
        for agent in config.enabled_agents() {
            log::info!("Adding agent {} ({})", agent.agent_id, agent.kind);
            supervisor.add_agent(agent.clone(), ftba_agents::factory(shared.clone()))?;
        }

        let disabled = config.agents.len() - supervisor.agent_ids().len();
        if disabled > 0 {
            log::info!("{} agent(s) disabled by configuration", disabled);
        }

        Ok(Self {
            config,
            broker,
            gateway,
            supervisor,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// The simulated market, for driving prices from tests
    pub fn market(&self) -> &Arc<SimulatedGateway> {
        &self.gateway
    }

    pub fn market_config(&self) -> &MarketConfig {
        self.gateway.config()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn start(&mut self) -> StartupReport {
        let report = self.supervisor.start_all().await;
        for error in &report.failed {
            log::warn!("Running degraded: {}", error);
        }
        report
    }

    /// Supervise until `shutdown` completes, then stop every agent
    /// within the configured shutdown timeout
    pub async fn run_until<F>(&mut self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        self.supervisor.run_until(shutdown).await;
        let report = self.supervisor.stop_all(self.config.shutdown_timeout()).await;
        log::info!("Final status\n{}", self.supervisor.status_report());
        report
    }

    pub fn status_report(&self) -> StatusReport {
        self.supervisor.status_report()
    }
}
