//! System configuration file
//!
//! One JSON document with three sections:
//! - `system`: logging, shutdown deadline, restart policy, mailbox sizing
//! - `market`: simulated market symbols, prices, seed and slippage
//! - `agents`: map of agent id to [`AgentConfig`]
//!
//! Every section has defaults, so `{}` is a complete configuration that
//! runs one agent of every kind.

use ftba_agents::{AgentKind, MarketConfig};
use ftba_broker::MailboxConfig;
use ftba_core::AgentId;
use ftba_runtime::{AgentConfig, MAX_INTERVAL, SUPERVISOR_ID, SupervisorConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for `shutdown_timeout_secs`
const MAX_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid system config: {0}")]
    InvalidSystem(String),

    #[error("Invalid market config: {0}")]
    InvalidMarket(String),

    #[error("Invalid config for agent '{agent_id}': {reason}")]
    InvalidAgent { agent_id: AgentId, reason: String },
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub system: SystemSection,

    #[serde(default)]
    pub market: MarketConfig,

    /// Agents keyed by id
    #[serde(default = "default_agents")]
    pub agents: BTreeMap<AgentId, AgentConfig>,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSection {
    /// Used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deadline for all agents to stop
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: f64,

    #[serde(default)]
    pub restart_on_fault: bool,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Period of the health report log line (absent disables it)
    #[serde(default)]
    pub health_interval_secs: Option<f64>,

    #[serde(default)]
    pub mailbox: MailboxConfig,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            restart_on_fault: false,
            max_restarts: default_max_restarts(),
            health_interval_secs: None,
            mailbox: MailboxConfig::default(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            system: SystemSection::default(),
            market: MarketConfig::default(),
            agents: default_agents(),
        }
    }
}

impl SystemConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: SystemConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.assign_agent_ids()?;
        config.validate()?;
        Ok(config)
    }

    /// Fill missing `agent_id`s from their map keys
    fn assign_agent_ids(&mut self) -> Result<(), ConfigError> {
        for (key, agent) in self.agents.iter_mut() {
            if agent.agent_id.is_empty() {
                agent.agent_id = key.clone();
            } else if agent.agent_id != *key {
                return Err(ConfigError::InvalidAgent {
                    agent_id: key.clone(),
                    reason: format!("agent_id '{}' does not match its key", agent.agent_id),
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let system = &self.system;
        if system.log_level.parse::<LevelFilter>().is_err() {
            return Err(ConfigError::InvalidSystem(format!(
                "unknown log level '{}'",
                system.log_level
            )));
        }
        if !within(system.shutdown_timeout_secs, MAX_SHUTDOWN_TIMEOUT) {
            return Err(ConfigError::InvalidSystem(format!(
                "shutdown_timeout_secs must be positive and at most {}",
                MAX_SHUTDOWN_TIMEOUT.as_secs()
            )));
        }
        if let Some(secs) = system.health_interval_secs
            && !within(secs, MAX_INTERVAL)
        {
            return Err(ConfigError::InvalidSystem(format!(
                "health_interval_secs must be positive and at most {}",
                MAX_INTERVAL.as_secs()
            )));
        }
        if system.mailbox.capacity == Some(0) {
            return Err(ConfigError::InvalidSystem(
                "mailbox capacity must be greater than zero".to_string(),
            ));
        }

        let market = &self.market;
        let unpriced = market.unpriced_symbols();
        if !unpriced.is_empty() {
            return Err(ConfigError::InvalidMarket(format!(
                "no initial price for {}",
                unpriced.join(", ")
            )));
        }
        if !(market.volatility.is_finite() && market.volatility >= 0.0) {
            return Err(ConfigError::InvalidMarket(
                "volatility must be a non-negative number".to_string(),
            ));
        }
        if market.spread.is_sign_negative() || market.slippage.is_sign_negative() {
            return Err(ConfigError::InvalidMarket(
                "spread and slippage must not be negative".to_string(),
            ));
        }

        for (agent_id, agent) in &self.agents {
            let invalid = |reason: String| ConfigError::InvalidAgent {
                agent_id: agent_id.clone(),
                reason,
            };
            if agent_id == SUPERVISOR_ID {
                return Err(invalid("id is reserved for the supervisor".to_string()));
            }
            if let Err(e) = agent.kind.parse::<AgentKind>() {
                return Err(invalid(e.to_string()));
            }
            if !within(agent.interval_secs, MAX_INTERVAL) {
                return Err(invalid(format!(
                    "interval_secs must be positive and at most {}",
                    MAX_INTERVAL.as_secs()
                )));
            }
        }

        Ok(())
    }

    /// Level used when `RUST_LOG` is not set
    pub fn log_filter(&self) -> LevelFilter {
        self.system
            .log_level
            .parse()
            .unwrap_or(LevelFilter::Info)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        to_duration(self.system.shutdown_timeout_secs, MAX_SHUTDOWN_TIMEOUT)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            restart_on_fault: self.system.restart_on_fault,
            max_restarts: self.system.max_restarts,
            health_interval: self
                .system
                .health_interval_secs
                .map(|secs| to_duration(secs, MAX_INTERVAL)),
            ..SupervisorConfig::default()
        }
    }

    /// Agents with `enabled: true`, in id order
    pub fn enabled_agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.values().filter(|agent| agent.enabled)
    }
}

/// Positive and no longer than `max`
fn within(secs: f64, max: Duration) -> bool {
    secs.is_finite() && secs > 0.0 && secs <= max.as_secs_f64()
}

/// Seconds to a duration, saturating at `max`
fn to_duration(secs: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).map_or(max, |duration| duration.min(max))
}

// Default value functions for serde
fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_secs() -> f64 {
    5.0
}

fn default_max_restarts() -> u32 {
    3
}

/// One agent of every kind, keyed by the kind name
fn default_agents() -> BTreeMap<AgentId, AgentConfig> {
    AgentKind::ALL
        .into_iter()
        .map(|kind| {
            let interval_secs = match kind {
                AgentKind::FundamentalAnalysis => 5.0,
                AgentKind::StrategyOptimization => 2.0,
                _ => 1.0,
            };
            let config = AgentConfig::new(kind.as_str(), kind.as_str()).with_interval_secs(interval_secs);
            (kind.as_str().to_string(), config)
        })
        .collect()
}
