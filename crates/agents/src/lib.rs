//! FTBA Agents - Trading agents and gateway contract
//!
//! Concrete [`Agent`](ftba_runtime::Agent) implementations wired together
//! only through the broker:
//!
//! ```text
//!  TechnicalAnalysis ──TECHNICAL_SIGNAL──┐
//!                                        ▼
//!  FundamentalAnalysis ─FUNDAMENTAL_UPDATE─► StrategyOptimization ──TRADE_PROPOSAL──► RiskManagement
//!                                        ▲                                              │
//!                              TRADE_RESULT                                    RISK_ASSESSMENT
//!                                        │                                              ▼
//!                                        └──────────────────────────────────── TradeExecution
//!                                                                                  │
//!                                                                            TradingGateway
//! ```
//!
//! AssetSelection tells TechnicalAnalysis which symbols are tradable through
//! the custom `ASSET_AVAILABILITY` message. Agents that touch the market
//! share one [`TradingGateway`].

pub mod asset_selection;
pub mod execution;
pub mod fundamental;
pub mod gateway;
pub mod optimization;
pub mod risk;
pub mod technical;

#[cfg(test)]
pub(crate) mod testing;

pub use asset_selection::{
    ASSET_AVAILABILITY, ASSET_AVAILABILITY_REQUEST, AssetAvailability, AssetSelectionAgent,
    AssetSelectionSettings, AssetStatus, Session, SessionTime, TradingHours,
};
pub use execution::{ExecutionSettings, TradeExecutionAgent};
pub use fundamental::{CalendarEvent, FundamentalAnalysisAgent, FundamentalSettings};
pub use gateway::{
    Fill, GatewayError, MarketConfig, OrderRequest, Quote, SimulatedGateway, TradingGateway,
};
pub use optimization::{OptimizationSettings, StrategyOptimizationAgent, StrategyStats};
pub use risk::{RiskManagementAgent, RiskSettings};
pub use technical::{TechnicalAnalysisAgent, TechnicalSettings};

use ftba_runtime::{Agent, AgentConfig};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Agent implementations selectable by the `kind` configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    TechnicalAnalysis,
    FundamentalAnalysis,
    StrategyOptimization,
    RiskManagement,
    TradeExecution,
    AssetSelection,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::TechnicalAnalysis,
        AgentKind::FundamentalAnalysis,
        AgentKind::StrategyOptimization,
        AgentKind::RiskManagement,
        AgentKind::TradeExecution,
        AgentKind::AssetSelection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::TechnicalAnalysis => "technical_analysis",
            AgentKind::FundamentalAnalysis => "fundamental_analysis",
            AgentKind::StrategyOptimization => "strategy_optimization",
            AgentKind::RiskManagement => "risk_management",
            AgentKind::TradeExecution => "trade_execution",
            AgentKind::AssetSelection => "asset_selection",
        }
    }

    /// Build a fresh agent of this kind
    pub fn build(
        &self,
        config: &AgentConfig,
        gateway: &Arc<dyn TradingGateway>,
    ) -> anyhow::Result<Box<dyn Agent>> {
        let agent: Box<dyn Agent> = match self {
            AgentKind::TechnicalAnalysis => {
                Box::new(TechnicalAnalysisAgent::from_config(config, gateway.clone())?)
            }
            AgentKind::FundamentalAnalysis => Box::new(FundamentalAnalysisAgent::from_config(config)?),
            AgentKind::StrategyOptimization => {
                Box::new(StrategyOptimizationAgent::from_config(config)?)
            }
            AgentKind::RiskManagement => Box::new(RiskManagementAgent::from_config(config)?),
            AgentKind::TradeExecution => {
                Box::new(TradeExecutionAgent::from_config(config, gateway.clone())?)
            }
            AgentKind::AssetSelection => {
                Box::new(AssetSelectionAgent::from_config(config, gateway.clone())?)
            }
        };
        Ok(agent)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown agent kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for AgentKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Factory that dispatches on `config.kind`, for use with `Supervisor::add_agent`
pub fn factory(
    gateway: Arc<dyn TradingGateway>,
) -> impl Fn(&AgentConfig) -> anyhow::Result<Box<dyn Agent>> + Send + Sync + 'static {
    move |config: &AgentConfig| {
        let kind: AgentKind = config.kind.parse()?;
        kind.build(config, &gateway)
    }
}
