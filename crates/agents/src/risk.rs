//! Pre-trade risk checks and loss limits
//!
//! Every proposal gets a `RISK_ASSESSMENT` correlated to the proposal
//! message. Executions and results keep the open-position book and the
//! daily PnL current; breaching the daily loss limit halts approvals and
//! broadcasts a risk alert until the next trading day.

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ftba_core::{
    Direction, Message, MessageType, Payload, RiskAssessment, SystemAlert, SystemState,
    SystemStatus, TradeExecution, TradeProposal, TradeResult, TradeStatus,
};
use ftba_runtime::{Agent, AgentConfig, AgentContext};
use log::{error, info, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Risk limits
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Largest size approved for a single trade
    pub max_position_size: Decimal,
    /// Open plus approved-but-unfilled trades
    pub max_open_positions: usize,
    /// Loss that halts trading for the rest of the day
    pub max_daily_loss: Decimal,
    /// Proposals scoring above this are rejected
    pub max_risk_score: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_position_size: dec!(100000),
            max_open_positions: 5,
            max_daily_loss: dec!(1000),
            max_risk_score: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenPosition {
    symbol: String,
    size: Decimal,
}

pub struct RiskManagementAgent {
    settings: RiskSettings,
    /// Filled trades by execution id
    open: HashMap<Uuid, OpenPosition>,
    /// Approved proposals awaiting a fill, with their expiry
    pending: HashMap<Uuid, DateTime<Utc>>,
    daily_pnl: Decimal,
    day: NaiveDate,
    halt_reason: Option<String>,
}

impl RiskManagementAgent {
    pub fn new(settings: RiskSettings) -> anyhow::Result<Self> {
        if settings.max_position_size <= Decimal::ZERO {
            bail!("max_position_size must be positive");
        }
        if settings.max_daily_loss <= Decimal::ZERO {
            bail!("max_daily_loss must be positive");
        }

        Ok(Self {
            settings,
            open: HashMap::new(),
            pending: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            day: Utc::now().date_naive(),
            halt_reason: None,
        })
    }

    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let settings = config
            .settings_as()
            .context("invalid risk management settings")?;
        Self::new(settings)
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.daily_pnl
    }

    pub fn is_halted(&self) -> bool {
        self.halt_reason.is_some()
    }

    pub fn open_positions(&self) -> usize {
        self.open.len()
    }

    /// Total open size across symbols
    pub fn exposure(&self) -> Decimal {
        self.open.values().map(|p| p.size).sum()
    }

    /// Decide on a proposal
    pub fn assess(&mut self, proposal: &TradeProposal, now: DateTime<Utc>) -> RiskAssessment {
        let max_size = self.settings.max_position_size;
        let verdict = self.check(proposal, now);

        let (approved, approved_size, reason) = match verdict {
            Err(reason) => (false, Decimal::ZERO, reason),
            Ok(()) if proposal.size > max_size => {
                (true, max_size, format!("approved, size capped to {max_size}"))
            }
            Ok(()) => (true, proposal.size, "approved".to_string()),
        };

        if approved {
            self.pending.insert(proposal.id, proposal.expires_at());
        }

        let mut decided = proposal.clone();
        decided.status = if approved {
            TradeStatus::Approved
        } else {
            TradeStatus::Rejected
        };

        RiskAssessment {
            proposal: decided,
            approved,
            approved_size,
            reason,
            max_position_size: max_size,
            current_exposure: self.exposure(),
            timestamp: now,
        }
    }

    fn check(&self, proposal: &TradeProposal, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(reason) = &self.halt_reason {
            return Err(format!("trading halted: {reason}"));
        }
        if proposal.direction == Direction::Neutral || proposal.size <= Decimal::ZERO {
            return Err("proposal has no direction or size".to_string());
        }
        if proposal.is_expired_at(now) {
            return Err("proposal expired".to_string());
        }
        if proposal.risk_score > self.settings.max_risk_score {
            return Err(format!(
                "risk score {:.2} above {:.2}",
                proposal.risk_score, self.settings.max_risk_score
            ));
        }
        let committed = self.open.len() + self.pending.len();
        if committed >= self.settings.max_open_positions {
            return Err(format!(
                "{committed} positions open or pending (max {})",
                self.settings.max_open_positions
            ));
        }
        Ok(())
    }

    pub fn on_execution(&mut self, execution: &TradeExecution) {
        self.pending.remove(&execution.proposal_id);
        if execution.status == TradeStatus::Executed {
            self.open.insert(
                execution.execution_id,
                OpenPosition {
                    symbol: execution.symbol.clone(),
                    size: execution.executed_size,
                },
            );
        }
    }

    /// Book a closed trade; returns an alert when the loss limit is breached
    pub fn on_result(&mut self, result: &TradeResult, now: DateTime<Utc>) -> Option<SystemStatus> {
        let rollover = self.roll_day(now);
        if let Some(position) = self.open.remove(&result.trade_id) {
            info!(
                "Position on {} closed ({}), PnL {}",
                position.symbol, result.exit_reason, result.profit_loss
            );
        }
        self.daily_pnl += result.profit_loss;

        if self.halt_reason.is_none() && self.daily_pnl <= -self.settings.max_daily_loss {
            let reason = format!(
                "daily loss {} breached limit {}",
                self.daily_pnl, self.settings.max_daily_loss
            );
            error!("Trading halted: {}", reason);
            self.halt_reason = Some(reason.clone());
            let status = SystemStatus::new(SystemState::Running, "daily loss limit breached")
                .with_alert(SystemAlert::RiskLimitBreached { reason });
            return Some(status);
        }
        rollover
    }

    /// Reset daily tracking on a new UTC day; returns a resume notice if halted
    fn roll_day(&mut self, now: DateTime<Utc>) -> Option<SystemStatus> {
        let today = now.date_naive();
        if today == self.day {
            return None;
        }
        info!("Daily reset: PnL was {}", self.daily_pnl);
        self.day = today;
        self.daily_pnl = Decimal::ZERO;

        self.halt_reason.take().map(|_| {
            info!("Trading resumed");
            SystemStatus::new(SystemState::Running, "new trading day").with_alert(SystemAlert::TradingResumed)
        })
    }

    fn prune_pending(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, expiry| *expiry > now);
        before - self.pending.len()
    }
}

#[async_trait]
impl Agent for RiskManagementAgent {
    fn name(&self) -> &str {
        "RiskManagementAgent"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([
            MessageType::TradeProposal,
            MessageType::TradeExecution,
            MessageType::TradeResult,
        ])?;
        info!(
            "[{}] Limits: size {}, positions {}, daily loss {}",
            ctx.id(),
            self.settings.max_position_size,
            self.settings.max_open_positions,
            self.settings.max_daily_loss
        );
        Ok(())
    }

    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        let now = Utc::now();
        let expired = self.prune_pending(now);
        if expired > 0 {
            warn!("[{}] {} approved proposals expired unfilled", ctx.id(), expired);
        }
        if let Some(status) = self.roll_day(now) {
            ctx.publish(status);
        }
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        match message.payload() {
            Payload::TradeProposal(proposal) => {
                let assessment = self.assess(proposal, Utc::now());
                if assessment.approved {
                    info!(
                        "[{}] Approved {:?} {} {}",
                        ctx.id(),
                        proposal.direction,
                        assessment.approved_size,
                        proposal.symbol
                    );
                } else {
                    info!(
                        "[{}] Rejected {:?} {} {}: {}",
                        ctx.id(),
                        proposal.direction,
                        proposal.size,
                        proposal.symbol,
                        assessment.reason
                    );
                }
                ctx.publish_correlated(assessment, message.id());
            }
            Payload::TradeExecution(execution) => self.on_execution(execution),
            Payload::TradeResult(result) => {
                if let Some(status) = self.on_result(result, Utc::now()) {
                    warn!("[{}] Risk alert: {}", ctx.id(), status.detail);
                    ctx.publish(status);
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        info!(
            "[{}] Closing with {} open positions, daily PnL {}",
            ctx.id(),
            self.open.len(),
            self.daily_pnl
        );
        self.open.clear();
        self.pending.clear();
        Ok(())
    }
}
