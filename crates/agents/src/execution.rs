//! Order execution and position monitoring
//!
//! Approved risk assessments are queued and sent to the gateway on the
//! next cycle. Each fill is published as a `TRADE_EXECUTION` correlated to
//! the assessment. Open trades are checked against their stop loss and
//! take profit every cycle and closed with a `TRADE_RESULT`.
//! A risk alert cancels everything still queued.

use crate::gateway::{GatewayError, OrderRequest, TradingGateway};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftba_core::{
    Direction, Message, MessageId, MessageType, Payload, RiskAssessment, SystemAlert,
    TradeExecution, TradeResult, TradeStatus,
};
use ftba_runtime::{Agent, AgentConfig, AgentContext};
use log::{info, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Execution settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Queued orders sent per cycle
    pub max_orders_per_cycle: usize,
    /// Close trades held this long (0 holds until stop loss or take profit)
    pub max_hold_secs: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_orders_per_cycle: 10,
            max_hold_secs: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedOrder {
    assessment: RiskAssessment,
    /// Assessment message, used as correlation id for the execution
    source: MessageId,
}

pub struct TradeExecutionAgent {
    gateway: Arc<dyn TradingGateway>,
    settings: ExecutionSettings,
    queue: VecDeque<QueuedOrder>,
    open: Vec<TradeExecution>,
    halted: bool,
    executed: u64,
    closed: u64,
}

impl TradeExecutionAgent {
    pub fn new(settings: ExecutionSettings, gateway: Arc<dyn TradingGateway>) -> Self {
        Self {
            gateway,
            settings,
            queue: VecDeque::new(),
            open: Vec::new(),
            halted: false,
            executed: 0,
            closed: 0,
        }
    }

    pub fn from_config(config: &AgentConfig, gateway: Arc<dyn TradingGateway>) -> anyhow::Result<Self> {
        let settings = config
            .settings_as()
            .context("invalid trade execution settings")?;
        Ok(Self::new(settings, gateway))
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn open_trades(&self) -> &[TradeExecution] {
        &self.open
    }

    /// Send queued orders; returns executions to publish with their correlation
    async fn execute_queued(&mut self, agent_id: &str) -> anyhow::Result<Vec<(TradeExecution, MessageId)>> {
        let mut reports = Vec::new();
        let now = Utc::now();

        for _ in 0..self.settings.max_orders_per_cycle {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            let proposal = &queued.assessment.proposal;
            if proposal.is_expired_at(now) {
                warn!("[{}] Proposal {} expired before execution", agent_id, proposal.id);
                continue;
            }

            let mut order =
                OrderRequest::market(&proposal.symbol, proposal.direction, queued.assessment.approved_size);
            order.stop_loss = proposal.stop_loss;
            order.take_profit = proposal.take_profit;

            let execution = match self.gateway.execute(&order).await {
                Ok(fill) => {
                    self.executed += 1;
                    info!(
                        "[{}] Executed {:?} {} {} @ {}",
                        agent_id, fill.direction, fill.size, fill.symbol, fill.price
                    );
                    let execution = TradeExecution {
                        proposal_id: proposal.id,
                        execution_id: fill.execution_id,
                        symbol: fill.symbol,
                        direction: fill.direction,
                        executed_size: fill.size,
                        executed_price: fill.price,
                        stop_loss: proposal.stop_loss,
                        take_profit: proposal.take_profit,
                        strategy_name: proposal.strategy_name.clone(),
                        status: TradeStatus::Executed,
                        execution_time: fill.timestamp,
                    };
                    self.open.push(execution.clone());
                    execution
                }
                Err(err @ (GatewayError::Rejected(_) | GatewayError::UnknownSymbol(_))) => {
                    warn!("[{}] Order for proposal {} failed: {}", agent_id, proposal.id, err);
                    TradeExecution {
                        proposal_id: proposal.id,
                        execution_id: Uuid::new_v4(),
                        symbol: proposal.symbol.clone(),
                        direction: proposal.direction,
                        executed_size: Decimal::ZERO,
                        executed_price: Decimal::ZERO,
                        stop_loss: None,
                        take_profit: None,
                        strategy_name: proposal.strategy_name.clone(),
                        status: TradeStatus::Canceled,
                        execution_time: Utc::now(),
                    }
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("executing proposal {}", proposal.id));
                }
            };
            reports.push((execution, queued.source));
        }
        Ok(reports)
    }

    /// Close trades that hit an exit; returns their results
    async fn monitor_open(&mut self) -> anyhow::Result<Vec<TradeResult>> {
        let mut prices = Vec::with_capacity(self.open.len());
        for trade in &self.open {
            let quote = self.gateway.quote(&trade.symbol).await?;
            prices.push(quote.exit_price(trade.direction));
        }

        let now = Utc::now();
        let max_hold = self.settings.max_hold_secs;
        let mut prices = prices.into_iter();
        let mut results = Vec::new();
        self.open.retain(|trade| {
            let Some(price) = prices.next() else {
                return true;
            };
            match exit_reason(trade, price, now, max_hold) {
                Some(reason) => {
                    results.push(close(trade, price, reason, now));
                    false
                }
                None => true,
            }
        });
        self.closed += results.len() as u64;
        Ok(results)
    }

    fn cancel_queued(&mut self) -> usize {
        let canceled = self.queue.len();
        self.queue.clear();
        canceled
    }
}

/// Why `trade` should be closed at `price`, if at all
fn exit_reason(
    trade: &TradeExecution,
    price: Decimal,
    now: DateTime<Utc>,
    max_hold_secs: u64,
) -> Option<&'static str> {
    let (stop_hit, target_hit) = match trade.direction {
        Direction::Long => (
            trade.stop_loss.is_some_and(|sl| price <= sl),
            trade.take_profit.is_some_and(|tp| price >= tp),
        ),
        Direction::Short => (
            trade.stop_loss.is_some_and(|sl| price >= sl),
            trade.take_profit.is_some_and(|tp| price <= tp),
        ),
        Direction::Neutral => (false, false),
    };

    if stop_hit {
        Some("stop_loss")
    } else if target_hit {
        Some("take_profit")
    } else if max_hold_secs > 0
        && now.signed_duration_since(trade.execution_time).num_seconds()
            >= i64::try_from(max_hold_secs).unwrap_or(i64::MAX)
    {
        Some("time_limit")
    } else {
        None
    }
}

fn close(trade: &TradeExecution, price: Decimal, reason: &str, now: DateTime<Utc>) -> TradeResult {
    TradeResult {
        trade_id: trade.execution_id,
        proposal_id: trade.proposal_id,
        symbol: trade.symbol.clone(),
        direction: trade.direction,
        entry_price: trade.executed_price,
        exit_price: price,
        size: trade.executed_size,
        entry_time: trade.execution_time,
        exit_time: now,
        profit_loss: trade.pnl_at(price),
        exit_reason: reason.to_string(),
        strategy_name: trade.strategy_name.clone(),
    }
}

#[async_trait]
impl Agent for TradeExecutionAgent {
    fn name(&self) -> &str {
        "TradeExecutionAgent"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([MessageType::RiskAssessment, MessageType::SystemStatus])?;
        self.gateway.connect().await?;
        info!("[{}] Connected to {} gateway", ctx.id(), self.gateway.name());
        Ok(())
    }

    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        for (execution, source) in self.execute_queued(ctx.id()).await? {
            ctx.publish_correlated(execution, source);
        }

        let results = self.monitor_open().await?;
        for result in &results {
            info!(
                "[{}] Closed {} {} on {}: PnL {}",
                ctx.id(),
                result.symbol,
                result.trade_id,
                result.exit_reason,
                result.profit_loss
            );
        }
        if !results.is_empty() {
            ctx.publish_batch(results.into_iter().map(Payload::from));
        }
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        match message.payload() {
            Payload::RiskAssessment(assessment) if assessment.approved => {
                if self.halted {
                    info!(
                        "[{}] Trading halted, dropping proposal {}",
                        ctx.id(),
                        assessment.proposal_id()
                    );
                } else {
                    self.queue.push_back(QueuedOrder {
                        assessment: assessment.clone(),
                        source: message.id(),
                    });
                }
            }
            Payload::SystemStatus(status) => match &status.alert {
                Some(SystemAlert::RiskLimitBreached { reason }) => {
                    self.halted = true;
                    let canceled = self.cancel_queued();
                    warn!(
                        "[{}] Risk alert ({}), canceled {} queued orders",
                        ctx.id(),
                        reason,
                        canceled
                    );
                }
                Some(SystemAlert::TradingResumed) => {
                    self.halted = false;
                    info!("[{}] Trading resumed", ctx.id());
                }
                None => {}
            },
            _ => {}
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        let canceled = self.cancel_queued();
        info!(
            "[{}] Stopping: {} executed, {} closed, {} left open, {} canceled",
            ctx.id(),
            self.executed,
            self.closed,
            self.open.len(),
            canceled
        );
        self.gateway.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MarketConfig, SimulatedGateway};
    use crate::testing::{Harness, inbound};
    use chrono::Duration;
    use ftba_core::{SystemState, SystemStatus, TradeProposal};
    use rust_decimal_macros::dec;

    fn flat_gateway() -> Arc<SimulatedGateway> {
        let gateway = SimulatedGateway::new(MarketConfig {
            volatility: 0.0,
            ..MarketConfig::default()
        });
        gateway.set_price("EUR/USD", dec!(1.1000)).unwrap();
        Arc::new(gateway)
    }

    fn assessment(direction: Direction, approved: bool) -> RiskAssessment {
        let mut proposal = TradeProposal::new("EUR/USD", direction, dec!(10000), "ma_crossover_1m");
        let sign = Decimal::from(direction.sign());
        proposal.stop_loss = Some(dec!(1.1000) - sign * dec!(0.0020));
        proposal.take_profit = Some(dec!(1.1000) + sign * dec!(0.0040));
        RiskAssessment {
            proposal,
            approved,
            approved_size: if approved { dec!(10000) } else { Decimal::ZERO },
            reason: "test".to_string(),
            max_position_size: dec!(100000),
            current_exposure: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    fn alert() -> SystemStatus {
        SystemStatus::new(SystemState::Running, "daily loss limit breached").with_alert(
            SystemAlert::RiskLimitBreached {
                reason: "daily loss".to_string(),
            },
        )
    }

    async fn started(gateway: &Arc<SimulatedGateway>) -> (TradeExecutionAgent, Harness) {
        let mut agent = TradeExecutionAgent::new(ExecutionSettings::default(), gateway.clone());
        let harness = Harness::new(AgentConfig::new("exec", "trade_execution"));
        agent.setup(&harness.ctx).await.unwrap();
        (agent, harness)
    }

    #[tokio::test]
    async fn test_executes_and_takes_profit() {
        let _ = env_logger::try_init();
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;

        let approved = inbound("risk", assessment(Direction::Long, true));
        agent.handle_message(&harness.ctx, &approved).await.unwrap();
        assert_eq!(agent.queued(), 1);

        agent.process_cycle(&harness.ctx).await.unwrap();
        let messages = harness.published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].correlation_id(), Some(approved.id()));
        let Payload::TradeExecution(execution) = messages[0].payload() else {
            panic!("expected an execution, got {:?}", messages[0].payload());
        };
        assert_eq!(execution.status, TradeStatus::Executed);
        assert_eq!(execution.executed_price, dec!(1.1002));
        assert_eq!(agent.open_trades().len(), 1);

        gateway.set_price("EUR/USD", dec!(1.1050)).unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();

        let published = harness.published();
        assert_eq!(published.len(), 1);
        let Payload::TradeResult(result) = &published[0] else {
            panic!("expected a trade result, got {:?}", published[0]);
        };
        assert_eq!(result.exit_reason, "take_profit");
        assert_eq!(result.trade_id, execution.execution_id);
        // Exit at bid 1.1049, entry 1.1002
        assert_eq!(result.profit_loss, dec!(47.0000));
        assert!(agent.open_trades().is_empty());
    }

    #[tokio::test]
    async fn test_short_stopped_out() {
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;

        agent
            .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Short, true)))
            .await
            .unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();
        harness.published();

        gateway.set_price("EUR/USD", dec!(1.1030)).unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();

        let published = harness.published();
        let Payload::TradeResult(result) = &published[0] else {
            panic!("expected a trade result, got {:?}", published[0]);
        };
        assert_eq!(result.exit_reason, "stop_loss");
        assert!(!result.is_win());
    }

    #[tokio::test]
    async fn test_rejected_assessment_ignored() {
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;

        agent
            .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Long, false)))
            .await
            .unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();

        assert_eq!(agent.queued(), 0);
        assert!(harness.published().is_empty());
    }

    #[tokio::test]
    async fn test_risk_alert_cancels_queue() {
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;

        for _ in 0..3 {
            agent
                .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Long, true)))
                .await
                .unwrap();
        }
        agent
            .handle_message(&harness.ctx, &inbound("risk", alert()))
            .await
            .unwrap();
        assert_eq!(agent.queued(), 0);

        agent
            .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Long, true)))
            .await
            .unwrap();
        assert_eq!(agent.queued(), 0);

        let resumed = SystemStatus::new(SystemState::Running, "new day").with_alert(SystemAlert::TradingResumed);
        agent
            .handle_message(&harness.ctx, &inbound("risk", resumed))
            .await
            .unwrap();
        agent
            .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Long, true)))
            .await
            .unwrap();
        assert_eq!(agent.queued(), 1);
    }

    #[tokio::test]
    async fn test_gateway_rejection_reported_as_canceled() {
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;
        gateway.reject_orders(Some("venue halted".to_string()));

        agent
            .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Long, true)))
            .await
            .unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();

        let published = harness.published();
        let Payload::TradeExecution(execution) = &published[0] else {
            panic!("expected an execution, got {:?}", published[0]);
        };
        assert_eq!(execution.status, TradeStatus::Canceled);
        assert!(agent.open_trades().is_empty());
    }

    #[tokio::test]
    async fn test_lost_connection_is_an_error() {
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;
        agent
            .handle_message(&harness.ctx, &inbound("risk", assessment(Direction::Long, true)))
            .await
            .unwrap();

        gateway.disconnect().await.unwrap();
        assert!(agent.process_cycle(&harness.ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_disconnects() {
        let gateway = flat_gateway();
        let (mut agent, harness) = started(&gateway).await;
        assert!(gateway.is_connected());

        agent.cleanup(&harness.ctx).await.unwrap();
        assert!(!gateway.is_connected());
    }

    #[test]
    fn test_time_limit_exit() {
        let now = Utc::now();
        let trade = TradeExecution {
            proposal_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            symbol: "EUR/USD".to_string(),
            direction: Direction::Long,
            executed_size: dec!(1000),
            executed_price: dec!(1.1),
            stop_loss: None,
            take_profit: None,
            strategy_name: "test".to_string(),
            status: TradeStatus::Executed,
            execution_time: now - Duration::seconds(120),
        };
        assert_eq!(exit_reason(&trade, dec!(1.1), now, 0), None);
        assert_eq!(exit_reason(&trade, dec!(1.1), now, 60), Some("time_limit"));
    }
}
