//! Strategy selection and performance tracking
//!
//! Turns technical signals into trade proposals when they are confident
//! enough and not contradicted by recent fundamentals. Closed trades feed
//! per-strategy statistics; strategies with a poor record stop proposing
//! and every change is published as a `STRATEGY_RECOMMENDATION`.

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ftba_core::{
    Confidence, Direction, FundamentalUpdate, Message, MessageType, Payload,
    StrategyRecommendation, TechnicalSignal, TradeProposal, TradeResult,
};
use ftba_runtime::{Agent, AgentConfig, AgentContext};
use log::{debug, info};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

/// Strategy optimization settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptimizationSettings {
    /// Weakest signal confidence that still produces a proposal
    pub min_confidence: Confidence,
    pub trade_size: Decimal,
    /// Stop distance as a fraction of entry price
    pub stop_loss_pct: Decimal,
    /// Target distance as a fraction of entry price
    pub take_profit_pct: Decimal,
    /// How long a fundamental update keeps influencing proposals
    pub fundamental_ttl_secs: u64,
    /// Proposal validity
    pub proposal_ttl_secs: u64,
    /// Closed trades required before a strategy is judged
    pub min_trades: u32,
    /// Strategies below this win rate stop proposing
    pub disable_below: f64,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            min_confidence: Confidence::Medium,
            trade_size: dec!(10000),
            stop_loss_pct: dec!(0.002),
            take_profit_pct: dec!(0.004),
            fundamental_ttl_secs: 3600,
            proposal_ttl_secs: 300,
            min_trades: 5,
            disable_below: 0.3,
        }
    }
}

/// Running record of one strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyStats {
    pub trades: u32,
    pub wins: u32,
    pub total_pnl: Decimal,
}

impl StrategyStats {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            f64::from(self.wins) / f64::from(self.trades)
        }
    }
}

pub struct StrategyOptimizationAgent {
    settings: OptimizationSettings,
    fundamentals: Vec<FundamentalUpdate>,
    stats: HashMap<String, StrategyStats>,
    /// Strategies whose stats changed since the last recommendation
    dirty: BTreeSet<String>,
    proposals: u64,
}

impl StrategyOptimizationAgent {
    pub fn new(settings: OptimizationSettings) -> anyhow::Result<Self> {
        if settings.trade_size <= Decimal::ZERO {
            bail!("trade_size must be positive");
        }
        if !(0.0..=1.0).contains(&settings.disable_below) {
            bail!("disable_below must be within [0, 1]");
        }

        Ok(Self {
            settings,
            fundamentals: Vec::new(),
            stats: HashMap::new(),
            dirty: BTreeSet::new(),
            proposals: 0,
        })
    }

    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let settings = config
            .settings_as()
            .context("invalid strategy optimization settings")?;
        Self::new(settings)
    }

    pub fn stats(&self, strategy: &str) -> Option<&StrategyStats> {
        self.stats.get(strategy)
    }

    fn is_disabled(&self, strategy: &str) -> bool {
        self.stats.get(strategy).is_some_and(|stats| {
            stats.trades >= self.settings.min_trades && stats.win_rate() < self.settings.disable_below
        })
    }

    fn prune_fundamentals(&mut self, now: DateTime<Utc>) {
        let cutoff = i64::try_from(self.settings.fundamental_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.fundamentals.retain(|update| update.timestamp >= cutoff);
    }

    /// Most recent directional fundamental view on `symbol`
    fn fundamental_bias(&self, symbol: &str) -> Option<(Direction, Confidence)> {
        self.fundamentals
            .iter()
            .filter(|update| update.affects(symbol))
            .filter_map(|update| {
                let impact = update.impact_on(symbol);
                (impact != Direction::Neutral).then_some((update.timestamp, impact, update.confidence))
            })
            .max_by_key(|(timestamp, _, _)| *timestamp)
            .map(|(_, impact, confidence)| (impact, confidence))
    }

    /// Proposal for `signal`, or `None` when it is filtered out
    pub fn propose(&mut self, signal: &TechnicalSignal, now: DateTime<Utc>) -> Option<TradeProposal> {
        if signal.direction == Direction::Neutral || signal.confidence < self.settings.min_confidence {
            return None;
        }

        let strategy = strategy_name(signal);
        if self.is_disabled(&strategy) {
            debug!("Strategy {} disabled, dropping signal on {}", strategy, signal.symbol);
            return None;
        }

        self.prune_fundamentals(now);
        let alignment = match self.fundamental_bias(&signal.symbol) {
            Some((bias, _)) if bias.contradicts(signal.direction) => {
                debug!(
                    "{:?} signal on {} contradicted by fundamentals",
                    signal.direction, signal.symbol
                );
                return None;
            }
            Some((_, confidence)) => confidence,
            None => Confidence::Medium,
        };

        let sign = Decimal::from(signal.direction.sign());
        let mut proposal = TradeProposal::new(
            signal.symbol.clone(),
            signal.direction,
            self.settings.trade_size,
            strategy,
        );
        proposal.technical_confidence = signal.confidence;
        proposal.fundamental_alignment = alignment;
        proposal.risk_score = 1.0 - (signal.confidence.score() + alignment.score()) / 2.0;
        proposal.entry_price = Some(signal.price);
        proposal.stop_loss =
            Some((signal.price * (Decimal::ONE - sign * self.settings.stop_loss_pct)).round_dp(5));
        proposal.take_profit =
            Some((signal.price * (Decimal::ONE + sign * self.settings.take_profit_pct)).round_dp(5));
        proposal.time_limit_secs = self.settings.proposal_ttl_secs;
        proposal.created_at = now;

        self.proposals += 1;
        Some(proposal)
    }

    pub fn record_result(&mut self, result: &TradeResult) {
        let stats = self.stats.entry(result.strategy_name.clone()).or_default();
        stats.trades += 1;
        if result.is_win() {
            stats.wins += 1;
        }
        stats.total_pnl += result.profit_loss;
        self.dirty.insert(result.strategy_name.clone());
    }

    /// Recommendations for every strategy that changed since the last call
    pub fn take_recommendations(&mut self, now: DateTime<Utc>) -> Vec<StrategyRecommendation> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|name| {
                let stats = self.stats.get(&name)?;
                Some(self.recommend(name.clone(), stats, now))
            })
            .collect()
    }

    fn recommend(&self, strategy_name: String, stats: &StrategyStats, now: DateTime<Utc>) -> StrategyRecommendation {
        let win_rate = stats.win_rate();
        let (weight, note) = if stats.trades < self.settings.min_trades {
            (dec!(0.5), "insufficient history")
        } else if win_rate < self.settings.disable_below {
            (Decimal::ZERO, "disable")
        } else {
            let weight = Decimal::from_f64(win_rate).unwrap_or(Decimal::ZERO).round_dp(2);
            (weight, "keep")
        };

        StrategyRecommendation {
            strategy_name,
            trades: stats.trades,
            win_rate,
            total_pnl: stats.total_pnl,
            weight,
            note: note.to_string(),
            timestamp: now,
        }
    }
}

fn strategy_name(signal: &TechnicalSignal) -> String {
    format!(
        "{}_{}",
        signal.indicator.to_lowercase(),
        signal.timeframe.as_str()
    )
}

#[async_trait]
impl Agent for StrategyOptimizationAgent {
    fn name(&self) -> &str {
        "StrategyOptimizationAgent"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([
            MessageType::TechnicalSignal,
            MessageType::FundamentalUpdate,
            MessageType::RiskAssessment,
            MessageType::TradeResult,
        ])?;
        info!(
            "[{}] Proposing {} per trade at confidence >= {:?}",
            ctx.id(),
            self.settings.trade_size,
            self.settings.min_confidence
        );
        Ok(())
    }

    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        let now = Utc::now();
        self.prune_fundamentals(now);

        let recommendations = self.take_recommendations(now);
        for rec in &recommendations {
            info!(
                "[{}] {}: {} trades, win rate {:.2}, weight {} ({})",
                ctx.id(),
                rec.strategy_name,
                rec.trades,
                rec.win_rate,
                rec.weight,
                rec.note
            );
        }
        if !recommendations.is_empty() {
            ctx.publish_batch(recommendations.into_iter().map(Payload::from));
        }
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        match message.payload() {
            Payload::TechnicalSignal(signal) => {
                if let Some(proposal) = self.propose(signal, Utc::now()) {
                    info!(
                        "[{}] Proposing {:?} {} {} ({})",
                        ctx.id(),
                        proposal.direction,
                        proposal.size,
                        proposal.symbol,
                        proposal.strategy_name
                    );
                    ctx.publish_correlated(proposal, message.id());
                }
            }
            Payload::FundamentalUpdate(update) => {
                self.fundamentals.push(update.clone());
            }
            Payload::TradeResult(result) => self.record_result(result),
            Payload::RiskAssessment(assessment) if !assessment.approved => {
                info!(
                    "[{}] Proposal {} rejected: {}",
                    ctx.id(),
                    assessment.proposal_id(),
                    assessment.reason
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        info!(
            "[{}] Issued {} proposals across {} strategies",
            ctx.id(),
            self.proposals,
            self.stats.len()
        );
        self.fundamentals.clear();
        Ok(())
    }
}
