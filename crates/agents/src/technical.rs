//! Moving-average crossover signals
//!
//! Every cycle the agent samples a quote per symbol, keeps a rolling window
//! of mid prices and compares a short and a long simple moving average.
//! A `TECHNICAL_SIGNAL` is published when the short average moves to the
//! other side of the long one by more than `signal_threshold` (relative).
//!
//! Once an asset selection agent has answered, signals are limited to its
//! recommended symbols. Until then every configured symbol is tradable.

use crate::asset_selection::{ASSET_AVAILABILITY, AssetAvailability, availability_request};
use crate::gateway::TradingGateway;
use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::Utc;
use ftba_core::{
    Confidence, Direction, Message, MessageType, Payload, SystemAlert, TechnicalSignal, Timeframe,
};
use ftba_runtime::{Agent, AgentConfig, AgentContext};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub const INDICATOR: &str = "MA_CROSSOVER";

/// Technical analysis settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TechnicalSettings {
    /// Symbols to sample every cycle
    pub symbols: Vec<String>,
    /// Samples in the fast average
    pub short_window: usize,
    /// Samples in the slow average
    pub long_window: usize,
    /// Minimum relative distance between the averages
    pub signal_threshold: Decimal,
    /// Timeframe reported on signals
    pub timeframe: Timeframe,
}

impl Default for TechnicalSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["EUR/USD".to_string(), "GBP/USD".to_string()],
            short_window: 5,
            long_window: 20,
            signal_threshold: dec!(0.0002),
            timeframe: Timeframe::M1,
        }
    }
}

pub struct TechnicalAnalysisAgent {
    gateway: Arc<dyn TradingGateway>,
    settings: TechnicalSettings,
    windows: HashMap<String, VecDeque<Decimal>>,
    /// Side of the last emitted signal per symbol
    bias: HashMap<String, Direction>,
    /// Recommended symbols; `None` until asset selection reports
    tradable: Option<HashSet<String>>,
    reinforced: u64,
}

impl TechnicalAnalysisAgent {
    pub fn new(settings: TechnicalSettings, gateway: Arc<dyn TradingGateway>) -> anyhow::Result<Self> {
        if settings.symbols.is_empty() {
            bail!("at least one symbol is required");
        }
        if settings.short_window == 0 || settings.long_window <= settings.short_window {
            bail!(
                "windows must satisfy 0 < short_window < long_window (got {} / {})",
                settings.short_window,
                settings.long_window
            );
        }
        if settings.signal_threshold.is_sign_negative() {
            bail!("signal_threshold must not be negative");
        }

        Ok(Self {
            gateway,
            settings,
            windows: HashMap::new(),
            bias: HashMap::new(),
            tradable: None,
            reinforced: 0,
        })
    }

    pub fn from_config(config: &AgentConfig, gateway: Arc<dyn TradingGateway>) -> anyhow::Result<Self> {
        let settings = config
            .settings_as()
            .context("invalid technical analysis settings")?;
        Self::new(settings, gateway)
    }

    pub fn settings(&self) -> &TechnicalSettings {
        &self.settings
    }

    pub fn is_tradable(&self, symbol: &str) -> bool {
        self.tradable
            .as_ref()
            .is_none_or(|tradable| tradable.contains(symbol))
    }

    /// Restrict signals to the recommended symbols
    pub fn follow(&mut self, availability: &AssetAvailability) {
        self.tradable = Some(availability.recommended.iter().cloned().collect());
    }

    /// Feed one mid price; returns a signal when the averages cross
    pub fn observe(&mut self, symbol: &str, mid: Decimal) -> Option<TechnicalSignal> {
        let long_window = self.settings.long_window;
        let window = self.windows.entry(symbol.to_string()).or_default();
        window.push_back(mid);
        while window.len() > long_window {
            window.pop_front();
        }
        if window.len() < long_window {
            return None;
        }

        let long_ma = mean(window.iter());
        let short_ma = mean(window.iter().skip(long_window - self.settings.short_window));
        if long_ma.is_zero() {
            return None;
        }

        let spread = (short_ma - long_ma) / long_ma;
        let threshold = self.settings.signal_threshold;
        let direction = if spread > threshold {
            Direction::Long
        } else if spread < -threshold {
            Direction::Short
        } else {
            return None;
        };

        if self.bias.insert(symbol.to_string(), direction) == Some(direction) {
            return None;
        }

        Some(TechnicalSignal {
            symbol: symbol.to_string(),
            timeframe: self.settings.timeframe,
            indicator: INDICATOR.to_string(),
            direction,
            confidence: confidence_for(spread.abs(), threshold),
            value: spread.round_dp(6),
            threshold,
            price: mid,
            timestamp: Utc::now(),
        })
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a Decimal>) -> Decimal {
    let (sum, count) = values.fold((Decimal::ZERO, 0u32), |(sum, n), v| (sum + v, n + 1));
    if count == 0 {
        Decimal::ZERO
    } else {
        sum / Decimal::from(count)
    }
}

/// Stronger separation relative to the threshold means higher confidence
fn confidence_for(distance: Decimal, threshold: Decimal) -> Confidence {
    if threshold.is_zero() {
        return Confidence::Medium;
    }
    let ratio = (distance / threshold).to_f64().unwrap_or(1.0);
    Confidence::from_score((0.4 + 0.1 * ratio).min(1.0))
}

#[async_trait]
impl Agent for TechnicalAnalysisAgent {
    fn name(&self) -> &str {
        "TechnicalAnalysisAgent"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([
            MessageType::SystemStatus,
            MessageType::TradeResult,
            MessageType::custom(ASSET_AVAILABILITY),
        ])?;
        self.gateway.connect().await?;

        for symbol in &self.settings.symbols {
            self.gateway
                .quote(symbol)
                .await
                .with_context(|| format!("cannot quote {symbol}"))?;
        }

        info!(
            "[{}] Monitoring {} symbols (SMA {}/{})",
            ctx.id(),
            self.settings.symbols.len(),
            self.settings.short_window,
            self.settings.long_window
        );
        ctx.publish(availability_request());
        Ok(())
    }

    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        let mut quotes = Vec::with_capacity(self.settings.symbols.len());
        for symbol in &self.settings.symbols {
            quotes.push(self.gateway.quote(symbol).await?);
        }

        let mut signals: Vec<TechnicalSignal> = quotes
            .iter()
            .filter_map(|quote| self.observe(&quote.symbol, quote.mid()))
            .collect();
        signals.retain(|signal| {
            let tradable = self.is_tradable(&signal.symbol);
            if !tradable {
                debug!("[{}] {} not recommended, signal dropped", ctx.id(), signal.symbol);
            }
            tradable
        });

        let signals: Vec<Payload> = signals
            .into_iter()
            .inspect(|signal| {
                info!(
                    "[{}] {} {:?} signal for {} ({:?}, spread {})",
                    ctx.id(),
                    signal.indicator,
                    signal.direction,
                    signal.symbol,
                    signal.confidence,
                    signal.value
                )
            })
            .map(Payload::from)
            .collect();

        if !signals.is_empty() {
            ctx.publish_batch(signals);
        }
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        match message.payload() {
            Payload::TradeResult(result) if result.is_win() => {
                self.reinforced += 1;
                info!(
                    "[{}] Reinforcing {} on {} ({} winning trades)",
                    ctx.id(),
                    result.strategy_name,
                    result.symbol,
                    self.reinforced
                );
            }
            Payload::SystemStatus(status) => {
                if let Some(SystemAlert::RiskLimitBreached { reason }) = &status.alert {
                    info!("[{}] Risk alert observed: {}", ctx.id(), reason);
                }
            }
            payload @ Payload::Custom { .. } => match AssetAvailability::from_payload(payload) {
                Ok(Some(availability)) => {
                    self.follow(&availability);
                    info!(
                        "[{}] Tradable symbols now: {}",
                        ctx.id(),
                        self.settings
                            .symbols
                            .iter()
                            .filter(|symbol| availability.is_recommended(symbol))
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
                Ok(None) => debug!("[{}] Ignoring {}", ctx.id(), payload.message_type()),
                Err(e) => warn!("[{}] Malformed asset availability: {}", ctx.id(), e),
            },
            other => debug!("[{}] Ignoring {}", ctx.id(), other.message_type()),
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        self.windows.clear();
        self.bias.clear();
        self.gateway.disconnect().await?;
        info!("[{}] Technical analysis stopped", ctx.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MarketConfig, SimulatedGateway};
    use crate::testing::{Harness, inbound};

    fn flat_gateway() -> Arc<SimulatedGateway> {
        Arc::new(SimulatedGateway::new(MarketConfig {
            volatility: 0.0,
            ..MarketConfig::default()
        }))
    }

    fn settings() -> TechnicalSettings {
        TechnicalSettings {
            symbols: vec!["EUR/USD".to_string()],
            short_window: 2,
            long_window: 4,
            signal_threshold: dec!(0.001),
            timeframe: Timeframe::M5,
        }
    }

    #[test]
    fn test_crossover_emits_once_per_side() {
        let mut agent = TechnicalAnalysisAgent::new(settings(), flat_gateway()).unwrap();

        for _ in 0..4 {
            assert!(agent.observe("EUR/USD", dec!(1.0)).is_none());
        }

        let long = agent.observe("EUR/USD", dec!(1.1)).unwrap();
        assert_eq!(long.direction, Direction::Long);
        assert_eq!(long.timeframe, Timeframe::M5);
        assert_eq!(long.price, dec!(1.1));
        assert!(long.value > long.threshold);

        assert!(agent.observe("EUR/USD", dec!(1.1)).is_none());

        let short = agent.observe("EUR/USD", dec!(0.9)).unwrap();
        assert_eq!(short.direction, Direction::Short);
        assert!(short.value < Decimal::ZERO);
    }

    #[test]
    fn test_small_moves_stay_quiet() {
        let mut agent = TechnicalAnalysisAgent::new(settings(), flat_gateway()).unwrap();
        for price in [dec!(1.0000), dec!(1.0001), dec!(1.0000), dec!(1.0002), dec!(1.0001)] {
            assert!(agent.observe("EUR/USD", price).is_none());
        }
    }

    #[test]
    fn test_rejects_bad_windows() {
        let bad = TechnicalSettings {
            short_window: 4,
            long_window: 4,
            ..settings()
        };
        assert!(TechnicalAnalysisAgent::new(bad, flat_gateway()).is_err());

        let config = AgentConfig::new("ta", "technical_analysis").with_setting("short_window", "five");
        assert!(TechnicalAnalysisAgent::from_config(&config, flat_gateway()).is_err());
    }

    #[test]
    fn test_confidence_grows_with_distance() {
        assert_eq!(confidence_for(dec!(0.0011), dec!(0.001)), Confidence::Medium);
        assert_eq!(confidence_for(dec!(0.003), dec!(0.001)), Confidence::High);
        assert_eq!(confidence_for(dec!(0.01), dec!(0.001)), Confidence::VeryHigh);
    }

    #[tokio::test]
    async fn test_cycle_publishes_signal() {
        let _ = env_logger::try_init();
        let gateway = flat_gateway();
        let mut agent = TechnicalAnalysisAgent::new(settings(), gateway.clone()).unwrap();
        let harness = Harness::new(AgentConfig::new("ta", "technical_analysis"));

        agent.setup(&harness.ctx).await.unwrap();
        gateway.set_price("EUR/USD", dec!(1.0)).unwrap();
        for _ in 0..4 {
            agent.process_cycle(&harness.ctx).await.unwrap();
        }
        assert!(harness.published().is_empty());

        gateway.set_price("EUR/USD", dec!(1.1)).unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();

        let messages = harness.published_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender(), "ta");
        let Payload::TechnicalSignal(signal) = messages[0].payload() else {
            panic!("expected a technical signal, got {:?}", messages[0].payload());
        };
        assert_eq!(signal.direction, Direction::Long);

        agent.cleanup(&harness.ctx).await.unwrap();
        assert!(!gateway.is_connected());
    }

    #[tokio::test]
    async fn test_signals_follow_asset_recommendation() {
        let _ = env_logger::try_init();
        let gateway = flat_gateway();
        let mut agent = TechnicalAnalysisAgent::new(settings(), gateway.clone()).unwrap();
        let harness = Harness::new(AgentConfig::new("ta", "technical_analysis"));
        harness.tap_custom([crate::asset_selection::ASSET_AVAILABILITY_REQUEST]);

        agent.setup(&harness.ctx).await.unwrap();
        let request = harness.published_messages();
        assert_eq!(request.len(), 1);
        assert_eq!(
            request[0].message_type(),
            MessageType::custom(crate::asset_selection::ASSET_AVAILABILITY_REQUEST)
        );
        assert!(agent.is_tradable("EUR/USD"));

        let closed = AssetAvailability {
            market_open: false,
            assets: Vec::new(),
            recommended: Vec::new(),
            checked_at: Utc::now(),
        };
        let update = inbound("assets", closed.to_payload().unwrap());
        agent.handle_message(&harness.ctx, &update).await.unwrap();
        assert!(!agent.is_tradable("EUR/USD"));

        gateway.set_price("EUR/USD", dec!(1.0)).unwrap();
        for _ in 0..4 {
            agent.process_cycle(&harness.ctx).await.unwrap();
        }
        gateway.set_price("EUR/USD", dec!(1.1)).unwrap();
        agent.process_cycle(&harness.ctx).await.unwrap();
        assert!(harness.published().is_empty());

        let reopened = AssetAvailability {
            market_open: true,
            recommended: vec!["EUR/USD".to_string()],
            ..closed
        };
        let update = inbound("assets", reopened.to_payload().unwrap());
        agent.handle_message(&harness.ctx, &update).await.unwrap();
        assert!(agent.is_tradable("EUR/USD"));

        gateway.set_price("EUR/USD", dec!(0.9)).unwrap();
        for _ in 0..3 {
            agent.process_cycle(&harness.ctx).await.unwrap();
        }
        let published = harness.published();
        assert_eq!(published.len(), 1);
        let Payload::TechnicalSignal(signal) = &published[0] else {
            panic!("expected a technical signal, got {:?}", published[0]);
        };
        assert_eq!(signal.direction, Direction::Short);

        let garbled = inbound("assets", Payload::custom(ASSET_AVAILABILITY, serde_json::json!(1)));
        agent.handle_message(&harness.ctx, &garbled).await.unwrap();
        assert!(agent.is_tradable("EUR/USD"));
    }

    #[tokio::test]
    async fn test_setup_fails_for_unknown_symbol() {
        let unknown = TechnicalSettings {
            symbols: vec!["XAU/USD".to_string()],
            ..settings()
        };
        let mut agent = TechnicalAnalysisAgent::new(unknown, flat_gateway()).unwrap();
        let harness = Harness::new(AgentConfig::new("ta", "technical_analysis"));

        let err = agent.setup(&harness.ctx).await.unwrap_err();
        assert!(err.to_string().contains("XAU/USD"));
    }
}
