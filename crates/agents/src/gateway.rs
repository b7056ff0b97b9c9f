//! Trading gateway contract and a simulated market
//!
//! Agents never talk to a venue directly; they go through a shared
//! [`TradingGateway`]. [`SimulatedGateway`] is a seeded random-walk market
//! with a fixed spread and slippage, good enough to drive the pipeline
//! end to end without external connectivity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftba_core::Direction;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Gateway-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway not connected")]
    NotConnected,

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Top of book for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }

    /// Price a position in `direction` would be closed at
    pub fn exit_price(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Short => self.ask,
            _ => self.bid,
        }
    }
}

/// Market order sent to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, direction: Direction, size: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.into(),
            direction,
            size,
            stop_loss: None,
            take_profit: None,
        }
    }
}

/// Execution report for a filled order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub execution_id: Uuid,
    pub client_order_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Connection to a trading venue
///
/// Implementations are shared between agents behind an `Arc`, so every
/// method takes `&self`.
#[async_trait]
pub trait TradingGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), GatewayError>;

    async fn disconnect(&self) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError>;

    async fn execute(&self, order: &OrderRequest) -> Result<Fill, GatewayError>;
}

/// Simulated market configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Tradable symbols
    pub symbols: Vec<String>,
    /// Starting mid price per symbol
    pub initial_prices: HashMap<String, Decimal>,
    /// Random generator seed for reproducible runs
    pub seed: Option<u64>,
    /// Random walk step as a fraction of price (e.g. 0.0005 = 0.05%)
    pub volatility: f64,
    /// Full bid/ask spread in price units
    pub spread: Decimal,
    /// Price concession applied to every fill
    pub slippage: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        let initial_prices = HashMap::from([
            ("EUR/USD".to_string(), dec!(1.0850)),
            ("GBP/USD".to_string(), dec!(1.2650)),
            ("USD/JPY".to_string(), dec!(151.50)),
            ("USD/CHF".to_string(), dec!(0.9050)),
        ]);

        Self {
            symbols: vec![
                "EUR/USD".to_string(),
                "GBP/USD".to_string(),
                "USD/JPY".to_string(),
                "USD/CHF".to_string(),
            ],
            initial_prices,
            seed: None,
            volatility: 0.0005,
            spread: dec!(0.0002),
            slippage: dec!(0.0001),
        }
    }
}

impl MarketConfig {
    /// Symbols listed without an initial price
    pub fn unpriced_symbols(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|symbol| !self.initial_prices.contains_key(*symbol))
            .map(String::as_str)
            .collect()
    }
}

struct SimState {
    rng: StdRng,
    prices: HashMap<String, Decimal>,
    /// Number of agents currently holding a connection
    connections: usize,
    rejecting: Option<String>,
}

/// Random-walk market shared by every agent
///
/// Connections are reference counted: the gateway stays connected until
/// every agent that connected has disconnected.
pub struct SimulatedGateway {
    config: MarketConfig,
    state: Mutex<SimState>,
}

impl SimulatedGateway {
    pub fn new(config: MarketConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let prices = config
            .symbols
            .iter()
            .map(|symbol| {
                let price = config
                    .initial_prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(Decimal::ONE);
                (symbol.clone(), price)
            })
            .collect();

        Self {
            config,
            state: Mutex::new(SimState {
                rng,
                prices,
                connections: 0,
                rejecting: None,
            }),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Current mid price without advancing the walk
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.state.lock().prices.get(symbol).copied()
    }

    /// Force the mid price of a symbol
    pub fn set_price(&self, symbol: &str, price: Decimal) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        match state.prices.get_mut(symbol) {
            Some(current) => {
                *current = price;
                Ok(())
            }
            None => Err(GatewayError::UnknownSymbol(symbol.to_string())),
        }
    }

    /// Reject every order with `reason` until cleared with `None`
    pub fn reject_orders(&self, reason: Option<String>) {
        self.state.lock().rejecting = reason;
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    fn quote_at(&self, symbol: &str, mid: Decimal) -> Quote {
        let half_spread = self.config.spread / dec!(2);
        Quote {
            symbol: symbol.to_string(),
            bid: mid - half_spread,
            ask: mid + half_spread,
            timestamp: Utc::now(),
        }
    }
}

/// One random-walk step: `price * (1 + volatility * u)`, `u` uniform in [-1, 1]
fn step(rng: &mut StdRng, price: Decimal, volatility: f64) -> Decimal {
    if volatility <= 0.0 {
        return price;
    }
    let change: f64 = rng.gen_range(-1.0..=1.0);
    let next = price
        .to_f64()
        .map(|p| p * (1.0 + volatility * change))
        .and_then(Decimal::from_f64);
    match next {
        Some(next) if next > Decimal::ZERO => next.round_dp(price.scale().max(5)),
        _ => price,
    }
}

#[async_trait]
impl TradingGateway for SimulatedGateway {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.connections += 1;
        if state.connections == 1 {
            info!(
                "[gateway] Simulated market connected ({} symbols)",
                state.prices.len()
            );
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if state.connections == 0 {
            return Err(GatewayError::NotConnected);
        }
        state.connections -= 1;
        if state.connections == 0 {
            info!("[gateway] Simulated market disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connections > 0
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        let mid = {
            let mut guard = self.state.lock();
            if guard.connections == 0 {
                return Err(GatewayError::NotConnected);
            }
            let state = &mut *guard;
            let price = state
                .prices
                .get_mut(symbol)
                .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))?;
            *price = step(&mut state.rng, *price, self.config.volatility);
            *price
        };
        Ok(self.quote_at(symbol, mid))
    }

    async fn execute(&self, order: &OrderRequest) -> Result<Fill, GatewayError> {
        let mid = {
            let state = self.state.lock();
            if state.connections == 0 {
                return Err(GatewayError::NotConnected);
            }
            if let Some(reason) = &state.rejecting {
                return Err(GatewayError::Rejected(reason.clone()));
            }
            *state
                .prices
                .get(&order.symbol)
                .ok_or_else(|| GatewayError::UnknownSymbol(order.symbol.clone()))?
        };

        if order.size <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!(
                "size must be positive, got {}",
                order.size
            )));
        }

        let quote = self.quote_at(&order.symbol, mid);
        let price = match order.direction {
            Direction::Long => quote.ask + self.config.slippage,
            Direction::Short => quote.bid - self.config.slippage,
            Direction::Neutral => {
                return Err(GatewayError::Rejected("neutral order".to_string()));
            }
        };

        let fill = Fill {
            execution_id: Uuid::new_v4(),
            client_order_id: order.client_order_id,
            symbol: order.symbol.clone(),
            direction: order.direction,
            size: order.size,
            price,
            timestamp: Utc::now(),
        };
        debug!(
            "[gateway] Filled {:?} {} {} @ {}",
            fill.direction, fill.size, fill.symbol, fill.price
        );
        Ok(fill)
    }
}
