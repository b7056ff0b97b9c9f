use crate::entities::{Confidence, Direction, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Output of technical analysis for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSignal {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Indicator that produced the signal (e.g. "MOVING_AVERAGE_CROSSOVER")
    pub indicator: String,
    pub direction: Direction,
    pub confidence: Confidence,
    /// Indicator value at signal time
    pub value: Decimal,
    /// Threshold the value was compared against
    pub threshold: Decimal,
    /// Last observed price
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Scheduled or released economic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalUpdate {
    pub event: String,
    /// Currencies affected by the event (e.g. ["USD"])
    pub impact_currencies: Vec<String>,
    pub impact: Direction,
    pub confidence: Confidence,
    pub forecast: Option<Decimal>,
    pub previous: Option<Decimal>,
    pub actual: Option<Decimal>,
    pub source: Option<String>,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FundamentalUpdate {
    /// True if any affected currency is part of `symbol` (e.g. "EUR/USD")
    pub fn affects(&self, symbol: &str) -> bool {
        self.impact_currencies
            .iter()
            .any(|ccy| symbol.split('/').any(|leg| leg.eq_ignore_ascii_case(ccy)))
    }

    /// Directional impact on `symbol`: a bullish USD event is bearish for
    /// pairs quoting USD as the second leg.
    pub fn impact_on(&self, symbol: &str) -> Direction {
        let mut legs = symbol.split('/');
        let base = legs.next().unwrap_or_default();
        let quote = legs.next().unwrap_or_default();
        let hits = |leg: &str| {
            self.impact_currencies
                .iter()
                .any(|ccy| ccy.eq_ignore_ascii_case(leg))
        };
        match (hits(base), hits(quote)) {
            (true, false) => self.impact,
            (false, true) => self.impact.opposite(),
            _ => Direction::Neutral,
        }
    }
}

/// Per-strategy performance summary and suggested weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub strategy_name: String,
    pub trades: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    /// Suggested capital weight in [0, 1]
    pub weight: Decimal,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}
