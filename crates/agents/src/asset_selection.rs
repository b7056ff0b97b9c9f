//! Tradable asset selection
//!
//! The agent watches a primary and a fallback list of symbols. Each check
//! first consults the weekly trading schedule; while the market is open a
//! symbol counts as available when the gateway can quote it. The
//! recommendation is the available primary symbols, or the available
//! fallback symbols when no primary one is.
//!
//! Results travel as custom messages: an `ASSET_AVAILABILITY` broadcast
//! after every check, and a directed `ASSET_AVAILABILITY` reply to each
//! `ASSET_AVAILABILITY_REQUEST`.

use crate::gateway::{GatewayError, TradingGateway};
use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use ftba_core::{Message, MessageType, Payload};
use ftba_runtime::{Agent, AgentConfig, AgentContext};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Custom message kind carrying an [`AssetAvailability`]
pub const ASSET_AVAILABILITY: &str = "ASSET_AVAILABILITY";

/// Custom message kind asking for a directed [`AssetAvailability`] reply
pub const ASSET_AVAILABILITY_REQUEST: &str = "ASSET_AVAILABILITY_REQUEST";

const MINUTES_PER_DAY: u16 = 24 * 60;
const MAX_TOLERANCE_MINUTES: u16 = 12 * 60;
const MAX_CHECK_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Time of day in minutes after midnight, written `"HH:MM"`
///
/// `"24:00"` is accepted as the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionTime(u16);

impl SessionTime {
    pub const fn at(hour: u16, minute: u16) -> Self {
        SessionTime(hour * 60 + minute)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl FromStr for SessionTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid session time '{s}', expected HH:MM");
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u16 = hour.parse().map_err(|_| invalid())?;
        let minute: u16 = minute.parse().map_err(|_| invalid())?;
        if minute >= 60 || hour > 24 || (hour == 24 && minute > 0) {
            return Err(invalid());
        }
        Ok(SessionTime::at(hour, minute))
    }
}

impl TryFrom<String> for SessionTime {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionTime> for String {
    fn from(time: SessionTime) -> Self {
        time.to_string()
    }
}

impl fmt::Display for SessionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Opening hours for one weekday
///
/// A session whose close is earlier than its open runs past midnight into
/// the next day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub open: SessionTime,
    pub close: SessionTime,
}

impl Session {
    pub const ALL_DAY: Session = Session::new(SessionTime::at(0, 0), SessionTime::at(24, 0));

    pub const fn new(open: SessionTime, close: SessionTime) -> Self {
        Self { open, close }
    }

    fn is_all_day(&self) -> bool {
        self.open.minutes() == 0 && self.close.minutes() == MINUTES_PER_DAY
    }

    /// Open and close in minutes from the session day's midnight, widened
    /// by `tolerance` on both sides
    fn window(&self, tolerance: i32) -> (i32, i32) {
        let open = i32::from(self.open.minutes());
        let mut close = i32::from(self.close.minutes());
        if self.close < self.open {
            close += i32::from(MINUTES_PER_DAY);
        }
        (open - tolerance, close + tolerance)
    }
}

/// Weekly trading schedule in UTC; days without a session are closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradingHours(HashMap<Weekday, Option<Session>>);

impl TradingHours {
    pub fn session(&self, day: Weekday) -> Option<&Session> {
        self.0.get(&day).and_then(Option::as_ref)
    }

    /// Whether `at` falls inside today's session or the part of
    /// yesterday's session that runs past midnight
    pub fn is_open(&self, at: DateTime<Utc>, tolerance_minutes: u16) -> bool {
        let minute = i32::try_from(at.hour() * 60 + at.minute()).unwrap_or(0);
        let tolerance = i32::from(tolerance_minutes);
        let today = at.weekday();

        if let Some(session) = self.session(today) {
            if session.is_all_day() {
                return true;
            }
            let (open, close) = session.window(tolerance);
            if (open..=close).contains(&minute) {
                return true;
            }
        }

        self.session(today.pred()).is_some_and(|session| {
            let (open, close) = session.window(tolerance);
            (open..=close).contains(&(minute + i32::from(MINUTES_PER_DAY)))
        })
    }
}

impl Default for TradingHours {
    /// Forex week: Sunday 22:00 to Friday 22:00
    fn default() -> Self {
        let friday = Session::new(SessionTime::at(0, 0), SessionTime::at(22, 0));
        let sunday = Session::new(SessionTime::at(22, 0), SessionTime::at(24, 0));
        Self(HashMap::from([
            (Weekday::Mon, Some(Session::ALL_DAY)),
            (Weekday::Tue, Some(Session::ALL_DAY)),
            (Weekday::Wed, Some(Session::ALL_DAY)),
            (Weekday::Thu, Some(Session::ALL_DAY)),
            (Weekday::Fri, Some(friday)),
            (Weekday::Sat, None),
            (Weekday::Sun, Some(sunday)),
        ]))
    }
}

/// Asset selection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AssetSelectionSettings {
    /// Preferred symbols, in priority order
    pub primary_assets: Vec<String>,
    /// Recommended only when no primary symbol is available
    pub fallback_assets: Vec<String>,
    /// Seconds between availability checks
    pub check_interval_secs: u64,
    /// Minutes the market counts as open before and after each session
    pub trading_hours_tolerance_minutes: u16,
    pub trading_hours: TradingHours,
}

impl Default for AssetSelectionSettings {
    fn default() -> Self {
        Self {
            primary_assets: ["EUR/USD", "GBP/USD", "USD/JPY", "AUD/USD"]
                .map(String::from)
                .to_vec(),
            fallback_assets: ["USD/CAD", "NZD/USD", "EUR/GBP"].map(String::from).to_vec(),
            check_interval_secs: 60,
            trading_hours_tolerance_minutes: 30,
            trading_hours: TradingHours::default(),
        }
    }
}

impl AssetSelectionSettings {
    /// Primary then fallback symbols, without duplicates
    pub fn watched(&self) -> Vec<&str> {
        let mut watched: Vec<&str> = Vec::new();
        for symbol in self.primary_assets.iter().chain(&self.fallback_assets) {
            if !watched.contains(&symbol.as_str()) {
                watched.push(symbol);
            }
        }
        watched
    }
}

/// Availability of one watched symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatus {
    pub symbol: String,
    pub available: bool,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

impl AssetStatus {
    fn unavailable(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            available: false,
            bid: None,
            ask: None,
        }
    }
}

/// Result of one availability check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAvailability {
    pub market_open: bool,
    /// Every watched symbol, primary first
    pub assets: Vec<AssetStatus>,
    pub recommended: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl AssetAvailability {
    pub fn available(&self) -> impl Iterator<Item = &str> {
        self.assets
            .iter()
            .filter(|asset| asset.available)
            .map(|asset| asset.symbol.as_str())
    }

    pub fn is_recommended(&self, symbol: &str) -> bool {
        self.recommended.iter().any(|s| s == symbol)
    }

    pub fn to_payload(&self) -> serde_json::Result<Payload> {
        Ok(Payload::custom(ASSET_AVAILABILITY, serde_json::to_value(self)?))
    }

    /// `Ok(None)` for payloads of any other kind
    pub fn from_payload(payload: &Payload) -> serde_json::Result<Option<Self>> {
        match payload {
            Payload::Custom { kind, body } if kind == ASSET_AVAILABILITY => {
                serde_json::from_value(body.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Payload asking the asset selection agent for a directed reply
pub fn availability_request() -> Payload {
    Payload::custom(ASSET_AVAILABILITY_REQUEST, serde_json::Value::Null)
}

pub struct AssetSelectionAgent {
    gateway: Arc<dyn TradingGateway>,
    settings: AssetSelectionSettings,
    check_every: Duration,
    latest: Option<AssetAvailability>,
    requests_served: u64,
}

impl AssetSelectionAgent {
    pub fn new(settings: AssetSelectionSettings, gateway: Arc<dyn TradingGateway>) -> anyhow::Result<Self> {
        if settings.watched().is_empty() {
            bail!("at least one primary or fallback asset is required");
        }
        if settings.trading_hours_tolerance_minutes > MAX_TOLERANCE_MINUTES {
            bail!(
                "trading_hours_tolerance_minutes must be at most {}",
                MAX_TOLERANCE_MINUTES
            );
        }
        let check_every = Some(settings.check_interval_secs)
            .filter(|secs| (1..=MAX_CHECK_INTERVAL_SECS).contains(secs))
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .with_context(|| {
                format!(
                    "check_interval_secs must be between 1 and {}",
                    MAX_CHECK_INTERVAL_SECS
                )
            })?;

        Ok(Self {
            gateway,
            settings,
            check_every,
            latest: None,
            requests_served: 0,
        })
    }

    pub fn from_config(config: &AgentConfig, gateway: Arc<dyn TradingGateway>) -> anyhow::Result<Self> {
        let settings = config
            .settings_as()
            .context("invalid asset selection settings")?;
        Self::new(settings, gateway)
    }

    /// Most recent check, if any
    pub fn latest(&self) -> Option<&AssetAvailability> {
        self.latest.as_ref()
    }

    pub fn is_market_open(&self, at: DateTime<Utc>) -> bool {
        self.settings
            .trading_hours
            .is_open(at, self.settings.trading_hours_tolerance_minutes)
    }

    /// Re-check every watched symbol as of `now`
    pub async fn check(&mut self, ctx: &AgentContext, now: DateTime<Utc>) -> &AssetAvailability {
        let market_open = self.is_market_open(now);
        let mut assets = Vec::new();

        for symbol in self.settings.watched() {
            if !market_open {
                assets.push(AssetStatus::unavailable(symbol));
                continue;
            }
            let status = match self.gateway.quote(symbol).await {
                Ok(quote) => AssetStatus {
                    symbol: symbol.to_string(),
                    available: true,
                    bid: Some(quote.bid),
                    ask: Some(quote.ask),
                },
                Err(GatewayError::UnknownSymbol(_)) => AssetStatus::unavailable(symbol),
                Err(e) => {
                    warn!("[{}] Cannot check {}: {}", ctx.id(), symbol, e);
                    AssetStatus::unavailable(symbol)
                }
            };
            assets.push(status);
        }

        let recommended = recommend(&self.settings, &assets);
        let availability = AssetAvailability {
            market_open,
            assets,
            recommended,
            checked_at: now,
        };

        if market_open {
            info!(
                "[{}] Available: {}; recommended: {}",
                ctx.id(),
                join_or_none(availability.available()),
                join_or_none(availability.recommended.iter().map(String::as_str))
            );
        } else {
            info!("[{}] Market closed according to trading hours", ctx.id());
        }

        self.latest.insert(availability)
    }

    fn is_check_due(&self, now: DateTime<Utc>) -> bool {
        self.latest
            .as_ref()
            .is_none_or(|latest| now.signed_duration_since(latest.checked_at) >= self.check_every)
    }
}

/// Available primary symbols, else available fallback symbols
fn recommend(settings: &AssetSelectionSettings, assets: &[AssetStatus]) -> Vec<String> {
    let available_in = |list: &[String]| -> Vec<String> {
        list.iter()
            .filter(|symbol| assets.iter().any(|a| a.available && a.symbol == **symbol))
            .cloned()
            .collect()
    };

    let primary = available_in(&settings.primary_assets);
    if primary.is_empty() {
        available_in(&settings.fallback_assets)
    } else {
        primary
    }
}

fn join_or_none<'a>(symbols: impl Iterator<Item = &'a str>) -> String {
    let joined = symbols.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}

#[async_trait]
impl Agent for AssetSelectionAgent {
    fn name(&self) -> &str {
        "AssetSelectionAgent"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([
            MessageType::SystemStatus,
            MessageType::custom(ASSET_AVAILABILITY_REQUEST),
        ])?;
        self.gateway.connect().await?;

        let payload = self.check(ctx, Utc::now()).await.to_payload()?;
        ctx.publish(payload);

        info!(
            "[{}] Watching {} assets, checking every {}s",
            ctx.id(),
            self.settings.watched().len(),
            self.settings.check_interval_secs
        );
        Ok(())
    }

    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        let now = Utc::now();
        if !self.is_check_due(now) {
            return Ok(());
        }

        let payload = self.check(ctx, now).await.to_payload()?;
        ctx.publish(payload);
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        match message.payload() {
            Payload::Custom { kind, .. } if kind == ASSET_AVAILABILITY_REQUEST => {
                let payload = match &self.latest {
                    Some(latest) => latest.to_payload()?,
                    None => self.check(ctx, Utc::now()).await.to_payload()?,
                };
                ctx.reply(message, payload);
                self.requests_served += 1;
                debug!("[{}] Sent asset availability to {}", ctx.id(), message.sender());
            }
            other => debug!("[{}] Ignoring {}", ctx.id(), other.message_type()),
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        self.gateway.disconnect().await?;
        info!(
            "[{}] Asset selection stopped after {} requests",
            ctx.id(),
            self.requests_served
        );
        Ok(())
    }
}
