//! Economic calendar releases
//!
//! The agent holds a configured calendar. Each cycle it publishes a
//! `FUNDAMENTAL_UPDATE` for every event whose release time has come, and
//! optionally an "Upcoming" notice ahead of the release.

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ftba_core::{Confidence, Direction, FundamentalUpdate, Message, MessageType, Payload};
use ftba_runtime::{Agent, AgentConfig, AgentContext};
use log::{debug, info};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const SOURCE: &str = "economic_calendar";

/// Longest accepted `after_secs` or `preview_secs`
pub const MAX_OFFSET_SECS: u64 = 366 * 24 * 60 * 60;

/// One scheduled release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event: String,
    pub currencies: Vec<String>,
    #[serde(default = "default_impact")]
    pub impact: Direction,
    #[serde(default = "default_confidence")]
    pub confidence: Confidence,
    /// Absolute release time; wins over `after_secs`
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    /// Release time relative to agent setup
    #[serde(default)]
    pub after_secs: u64,
    #[serde(default)]
    pub forecast: Option<Decimal>,
    #[serde(default)]
    pub previous: Option<Decimal>,
    #[serde(default)]
    pub actual: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CalendarEvent {
    pub fn new(event: impl Into<String>, currencies: &[&str], impact: Direction) -> Self {
        Self {
            event: event.into(),
            currencies: currencies.iter().map(|c| c.to_string()).collect(),
            impact,
            confidence: default_confidence(),
            at: None,
            after_secs: 0,
            forecast: None,
            previous: None,
            actual: None,
            description: None,
        }
    }

    pub fn after_secs(mut self, secs: u64) -> Self {
        self.after_secs = secs;
        self
    }

    pub fn with_figures(mut self, forecast: Decimal, previous: Decimal, actual: Decimal) -> Self {
        self.forecast = Some(forecast);
        self.previous = Some(previous);
        self.actual = Some(actual);
        self
    }

    fn release_time(&self, anchor: DateTime<Utc>) -> DateTime<Utc> {
        self.at.unwrap_or_else(|| shift(anchor, self.after_secs))
    }
}

/// Fundamental analysis settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FundamentalSettings {
    pub calendar: Vec<CalendarEvent>,
    /// Announce events this many seconds before release (0 disables)
    pub preview_secs: u64,
}

impl Default for FundamentalSettings {
    fn default() -> Self {
        Self {
            calendar: sample_calendar(),
            preview_secs: 0,
        }
    }
}

/// Built-in calendar used when none is configured
fn sample_calendar() -> Vec<CalendarEvent> {
    vec![
        CalendarEvent::new("Non-Farm Payrolls", &["USD"], Direction::Long)
            .after_secs(10)
            .with_figures(dec!(200), dec!(175), dec!(231)),
        CalendarEvent::new("CPI", &["EUR"], Direction::Long)
            .after_secs(30)
            .with_figures(dec!(2.3), dec!(2.2), dec!(2.4)),
        CalendarEvent::new("GDP", &["GBP"], Direction::Short)
            .after_secs(60)
            .with_figures(dec!(3.2), dec!(3.0), dec!(2.7)),
        CalendarEvent::new("Interest Rate", &["JPY"], Direction::Neutral)
            .after_secs(120)
            .with_figures(dec!(0.5), dec!(0.5), dec!(0.5)),
    ]
}

#[derive(Debug, Clone)]
struct Scheduled {
    due: DateTime<Utc>,
    event: CalendarEvent,
    previewed: bool,
}

pub struct FundamentalAnalysisAgent {
    settings: FundamentalSettings,
    schedule: Vec<Scheduled>,
    released: u64,
}

impl FundamentalAnalysisAgent {
    pub fn new(settings: FundamentalSettings) -> anyhow::Result<Self> {
        if settings.preview_secs > MAX_OFFSET_SECS {
            bail!(
                "preview_secs {} exceeds {}",
                settings.preview_secs,
                MAX_OFFSET_SECS
            );
        }
        if let Some(event) = settings
            .calendar
            .iter()
            .find(|event| event.after_secs > MAX_OFFSET_SECS)
        {
            bail!(
                "event '{}' after_secs {} exceeds {}",
                event.event,
                event.after_secs,
                MAX_OFFSET_SECS
            );
        }

        Ok(Self {
            settings,
            schedule: Vec::new(),
            released: 0,
        })
    }

    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let settings = config
            .settings_as()
            .context("invalid fundamental analysis settings")?;
        Self::new(settings)
    }

    /// Anchor relative release times and order the calendar
    fn load_calendar(&mut self, anchor: DateTime<Utc>) {
        self.schedule = self
            .settings
            .calendar
            .iter()
            .map(|event| Scheduled {
                due: event.release_time(anchor),
                event: event.clone(),
                previewed: false,
            })
            .collect();
        self.schedule.sort_by_key(|s| s.due);
    }

    /// Events still waiting for release
    pub fn pending(&self) -> usize {
        self.schedule.len()
    }

    /// Updates that became due at `now`, in release order
    fn due_updates(&mut self, now: DateTime<Utc>) -> Vec<FundamentalUpdate> {
        let mut updates = Vec::new();

        if self.settings.preview_secs > 0 {
            let horizon = shift(now, self.settings.preview_secs);
            for scheduled in self
                .schedule
                .iter_mut()
                .filter(|s| !s.previewed && s.due > now && s.due <= horizon)
            {
                scheduled.previewed = true;
                updates.push(preview(&scheduled.event, scheduled.due, now));
            }
        }

        let released = self.schedule.partition_point(|s| s.due <= now);
        for scheduled in self.schedule.drain(..released) {
            updates.push(release(&scheduled.event, now));
        }
        self.released += released as u64;

        updates
    }
}

/// `time + secs`, saturating at the latest representable time
fn shift(time: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|offset| time.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn release(event: &CalendarEvent, now: DateTime<Utc>) -> FundamentalUpdate {
    FundamentalUpdate {
        event: event.event.clone(),
        impact_currencies: event.currencies.clone(),
        impact: event.impact,
        confidence: event.confidence,
        forecast: event.forecast,
        previous: event.previous,
        actual: event.actual,
        source: Some(SOURCE.to_string()),
        description: event.description.clone(),
        timestamp: now,
    }
}

fn preview(event: &CalendarEvent, due: DateTime<Utc>, now: DateTime<Utc>) -> FundamentalUpdate {
    FundamentalUpdate {
        event: format!("Upcoming: {}", event.event),
        impact_currencies: event.currencies.clone(),
        impact: Direction::Neutral,
        confidence: Confidence::Low,
        forecast: event.forecast,
        previous: event.previous,
        actual: None,
        source: Some(SOURCE.to_string()),
        description: Some(format!("releases at {}", due.to_rfc3339())),
        timestamp: now,
    }
}

#[async_trait]
impl Agent for FundamentalAnalysisAgent {
    fn name(&self) -> &str {
        "FundamentalAnalysisAgent"
    }

    async fn setup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        ctx.subscribe([MessageType::SystemStatus, MessageType::TradeResult])?;
        self.load_calendar(Utc::now());
        info!(
            "[{}] Loaded economic calendar with {} events",
            ctx.id(),
            self.schedule.len()
        );
        Ok(())
    }

    async fn process_cycle(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        let updates = self.due_updates(Utc::now());
        if updates.is_empty() {
            return Ok(());
        }

        for update in &updates {
            info!(
                "[{}] {} ({}) impact {:?}",
                ctx.id(),
                update.event,
                update.impact_currencies.join(","),
                update.impact
            );
        }
        ctx.publish_batch(updates.into_iter().map(Payload::from));
        Ok(())
    }

    async fn handle_message(&mut self, ctx: &AgentContext, message: &Message) -> anyhow::Result<()> {
        if let Payload::TradeResult(result) = message.payload() {
            debug!(
                "[{}] Trade on {} closed with {}",
                ctx.id(),
                result.symbol,
                result.profit_loss
            );
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &AgentContext) -> anyhow::Result<()> {
        info!(
            "[{}] Calendar closed: {} released, {} pending",
            ctx.id(),
            self.released,
            self.schedule.len()
        );
        self.schedule.clear();
        Ok(())
    }
}

fn default_impact() -> Direction {
    Direction::Neutral
}

fn default_confidence() -> Confidence {
    Confidence::Medium
}
