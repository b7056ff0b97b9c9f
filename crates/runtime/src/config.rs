//! Per-agent configuration
//!
//! The runtime only reads `interval_secs`; every other key is passed
//! through untouched in `settings` for the agent implementation.

use ftba_core::AgentId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Smallest interval the scheduler accepts
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Largest interval the scheduler accepts (one week)
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier (filled from the config map key when omitted)
    #[serde(default)]
    pub agent_id: AgentId,
    /// Implementation to instantiate (e.g. "technical_analysis")
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between processing cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    /// Implementation-specific options
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<AgentId>, kind: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: kind.into(),
            enabled: true,
            interval_secs: default_interval_secs(),
            settings: Map::new(),
        }
    }

    pub fn with_interval_secs(mut self, interval_secs: f64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Processing cycle spacing, clamped to `[1ms, MAX_INTERVAL]`
    pub fn interval(&self) -> Duration {
        if self.interval_secs.is_nan() || self.interval_secs <= 0.0 {
            return MIN_INTERVAL;
        }
        Duration::try_from_secs_f64(self.interval_secs)
            .map_or(MAX_INTERVAL, |interval| interval.clamp(MIN_INTERVAL, MAX_INTERVAL))
    }

    /// Read an optional setting; `Ok(None)` when the key is absent
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.settings
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
    }

    /// Read a setting, falling back to `default` when absent
    pub fn setting_or<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, serde_json::Error> {
        Ok(self.setting(key)?.unwrap_or(default))
    }

    /// Deserialize all settings into a typed struct
    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.settings.clone()))
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_interval_secs() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_settings() {
        let json = r#"{
            "kind": "technical_analysis",
            "interval_secs": 0.5,
            "signal_threshold": 0.7,
            "symbols": ["EUR/USD", "GBP/USD"]
        }"#;

        let config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind, "technical_analysis");
        assert!(config.enabled);
        assert!(config.agent_id.is_empty());
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.setting::<f64>("signal_threshold").unwrap(), Some(0.7));
        assert_eq!(
            config.setting::<Vec<String>>("symbols").unwrap().unwrap(),
            vec!["EUR/USD", "GBP/USD"]
        );
        assert!(!config.settings.contains_key("kind"));
    }

    #[test]
    fn test_setting_defaults_and_type_errors() {
        let config = AgentConfig::new("risk", "risk_management").with_setting("max_open_positions", "many");

        assert_eq!(config.setting_or("max_daily_loss", 500u32).unwrap(), 500);
        assert!(config.setting::<u32>("max_open_positions").is_err());
    }

    #[test]
    fn test_settings_as_typed_struct() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Limits {
            max_open_positions: usize,
            symbols: Vec<String>,
        }

        let config = AgentConfig::new("risk", "risk_management").with_setting("max_open_positions", 3);
        let limits: Limits = config.settings_as().unwrap();
        assert_eq!(limits.max_open_positions, 3);
        assert!(limits.symbols.is_empty());
    }

    #[test]
    fn test_interval_never_zero() {
        let config = AgentConfig::new("a", "test").with_interval_secs(0.0);
        assert_eq!(config.interval(), MIN_INTERVAL);

        let config = AgentConfig::new("a", "test").with_interval_secs(f64::NAN);
        assert_eq!(config.interval(), MIN_INTERVAL);
    }

    #[test]
    fn test_huge_interval_is_capped() {
        for secs in [1e20, f64::INFINITY, 8.0 * 24.0 * 3600.0] {
            let config = AgentConfig::new("a", "test").with_interval_secs(secs);
            assert_eq!(config.interval(), MAX_INTERVAL, "{secs}");
        }
        let config = AgentConfig::new("a", "test").with_interval_secs(3600.0);
        assert_eq!(config.interval(), Duration::from_secs(3600));
    }
}
