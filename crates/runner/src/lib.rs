//! FTBA Runner - System entry point
//!
//! - **Config**: JSON system configuration with defaults and validation
//! - **Bootstrap**: configuration → broker + simulated market + supervisor
//!
//! The `ftba` binary loads a configuration, starts every enabled agent and
//! runs until Ctrl-C or a fixed duration, then stops the agents within the
//! configured shutdown timeout.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{BootstrapError, TradingSystem};
pub use config::{ConfigError, SystemConfig, SystemSection};
