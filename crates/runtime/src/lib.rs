//! FTBA Runtime - Agent lifecycle and supervision
//!
//! Runs user-supplied [`Agent`] implementations on top of the broker:
//!
//! - **Agent**: capability trait (`setup`, `process_cycle`, `handle_message`, `cleanup`)
//! - **AgentRunner**: one tokio task per agent, serialising cycles and message handling
//! - **Lifecycle**: `CREATED → SETUP → RUNNING → STOPPING → STOPPED`, plus `FAULTED`
//! - **Supervisor**: starts agents as a cohort, observes faults, bounded shutdown
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │       Supervisor        │
//!                    │  start_all / stop_all   │◄──── fault notices
//!                    └────────────┬────────────┘          ▲
//!                                 │ owns                  │
//!          ┌──────────────────────┼──────────────────┐    │
//!          ▼                      ▼                  ▼    │
//!   ┌─────────────┐       ┌─────────────┐     ┌─────────────┐
//!   │ AgentRunner │       │ AgentRunner │     │ AgentRunner │
//!   │  (1 task)   │       │  (1 task)   │     │  (1 task)   │
//!   │ tick │ mbox │       │ tick │ mbox │     │ tick │ mbox │
//!   └──────┴──▲───┘       └──────┴──▲───┘     └──────┴──▲───┘
//!             │                     │                   │
//!             └──────────── Arc<Broker> ────────────────┘
//! ```
//!
//! A fault inside one agent is caught at its task boundary; the agent moves
//! to `FAULTED`, is cleaned up and unregistered, and the others keep running.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod supervisor;

// Re-export main types
pub use agent::{Agent, AgentFactory};
pub use config::{AgentConfig, MAX_INTERVAL};
pub use context::AgentContext;
pub use error::{AgentError, SupervisorError};
pub use lifecycle::{AgentState, Lifecycle, Operation};
pub use runner::{AgentRunner, AgentSnapshot, FaultNotice, StopOutcome};
pub use supervisor::{
    AgentReport, FaultRecord, SUPERVISOR_ID, ShutdownReport, StartupReport, StatusReport,
    Supervisor, SupervisorConfig,
};
