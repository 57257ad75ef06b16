//! Agent-driven hypothesis evolution.
//!
//! The deterministic core (extraction, Elo, pairing, population) lives in
//! `cosci-engine`. This crate adds the agent seam, the per-phase task and
//! validation rules, the bounded phase runner and the orchestration loop.

pub mod agent;
pub mod client;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod phases;
pub mod prompts;
pub mod runner;
pub mod state_machine;
pub mod telemetry;

pub use agent::{AgentCapability, AgentError, AgentRole, AgentSet};
pub use config::{AgentEndpointConfig, EngineConfig};
pub use errors::EngineError;
pub use orchestrator::Orchestrator;
pub use telemetry::{RunResult, RunStatus};
