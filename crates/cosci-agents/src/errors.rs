//! Engine error taxonomy with recovery classification.
//!
//! Every error the orchestration layer can raise is represented here.
//! Callers ask `is_recoverable()` / `failure_kind()` instead of matching on
//! strings.
//!
//! ## Where each error is handled
//!
//! | Error              | Recovered at  | Effect                              |
//! |--------------------|---------------|-------------------------------------|
//! | EmptyResponse      | PhaseRunner   | retry once, then phase fallback     |
//! | MalformedResponse  | PhaseRunner   | retry once, then phase fallback     |
//! | Timeout            | PhaseRunner   | treated as an empty response        |
//! | AgentUnavailable   | PhaseRunner   | treated as an empty response        |
//! | VoidMatch          | Tournament    | match dropped, ratings untouched    |
//! | DegradedPopulation | Orchestrator  | run continues, status `degraded`    |
//! | Configuration      | n/a           | fatal before any phase runs         |
//! | Cancelled          | n/a           | run ends with status `aborted`      |

use std::time::Duration;

use cosci_engine::{ExtractionFailure, FailureKind, HypothesisId, PopulationError};
use thiserror::Error;

use crate::state_machine::IllegalTransition;

#[derive(Debug, Error)]
pub enum EngineError {
    // ── Recovered at the PhaseRunner ──────────────────────────────────────
    /// The agent returned nothing but whitespace.
    #[error("Empty response from {role}")]
    EmptyResponse { role: String },

    /// The agent's output could not be turned into the phase's record.
    #[error("Malformed response: {0}")]
    MalformedResponse(#[from] ExtractionFailure),

    /// The agent did not answer within the per-call timeout.
    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure reaching the agent.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    // ── Recovered at the phase level ──────────────────────────────────────
    /// The judge produced no usable winner for a match.
    #[error("Void match {a} vs {b}: {reason}")]
    VoidMatch {
        a: HypothesisId,
        b: HypothesisId,
        reason: String,
    },

    /// Every hypothesis scored at the floor, or every review was a fallback.
    #[error("Degraded population: {0}")]
    DegradedPopulation(String),

    // ── Fatal ─────────────────────────────────────────────────────────────
    /// Invalid configuration. Raised before any phase executes.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A merge step was handed ids that are not in the population.
    #[error("Population error: {0}")]
    Population(#[from] PopulationError),

    #[error(transparent)]
    State(#[from] IllegalTransition),

    /// Cooperative cancellation was observed between phases.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl EngineError {
    /// Returns `true` if the run can carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptyResponse { .. }
                | Self::MalformedResponse(_)
                | Self::Timeout(_)
                | Self::AgentUnavailable(_)
                | Self::VoidMatch { .. }
                | Self::DegradedPopulation(_)
        )
    }

    /// Metric label for errors recovered at the PhaseRunner.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::EmptyResponse { .. } => Some(FailureKind::EmptyResponse),
            Self::MalformedResponse(_) => Some(FailureKind::MalformedResponse),
            Self::Timeout(_) => Some(FailureKind::Timeout),
            Self::AgentUnavailable(_) => Some(FailureKind::AgentUnavailable),
            _ => None,
        }
    }

    pub fn empty(role: impl Into<String>) -> Self {
        Self::EmptyResponse { role: role.into() }
    }
}
