//! Hypothesis evolution engine core
//!
//! The deterministic half of the pipeline. Nothing in this crate talks to an
//! agent or awaits anything; the agent crate feeds raw text in and applies
//! the results through the types defined here.
//!
//! # Modules
//!
//! - [`extraction`]: recovers a JSON object from free-form agent output
//! - [`elo`] and [`pairing`]: rating update and tournament pairing strategies
//! - [`hypothesis`], [`review`], [`tournament`]: the entity model
//! - [`population`]: id-keyed arena with the explicit merge steps
//! - [`phase`]: the seven phases and their central fallback table
//! - [`resilience`]: status-tagged phase results

pub mod elo;
pub mod extraction;
pub mod hypothesis;
pub mod pairing;
pub mod phase;
pub mod population;
pub mod resilience;
pub mod review;
pub mod tournament;

pub use elo::{EloConfig, Outcome, INITIAL_RATING};
pub use extraction::{extract_record, ExtractionFailure, FailureReason, Record};
pub use hypothesis::{Hypothesis, HypothesisId, LineageEntry};
pub use pairing::{PairingStrategy, TournamentMode};
pub use phase::{Phase, PhaseFallback};
pub use population::{Population, PopulationError, Retirement};
pub use resilience::{FailureKind, PhaseResult, PhaseStatus};
pub use review::{AggregationPolicy, Review};
pub use tournament::{MatchOutcome, MatchRecord};
