//! Match records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::elo::Outcome;
use crate::hypothesis::HypothesisId;

/// Declared result of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    AWins,
    BWins,
    Draw,
    /// Judging failed; no rating or counter changes.
    Void,
}

impl MatchOutcome {
    /// The outcome from side A's perspective, or `None` for a void match.
    pub fn for_a(self) -> Option<Outcome> {
        match self {
            Self::AWins => Some(Outcome::Win),
            Self::BWins => Some(Outcome::Loss),
            Self::Draw => Some(Outcome::Draw),
            Self::Void => None,
        }
    }

    pub fn is_void(self) -> bool {
        matches!(self, Self::Void)
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AWins => write!(f, "a_wins"),
            Self::BWins => write!(f, "b_wins"),
            Self::Draw => write!(f, "draw"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// Per-dimension judge scores, kept for audit only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub a: f64,
    pub b: f64,
}

/// What the judge decided, before it is committed against the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    pub outcome: MatchOutcome,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    #[serde(default)]
    pub void_reason: Option<String>,
}

impl MatchDecision {
    pub fn decided(outcome: MatchOutcome) -> Self {
        Self {
            outcome,
            summary: String::new(),
            dimension_scores: BTreeMap::new(),
            void_reason: None,
        }
    }

    pub fn void(reason: impl Into<String>) -> Self {
        Self {
            void_reason: Some(reason.into()),
            ..Self::decided(MatchOutcome::Void)
        }
    }
}

/// A committed match. Void matches keep `post_* == pre_*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub iteration: u32,
    pub round: usize,
    /// Position of the pair within its round.
    pub index: usize,
    pub a: HypothesisId,
    pub b: HypothesisId,
    pub pre_rating_a: i32,
    pub pre_rating_b: i32,
    pub outcome: MatchOutcome,
    pub post_rating_a: i32,
    pub post_rating_b: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Signed rating change for side A.
    pub fn delta_a(&self) -> i32 {
        self.post_rating_a - self.pre_rating_a
    }

    pub fn delta_b(&self) -> i32 {
        self.post_rating_b - self.pre_rating_b
    }
}
