//! The hypothesis entity.
//!
//! A hypothesis is created by generation or evolution and never has its text
//! edited. Its rating, counters, reviews and cluster assignment are only
//! mutated through [`crate::population::Population`], which enforces the
//! invariants that span more than one record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::elo::INITIAL_RATING;
use crate::review::{AggregationPolicy, Review, SCORE_FLOOR};

/// Stable run-unique identifier. Rendered as `H<n>` in agent-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypothesisId(pub u64);

impl fmt::Display for HypothesisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

impl FromStr for HypothesisId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('H')
            .or_else(|| trimmed.strip_prefix('h'))
            .unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(HypothesisId)
            .map_err(|_| format!("invalid hypothesis id '{s}'"))
    }
}

/// One ancestor in a hypothesis's provenance chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub id: HypothesisId,
    pub text: String,
    /// Iteration in which this ancestor was created.
    pub iteration: u32,
    /// Refinement summary the evolution agent gave when deriving the child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    id: HypothesisId,
    text: String,
    rating: i32,
    reviews: Vec<Review>,
    wins: u32,
    losses: u32,
    draws: u32,
    cluster_id: Option<String>,
    lineage: Vec<LineageEntry>,
    score: f64,
    created_in: u32,
}

impl Hypothesis {
    pub fn new(id: HypothesisId, text: impl Into<String>, created_in: u32) -> Self {
        Self {
            id,
            text: text.into(),
            rating: INITIAL_RATING,
            reviews: Vec::new(),
            wins: 0,
            losses: 0,
            draws: 0,
            cluster_id: None,
            lineage: Vec::new(),
            score: SCORE_FLOOR,
            created_in,
        }
    }

    /// A child of `parent`: fresh rating and counters, lineage extended by
    /// the parent itself.
    pub fn derive(
        id: HypothesisId,
        parent: &Hypothesis,
        text: impl Into<String>,
        refinement: Option<String>,
        created_in: u32,
    ) -> Self {
        let mut lineage = parent.lineage.clone();
        lineage.push(LineageEntry {
            id: parent.id,
            text: parent.text.clone(),
            iteration: parent.created_in,
            refinement,
        });
        Self {
            lineage,
            ..Self::new(id, text, created_in)
        }
    }

    pub fn id(&self) -> HypothesisId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rating(&self) -> i32 {
        self.rating
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn wins(&self) -> u32 {
        self.wins
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    pub fn draws(&self) -> u32 {
        self.draws
    }

    pub fn matches_played(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    /// Wins over matches played; zero before the first match.
    pub fn win_rate(&self) -> f64 {
        match self.matches_played() {
            0 => 0.0,
            played => f64::from(self.wins) / f64::from(played),
        }
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub fn lineage(&self) -> &[LineageEntry] {
        &self.lineage
    }

    pub fn parent(&self) -> Option<HypothesisId> {
        self.lineage.last().map(|entry| entry.id)
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn created_in(&self) -> u32 {
        self.created_in
    }

    pub(crate) fn push_review(&mut self, review: Review) {
        self.reviews.push(review);
    }

    pub(crate) fn recompute_score(&mut self, policy: &AggregationPolicy) {
        self.score = policy.aggregate(&self.reviews).composite;
    }

    pub(crate) fn set_rating(&mut self, rating: i32) {
        self.rating = rating;
    }

    pub(crate) fn record_win(&mut self) {
        self.wins += 1;
    }

    pub(crate) fn record_loss(&mut self) {
        self.losses += 1;
    }

    pub(crate) fn record_draw(&mut self) {
        self.draws += 1;
    }

    pub(crate) fn set_cluster(&mut self, cluster_id: Option<String>) {
        self.cluster_id = cluster_id;
    }
}
