//! Elo rating update.
//!
//! Every rating change in a run goes through [`EloConfig::settle`], which
//! owns the run's single k-factor.

use serde::{Deserialize, Serialize};

/// Rating assigned to every hypothesis at creation, including evolved ones.
pub const INITIAL_RATING: i32 = 1200;

pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Result of a match from one side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    /// Actual score fed into the update: 1, 0 or 0.5.
    pub fn actual_score(self) -> f64 {
        match self {
            Self::Win => 1.0,
            Self::Loss => 0.0,
            Self::Draw => 0.5,
        }
    }

    /// The same result seen from the opponent's side.
    pub fn inverse(self) -> Self {
        match self {
            Self::Win => Self::Loss,
            Self::Loss => Self::Win,
            Self::Draw => Self::Draw,
        }
    }
}

/// Probability that `rating` beats `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Integer rating change for one side of a match.
pub fn rating_delta(rating: i32, opponent: i32, outcome: Outcome, k: f64) -> i32 {
    let delta = k * (outcome.actual_score() - expected_score(rating, opponent));
    delta.round() as i32
}

/// `rating + round(k * (actual - expected))`.
pub fn update_rating(rating: i32, opponent: i32, outcome: Outcome, k: f64) -> i32 {
    rating + rating_delta(rating, opponent, outcome, k)
}

/// Run-wide rating policy handed to the tournament.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloConfig {
    pub k_factor: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k_factor: DEFAULT_K_FACTOR,
        }
    }
}

impl EloConfig {
    pub fn new(k_factor: f64) -> Self {
        Self { k_factor }
    }

    /// New ratings for both sides, computed from the same pre-match pair.
    ///
    /// Side B moves by exactly the negation of side A's delta, so every
    /// settled match is zero-sum.
    pub fn settle(&self, rating_a: i32, rating_b: i32, outcome_a: Outcome) -> (i32, i32) {
        let delta = rating_delta(rating_a, rating_b, outcome_a, self.k_factor);
        (rating_a + delta, rating_b - delta)
    }
}
