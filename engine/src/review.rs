//! Review records and score aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lowest composite score a review can carry. A population where every
/// member sits here after review trips the degraded-population gate.
pub const SCORE_FLOOR: f64 = 0.0;

/// Composite assigned by the review fallback.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Criteria every reviewer is asked to score. Extra domain criteria come
/// from configuration.
pub const DEFAULT_CRITERIA: [&str; 6] = [
    "soundness",
    "novelty",
    "relevance",
    "testability",
    "clarity",
    "impact",
];

/// One review of one hypothesis. Appended to the hypothesis, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Overall merit in `[0, 1]`.
    pub composite: f64,
    /// Named sub-scores in `[0, 1]`.
    #[serde(default)]
    pub criteria: BTreeMap<String, f64>,
    #[serde(default)]
    pub summary: String,
    /// Improvement suggestions, fed to the tournament judge as context.
    #[serde(default)]
    pub feedback: Vec<String>,
    /// Free-text rationale per criterion.
    #[serde(default)]
    pub rationale: BTreeMap<String, String>,
    #[serde(default)]
    pub safety_concerns: Option<String>,
    /// Produced by the phase fallback rather than an agent.
    #[serde(default)]
    pub fallback: bool,
}

impl Review {
    pub fn new(composite: f64) -> Self {
        Self {
            composite,
            criteria: BTreeMap::new(),
            summary: String::new(),
            feedback: Vec::new(),
            rationale: BTreeMap::new(),
            safety_concerns: None,
            fallback: false,
        }
    }

    /// Neutral review used when the reviewer's output is unusable.
    pub fn fallback(composite: f64) -> Self {
        Self {
            summary: "review unavailable".into(),
            fallback: true,
            ..Self::new(composite)
        }
    }

    pub fn with_criterion(mut self, name: impl Into<String>, score: f64) -> Self {
        self.criteria.insert(name.into(), score);
        self
    }

    /// Short context line for the tournament judge.
    pub fn rationale_digest(&self) -> Option<String> {
        if self.fallback {
            return None;
        }
        let mut parts = Vec::new();
        if !self.summary.is_empty() {
            parts.push(self.summary.clone());
        }
        parts.extend(self.feedback.iter().cloned());
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// How multiple reviews of one hypothesis combine into its score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Simple mean per criterion.
    #[default]
    Mean,
    /// Newest review weighs 1, each older one `decay` times the next.
    RecencyWeighted { decay: f64 },
}

/// Aggregated view over a hypothesis's review history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatedReview {
    pub composite: f64,
    pub criteria: BTreeMap<String, f64>,
    pub review_count: usize,
}

impl AggregationPolicy {
    /// Combine `reviews` (oldest first). No reviews aggregates to the floor.
    pub fn aggregate(&self, reviews: &[Review]) -> AggregatedReview {
        if reviews.is_empty() {
            return AggregatedReview {
                composite: SCORE_FLOOR,
                ..Default::default()
            };
        }

        let weights: Vec<f64> = match *self {
            Self::Mean => vec![1.0; reviews.len()],
            Self::RecencyWeighted { decay } => {
                let newest = reviews.len() - 1;
                (0..reviews.len())
                    .map(|i| decay.powi((newest - i) as i32))
                    .collect()
            }
        };

        let composite = weighted_mean(reviews.iter().map(|r| r.composite).zip(weights.iter().copied()))
            .unwrap_or(SCORE_FLOOR);

        let mut per_criterion: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
        for (review, &weight) in reviews.iter().zip(&weights) {
            for (name, &score) in &review.criteria {
                per_criterion
                    .entry(name.clone())
                    .or_default()
                    .push((score, weight));
            }
        }
        let criteria = per_criterion
            .into_iter()
            .filter_map(|(name, samples)| weighted_mean(samples).map(|mean| (name, mean)))
            .collect();

        AggregatedReview {
            composite,
            criteria,
            review_count: reviews.len(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Mean => Ok(()),
            Self::RecencyWeighted { decay } if decay > 0.0 && decay <= 1.0 => Ok(()),
            Self::RecencyWeighted { decay } => {
                Err(format!("recency decay must be in (0, 1], got {decay}"))
            }
        }
    }
}

fn weighted_mean(samples: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, total) = samples
        .into_iter()
        .fold((0.0, 0.0), |(sum, total), (value, weight)| {
            (sum + value * weight, total + weight)
        });
    (total > 0.0).then(|| sum / total)
}
