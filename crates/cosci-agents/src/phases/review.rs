use std::collections::BTreeMap;

use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, Phase, PhaseFallback, Record, Review};
use schemars::JsonSchema;
use serde::Deserialize;

use super::{schema_block, HypothesisSnapshot};
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub goal: String,
    pub hypothesis: HypothesisSnapshot,
    pub criteria: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReviewRecord {
    /// Overall merit between 0.0 and 1.0.
    pub overall_score: f64,
    /// Score per criterion between 0.0 and 1.0.
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub review_summary: String,
    /// One sentence per criterion explaining its score.
    #[serde(default)]
    pub detailed_feedback: BTreeMap<String, String>,
    /// Concrete suggestions for improvement.
    #[serde(default)]
    pub constructive_feedback: Suggestions,
    #[serde(default)]
    pub safety_ethical_concerns: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Suggestions {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl Suggestions {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            Self::None => Vec::new(),
            Self::One(text) => vec![text],
            Self::Many(items) => items,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub struct ReviewSpec;

impl PhaseSpec for ReviewSpec {
    type Input = ReviewInput;
    type Output = Review;
    const PHASE: Phase = Phase::Review;

    fn task(&self, input: &ReviewInput) -> String {
        format!(
            "Research goal: {}\n\nHypothesis {}: {}\n\nScore it on these criteria: {}.\n\n{}",
            input.goal,
            input.hypothesis.id,
            input.hypothesis.text,
            input.criteria.join(", "),
            schema_block::<ReviewRecord>()
        )
    }

    fn parse(&self, record: &Record, _input: &ReviewInput) -> Result<Review, ExtractionFailure> {
        let parsed: ReviewRecord = decode(record)?;
        if !parsed.overall_score.is_finite() || !(0.0..=1.0).contains(&parsed.overall_score) {
            return Err(ExtractionFailure::invalid_value(format!(
                "overall_score {} outside [0, 1]",
                parsed.overall_score
            )));
        }

        let mut review = Review::new(parsed.overall_score);
        review.criteria = parsed
            .scores
            .into_iter()
            .filter(|(_, score)| score.is_finite())
            .map(|(name, score)| (name, score.clamp(0.0, 1.0)))
            .collect();
        review.summary = parsed.review_summary.trim().to_string();
        review.rationale = parsed.detailed_feedback;
        review.feedback = parsed.constructive_feedback.into_vec();
        review.safety_concerns = parsed
            .safety_ethical_concerns
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none identified"));
        Ok(review)
    }

    fn fallback(&self, _input: &ReviewInput, fallback: PhaseFallback) -> Review {
        match fallback {
            PhaseFallback::NeutralReview { composite } => Review::fallback(composite),
            _ => Review::fallback(cosci_engine::review::NEUTRAL_SCORE),
        }
    }
}
