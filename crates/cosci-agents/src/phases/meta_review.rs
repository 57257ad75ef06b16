use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, Phase, PhaseFallback, Record};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{listing, schema_block, HypothesisSnapshot};
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct MetaReviewInput {
    pub goal: String,
    pub hypotheses: Vec<HypothesisSnapshot>,
    /// One line per committed match of the previous tournament.
    pub match_summary: Vec<String>,
}

/// Requested shape. The insight itself is passed on verbatim.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct MetaReviewRecord {
    #[serde(default)]
    pub recurring_strengths: Vec<String>,
    #[serde(default)]
    pub recurring_weaknesses: Vec<String>,
    #[serde(default)]
    pub tournament_patterns: String,
    /// Advice the evolution agent should follow next iteration.
    #[serde(default)]
    pub guidance_for_evolution: String,
}

pub struct MetaReviewSpec;

impl PhaseSpec for MetaReviewSpec {
    type Input = MetaReviewInput;
    type Output = String;
    const PHASE: Phase = Phase::MetaReview;

    fn task(&self, input: &MetaReviewInput) -> String {
        let matches = if input.match_summary.is_empty() {
            "No matches were decided.".to_string()
        } else {
            input.match_summary.join("\n")
        };
        format!(
            "Research goal: {}\n\nCurrent hypotheses:\n{}\n\nTournament results:\n{matches}\n\n\
             Summarize the patterns across reviews and debates.\n\n{}",
            input.goal,
            listing(&input.hypotheses, true),
            schema_block::<MetaReviewRecord>()
        )
    }

    fn parse(&self, record: &Record, _input: &MetaReviewInput) -> Result<String, ExtractionFailure> {
        let _: MetaReviewRecord = decode(record)?;
        let has_content = record.values().any(|v| match v {
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Null => false,
            _ => true,
        });
        if !has_content {
            return Err(ExtractionFailure::invalid_value("meta-review is empty"));
        }
        serde_json::to_string_pretty(record)
            .map_err(|e| ExtractionFailure::invalid_value(e.to_string()))
    }

    fn fallback(&self, _input: &MetaReviewInput, fallback: PhaseFallback) -> String {
        match fallback {
            PhaseFallback::StaticInsight(text) => text.to_string(),
            _ => cosci_engine::phase::STATIC_INSIGHT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::test_support::snapshot;
    use cosci_engine::{extract_record, FailureReason, PhaseStatus};

    fn input() -> MetaReviewInput {
        MetaReviewInput {
            goal: "g".into(),
            hypotheses: vec![snapshot(1, "a", 0.4)],
            match_summary: vec![],
        }
    }

    #[test]
    fn test_insight_passed_through_with_extra_fields() {
        let record = extract_record(
            r#"{"recurring_weaknesses": ["vague mechanisms"], "mood": "optimistic"}"#,
        )
        .unwrap();
        let insight = MetaReviewSpec.parse(&record, &input()).unwrap();
        assert!(insight.contains("vague mechanisms"));
        assert!(insight.contains("optimistic"));
    }

    #[test]
    fn test_empty_insight_rejected() {
        let record = extract_record(r#"{"recurring_strengths": [], "tournament_patterns": " "}"#)
            .unwrap();
        let err = MetaReviewSpec.parse(&record, &input()).unwrap_err();
        assert_eq!(err.reason, FailureReason::InvalidValue);
    }

    #[test]
    fn test_fallback_is_static_insight() {
        let fb = Phase::MetaReview.fallback();
        assert_eq!(
            MetaReviewSpec.fallback(&input(), fb),
            "No meta-review available."
        );
        assert_eq!(MetaReviewSpec.fallback_status(fb), PhaseStatus::Degraded);
    }

    #[test]
    fn test_task_without_matches() {
        assert!(MetaReviewSpec.task(&input()).contains("No matches were decided."));
    }
}
