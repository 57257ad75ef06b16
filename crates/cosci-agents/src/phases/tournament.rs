//! Pairwise tournament judging.
//!
//! The judge sees two snapshots and declares a winner. When no valid judge
//! record can be read but the raw text still holds a `"winner": "a"` style
//! fragment, that winner is accepted with an empty summary. Anything else
//! voids the match.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use cosci_engine::extraction::{decode, extract_record};
use cosci_engine::tournament::{DimensionScore, MatchDecision};
use cosci_engine::{ExtractionFailure, MatchOutcome, Phase, PhaseFallback, Record};
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{schema_block, HypothesisSnapshot};
use crate::runner::PhaseSpec;

static WINNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"winner"\s*:\s*"?(hypothesis[ _]?a|hypothesis[ _]?b|a|b|draw|tie)"?\s*(?:[,}]|$)"#)
        .expect("WINNER_RE regex should compile")
});

#[derive(Debug, Clone)]
pub struct MatchInput {
    pub goal: String,
    pub a: HypothesisSnapshot,
    pub b: HypothesisSnapshot,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JudgeRecord {
    /// "A", "B" or "draw".
    pub winner: String,
    #[serde(default)]
    pub decision_summary: String,
    /// Optional per-dimension scores, e.g. {"novelty": {"a": 0.7, "b": 0.4}}.
    #[serde(default)]
    pub dimension_scores: BTreeMap<String, JudgeScores>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JudgeScores {
    #[serde(alias = "hypothesis_a")]
    pub a: f64,
    #[serde(alias = "hypothesis_b")]
    pub b: f64,
}

/// Map the judge's free-form winner label onto an outcome.
pub fn normalize_winner(label: &str) -> Option<MatchOutcome> {
    let label = label.trim().to_ascii_lowercase().replace(['_', '-'], " ");
    match label.as_str() {
        "a" | "hypothesis a" | "hypothesisa" => Some(MatchOutcome::AWins),
        "b" | "hypothesis b" | "hypothesisb" => Some(MatchOutcome::BWins),
        "draw" | "tie" => Some(MatchOutcome::Draw),
        _ => None,
    }
}

pub struct TournamentSpec;

impl PhaseSpec for TournamentSpec {
    type Input = MatchInput;
    type Output = MatchDecision;
    const PHASE: Phase = Phase::Tournament;

    fn task(&self, input: &MatchInput) -> String {
        format!(
            "Research goal: {}\n\n{}\n\n{}\n\nWhich hypothesis better serves the goal?\n\n{}",
            input.goal,
            contender("A", &input.a),
            contender("B", &input.b),
            schema_block::<JudgeRecord>()
        )
    }

    fn parse(&self, record: &Record, _input: &MatchInput) -> Result<MatchDecision, ExtractionFailure> {
        let judged: JudgeRecord = decode(record)?;
        let outcome = normalize_winner(&judged.winner).ok_or_else(|| {
            ExtractionFailure::invalid_value(format!("unrecognized winner '{}'", judged.winner))
        })?;
        let mut decision = MatchDecision::decided(outcome);
        decision.summary = judged.decision_summary.trim().to_string();
        decision.dimension_scores = judged
            .dimension_scores
            .into_iter()
            .filter(|(_, s)| s.a.is_finite() && s.b.is_finite())
            .map(|(name, s)| (name, DimensionScore { a: s.a, b: s.b }))
            .collect();
        Ok(decision)
    }

    fn parse_response(&self, raw: &str, input: &MatchInput) -> Result<MatchDecision, ExtractionFailure> {
        let failure = match extract_record(raw) {
            Ok(record) => match self.parse(&record, input) {
                Ok(decision) => return Ok(decision),
                Err(f) => f.with_raw(raw),
            },
            Err(f) => f,
        };
        WINNER_RE
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .and_then(|m| normalize_winner(m.as_str()))
            .map(MatchDecision::decided)
            .ok_or(failure)
    }

    fn fallback(&self, _input: &MatchInput, _fallback: PhaseFallback) -> MatchDecision {
        MatchDecision::void("judge output unusable")
    }
}

fn contender(label: &str, h: &HypothesisSnapshot) -> String {
    let mut out = format!("Hypothesis {label} ({}): {}", h.id, h.text);
    if let Some(rationale) = &h.rationale {
        out.push_str(&format!("\nReview of {label}: {rationale}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::test_support::snapshot;
    use cosci_engine::{FailureReason, PhaseStatus};

    fn input() -> MatchInput {
        MatchInput {
            goal: "g".into(),
            a: snapshot(1, "first", 0.5),
            b: snapshot(2, "second", 0.5),
        }
    }

    #[test]
    fn test_winner_labels_normalized() {
        assert_eq!(normalize_winner("A"), Some(MatchOutcome::AWins));
        assert_eq!(normalize_winner(" Hypothesis_B "), Some(MatchOutcome::BWins));
        assert_eq!(normalize_winner("Tie"), Some(MatchOutcome::Draw));
        assert_eq!(normalize_winner("both"), None);
    }

    #[test]
    fn test_judge_record_parsed() {
        let raw = r#"{"winner": "B", "decision_summary": "More testable.",
            "dimension_scores": {"novelty": {"hypothesis_a": 0.4, "hypothesis_b": 0.8}}}"#;
        let decision = TournamentSpec.parse_response(raw, &input()).unwrap();
        assert_eq!(decision.outcome, MatchOutcome::BWins);
        assert_eq!(decision.summary, "More testable.");
        assert_eq!(decision.dimension_scores["novelty"], DimensionScore { a: 0.4, b: 0.8 });
    }

    #[test]
    fn test_winner_recovered_from_broken_json() {
        let raw = r#"Verdict: {"winner": "A", "decision_summary": "cut off mid"#;
        let decision = TournamentSpec.parse_response(raw, &input()).unwrap();
        assert_eq!(decision.outcome, MatchOutcome::AWins);
        assert!(decision.summary.is_empty());
    }

    #[test]
    fn test_unknown_winner_is_invalid() {
        let raw = r#"{"winner": "neither"}"#;
        let err = TournamentSpec.parse_response(raw, &input()).unwrap_err();
        assert_eq!(err.reason, FailureReason::InvalidValue);
    }

    #[test]
    fn test_winner_recovered_when_record_incomplete() {
        let raw = r#"{"verdict": {"winner": "draw"}, "notes": "close call"}"#;
        let decision = TournamentSpec.parse_response(raw, &input()).unwrap();
        assert_eq!(decision.outcome, MatchOutcome::Draw);
    }

    #[test]
    fn test_no_winner_anywhere_fails() {
        let err = TournamentSpec
            .parse_response("I cannot decide.", &input())
            .unwrap_err();
        assert_eq!(err.reason, FailureReason::NoStructuredRecord);
    }

    #[test]
    fn test_fallback_voids_match() {
        let fb = Phase::Tournament.fallback();
        let decision = TournamentSpec.fallback(&input(), fb);
        assert!(decision.outcome.is_void());
        assert_eq!(decision.void_reason.as_deref(), Some("judge output unusable"));
        assert_eq!(TournamentSpec.fallback_status(fb), PhaseStatus::Failed);
    }

    #[test]
    fn test_task_labels_both_sides() {
        let task = TournamentSpec.task(&input());
        assert!(task.contains("Hypothesis A (H1): first"));
        assert!(task.contains("Hypothesis B (H2): second"));
    }
}
