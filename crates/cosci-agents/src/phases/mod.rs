//! Phase definitions: task text, record validation and fallback per phase.
//!
//! Each module defines the record the agent is asked to return (with a
//! `schemars` schema embedded in the task) and a [`crate::runner::PhaseSpec`]
//! implementation. Workers only ever see [`HypothesisSnapshot`]s.

pub mod cluster;
pub mod evolution;
pub mod generation;
pub mod meta_review;
pub mod rank;
pub mod review;
pub mod supervisor;
pub mod tournament;

use cosci_engine::{Hypothesis, HypothesisId};
use schemars::JsonSchema;

use crate::prompts::respond_with_schema;

/// Immutable copy of the parts of a hypothesis a worker may see.
#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisSnapshot {
    pub id: HypothesisId,
    pub text: String,
    pub rating: i32,
    pub score: f64,
    /// Digest of the latest non-fallback review.
    pub rationale: Option<String>,
    /// Feedback items from the latest review.
    pub feedback: Vec<String>,
}

impl From<&Hypothesis> for HypothesisSnapshot {
    fn from(h: &Hypothesis) -> Self {
        let latest = h.reviews().iter().rev().find(|r| !r.fallback);
        Self {
            id: h.id(),
            text: h.text().to_string(),
            rating: h.rating(),
            score: h.score(),
            rationale: latest.and_then(|r| r.rationale_digest()),
            feedback: latest.map(|r| r.feedback.clone()).unwrap_or_default(),
        }
    }
}

/// Schema instruction block for record type `T`.
pub(crate) fn schema_block<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    let json = serde_json::to_string_pretty(&schema).unwrap_or_default();
    respond_with_schema(&json)
}

/// `H3: text` lines for a list of snapshots.
pub(crate) fn listing(hypotheses: &[HypothesisSnapshot], with_scores: bool) -> String {
    hypotheses
        .iter()
        .map(|h| {
            if with_scores {
                format!(
                    "{}: {} (score {:.2}, rating {})",
                    h.id, h.text, h.score, h.rating
                )
            } else {
                format!("{}: {}", h.id, h.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse agent-supplied ids, keeping only those in `known`, first occurrence wins.
pub(crate) fn known_ids<'a>(
    raw: impl IntoIterator<Item = &'a str>,
    known: &[HypothesisSnapshot],
) -> Vec<HypothesisId> {
    let mut ids = Vec::new();
    for candidate in raw {
        if let Ok(id) = candidate.parse::<HypothesisId>() {
            if known.iter().any(|h| h.id == id) && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn snapshot(id: u64, text: &str, score: f64) -> HypothesisSnapshot {
        HypothesisSnapshot {
            id: HypothesisId(id),
            text: text.to_string(),
            rating: 1200,
            score,
            rationale: None,
            feedback: Vec::new(),
        }
    }
}
