use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, HypothesisId, Phase, PhaseFallback, Record};
use schemars::JsonSchema;
use serde::Deserialize;

use super::{known_ids, listing, schema_block, HypothesisSnapshot};
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct RankInput {
    pub goal: String,
    pub hypotheses: Vec<HypothesisSnapshot>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RankRecord {
    /// Hypothesis ids (e.g. "H3"), strongest first.
    pub ranked_ids: Vec<String>,
    #[serde(default)]
    pub ranking_rationale: String,
}

pub struct RankSpec;

impl PhaseSpec for RankSpec {
    type Input = RankInput;
    type Output = Vec<HypothesisId>;
    const PHASE: Phase = Phase::Rank;

    fn task(&self, input: &RankInput) -> String {
        format!(
            "Research goal: {}\n\nRank every hypothesis below from strongest to weakest.\n\n{}\n\n{}",
            input.goal,
            listing(&input.hypotheses, true),
            schema_block::<RankRecord>()
        )
    }

    /// Unknown ids are dropped and omitted ones appended by score, so the
    /// output is always a full permutation of the input.
    fn parse(
        &self,
        record: &Record,
        input: &RankInput,
    ) -> Result<Vec<HypothesisId>, ExtractionFailure> {
        let parsed: RankRecord = decode(record)?;
        let mut ranked = known_ids(
            parsed.ranked_ids.iter().map(String::as_str),
            &input.hypotheses,
        );
        if ranked.is_empty() && !input.hypotheses.is_empty() {
            return Err(ExtractionFailure::invalid_value(
                "ranking names no known hypothesis",
            ));
        }
        for id in score_order(&input.hypotheses) {
            if !ranked.contains(&id) {
                ranked.push(id);
            }
        }
        Ok(ranked)
    }

    fn fallback(&self, input: &RankInput, _fallback: PhaseFallback) -> Vec<HypothesisId> {
        score_order(&input.hypotheses)
    }
}

/// Score descending, ties by id ascending.
fn score_order(hypotheses: &[HypothesisSnapshot]) -> Vec<HypothesisId> {
    let mut sorted: Vec<&HypothesisSnapshot> = hypotheses.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    sorted.into_iter().map(|h| h.id).collect()
}
