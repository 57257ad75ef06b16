use std::collections::HashSet;

use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, HypothesisId, Phase, PhaseFallback, Record};
use schemars::JsonSchema;
use serde::Deserialize;

use super::{known_ids, listing, schema_block, HypothesisSnapshot};
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct ClusterInput {
    pub goal: String,
    pub hypotheses: Vec<HypothesisSnapshot>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClusterRecord {
    pub similarity_clusters: Vec<SimilarityCluster>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SimilarityCluster {
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub cluster_name: String,
    /// Hypothesis ids (e.g. "H3") in this cluster.
    pub member_ids: Vec<String>,
}

pub struct ClusterSpec;

impl PhaseSpec for ClusterSpec {
    type Input = ClusterInput;
    /// `(hypothesis, cluster_id)` assignments; each id at most once.
    type Output = Vec<(HypothesisId, String)>;
    const PHASE: Phase = Phase::Cluster;

    fn task(&self, input: &ClusterInput) -> String {
        format!(
            "Research goal: {}\n\nGroup these hypotheses by similarity:\n{}\n\n{}",
            input.goal,
            listing(&input.hypotheses, false),
            schema_block::<ClusterRecord>()
        )
    }

    fn parse(
        &self,
        record: &Record,
        input: &ClusterInput,
    ) -> Result<Vec<(HypothesisId, String)>, ExtractionFailure> {
        let parsed: ClusterRecord = decode(record)?;
        let mut assigned = HashSet::new();
        let mut assignments = Vec::new();
        for (n, cluster) in parsed.similarity_clusters.iter().enumerate() {
            let cluster_id = match cluster.cluster_id.trim() {
                "" => format!("cluster-{}", n + 1),
                id => id.to_string(),
            };
            let members = known_ids(
                cluster.member_ids.iter().map(String::as_str),
                &input.hypotheses,
            );
            for id in members {
                if assigned.insert(id) {
                    assignments.push((id, cluster_id.clone()));
                }
            }
        }
        if assignments.is_empty() {
            return Err(ExtractionFailure::invalid_value(
                "no known hypothesis assigned to a cluster",
            ));
        }
        Ok(assignments)
    }

    fn fallback(&self, _input: &ClusterInput, _fallback: PhaseFallback) -> Vec<(HypothesisId, String)> {
        Vec::new()
    }
}
