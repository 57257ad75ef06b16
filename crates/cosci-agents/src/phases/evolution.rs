use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, Phase, PhaseFallback, Record};
use schemars::JsonSchema;
use serde::Deserialize;

use super::{schema_block, HypothesisSnapshot};
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct EvolutionInput {
    pub goal: String,
    pub parent: HypothesisSnapshot,
    /// Meta-review insight from this iteration.
    pub insight: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EvolutionRecord {
    /// The improved hypothesis as a single statement.
    pub refined_hypothesis_text: String,
    /// What changed relative to the parent and why.
    #[serde(default)]
    pub refinement_summary: String,
}

/// Text and refinement note for a child hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolvedText {
    pub text: String,
    pub refinement: Option<String>,
}

pub struct EvolutionSpec;

impl PhaseSpec for EvolutionSpec {
    type Input = EvolutionInput;
    /// `None` means the parent produced no offspring this iteration.
    type Output = Option<EvolvedText>;
    const PHASE: Phase = Phase::Evolution;

    fn task(&self, input: &EvolutionInput) -> String {
        let parent = &input.parent;
        let mut task = format!(
            "Research goal: {}\n\nHypothesis {} (rating {}): {}\n",
            input.goal, parent.id, parent.rating, parent.text
        );
        if let Some(rationale) = &parent.rationale {
            task.push_str(&format!("\nLatest review: {rationale}\n"));
        }
        if !parent.feedback.is_empty() {
            task.push_str(&format!("\nReviewer suggestions:\n- {}\n", parent.feedback.join("\n- ")));
        }
        task.push_str(&format!(
            "\nMeta-review insight:\n{}\n\nPropose one refined hypothesis.\n\n{}",
            input.insight,
            schema_block::<EvolutionRecord>()
        ));
        task
    }

    fn parse(
        &self,
        record: &Record,
        input: &EvolutionInput,
    ) -> Result<Option<EvolvedText>, ExtractionFailure> {
        let evolved: EvolutionRecord = decode(record)?;
        let text = evolved.refined_hypothesis_text.trim();
        if text.is_empty() {
            return Err(ExtractionFailure::invalid_value("refined text is empty"));
        }
        if text == input.parent.text.trim() {
            return Err(ExtractionFailure::invalid_value(
                "refined text repeats the parent",
            ));
        }
        let refinement = Some(evolved.refinement_summary.trim().to_string()).filter(|s| !s.is_empty());
        Ok(Some(EvolvedText {
            text: text.to_string(),
            refinement,
        }))
    }

    fn fallback(&self, _input: &EvolutionInput, _fallback: PhaseFallback) -> Option<EvolvedText> {
        None
    }
}
