use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, Phase, PhaseFallback, Record};
use schemars::JsonSchema;
use serde::Deserialize;

use super::schema_block;
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub goal: String,
    pub target_count: usize,
    /// Supervisor plan, when one was produced.
    pub guidance: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerationRecord {
    pub hypotheses: Vec<GeneratedHypothesis>,
}

/// Agents sometimes return bare strings instead of objects; both are accepted.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum GeneratedHypothesis {
    Detailed {
        /// The hypothesis as a single testable statement.
        text: String,
        /// Why it is novel and significant.
        #[serde(default)]
        justification: String,
    },
    Plain(String),
}

impl GeneratedHypothesis {
    fn text(&self) -> &str {
        match self {
            Self::Detailed { text, .. } => text,
            Self::Plain(text) => text,
        }
    }
}

pub struct GenerationSpec;

impl PhaseSpec for GenerationSpec {
    type Input = GenerationInput;
    type Output = Vec<String>;
    const PHASE: Phase = Phase::Generation;

    fn task(&self, input: &GenerationInput) -> String {
        let guidance = input
            .guidance
            .as_deref()
            .map(|plan| format!("Research plan from the supervisor:\n{plan}\n\n"))
            .unwrap_or_default();
        format!(
            "Research goal: {}\n\n{guidance}Generate {} distinct hypotheses.\n\n{}",
            input.goal,
            input.target_count,
            schema_block::<GenerationRecord>()
        )
    }

    /// Minimal re-prompt: no plan, no schema, just the expected shape.
    fn retry_task(&self, input: &GenerationInput) -> String {
        format!(
            "Research goal: {}\n\nList {} research hypotheses. Reply with only this JSON: \
             {{\"hypotheses\": [{{\"text\": \"...\", \"justification\": \"...\"}}]}}",
            input.goal, input.target_count
        )
    }

    fn parse(
        &self,
        record: &Record,
        input: &GenerationInput,
    ) -> Result<Vec<String>, ExtractionFailure> {
        let generated: GenerationRecord = decode(record)?;
        let texts: Vec<String> = generated
            .hypotheses
            .iter()
            .map(|h| h.text().trim())
            .filter(|t| !t.is_empty())
            .take(input.target_count)
            .map(str::to_string)
            .collect();
        if texts.is_empty() {
            return Err(ExtractionFailure::invalid_value("no non-empty hypotheses"));
        }
        Ok(texts)
    }

    fn fallback(&self, _input: &GenerationInput, _fallback: PhaseFallback) -> Vec<String> {
        Vec::new()
    }
}
