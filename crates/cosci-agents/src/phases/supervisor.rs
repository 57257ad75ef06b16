//! Supervisor research plan, produced before generation.
//!
//! Advisory only: an unusable plan means generation runs without guidance.

use cosci_engine::extraction::decode;
use cosci_engine::{ExtractionFailure, Phase, PhaseFallback, PhaseStatus, Record};
use schemars::JsonSchema;
use serde::Deserialize;

use super::schema_block;
use crate::runner::PhaseSpec;

#[derive(Debug, Clone)]
pub struct SupervisorInput {
    pub goal: String,
    pub target_count: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResearchPlan {
    /// One-paragraph restatement of the research goal.
    #[serde(default)]
    pub goal_summary: String,
    /// Areas the generated hypotheses should cover.
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Constraints every hypothesis must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// What would make a hypothesis successful.
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

impl ResearchPlan {
    fn render(&self) -> String {
        let mut out = Vec::new();
        if !self.goal_summary.trim().is_empty() {
            out.push(self.goal_summary.trim().to_string());
        }
        for (title, items) in [
            ("Focus areas", &self.focus_areas),
            ("Constraints", &self.constraints),
            ("Success criteria", &self.success_criteria),
        ] {
            let items: Vec<&str> = items
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect();
            if !items.is_empty() {
                out.push(format!("{title}:\n- {}", items.join("\n- ")));
            }
        }
        out.join("\n\n")
    }
}

pub struct SupervisorSpec;

impl PhaseSpec for SupervisorSpec {
    type Input = SupervisorInput;
    /// Rendered plan; `None` when no guidance is available.
    type Output = Option<String>;
    const PHASE: Phase = Phase::Generation;

    fn task(&self, input: &SupervisorInput) -> String {
        format!(
            "Research goal: {}\n\nThe team will generate {} hypotheses. Write the research plan.\n\n{}",
            input.goal,
            input.target_count,
            schema_block::<ResearchPlan>()
        )
    }

    fn parse(
        &self,
        record: &Record,
        _input: &SupervisorInput,
    ) -> Result<Option<String>, ExtractionFailure> {
        let plan: ResearchPlan = decode(record)?;
        let rendered = plan.render();
        if rendered.is_empty() {
            return Err(ExtractionFailure::invalid_value("research plan is empty"));
        }
        Ok(Some(rendered))
    }

    fn fallback(&self, _input: &SupervisorInput, _fallback: PhaseFallback) -> Option<String> {
        None
    }

    /// Missing guidance degrades the run but generation still proceeds.
    fn fallback_status(&self, _fallback: PhaseFallback) -> PhaseStatus {
        PhaseStatus::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosci_engine::{extract_record, FailureReason};

    fn input() -> SupervisorInput {
        SupervisorInput {
            goal: "Explain sleep regulation".into(),
            target_count: 4,
        }
    }

    #[test]
    fn test_plan_rendered() {
        let record = extract_record(
            r#"{"goal_summary": "Sleep.", "focus_areas": ["microbiome", " "], "constraints": []}"#,
        )
        .unwrap();
        let plan = SupervisorSpec.parse(&record, &input()).unwrap().unwrap();
        assert_eq!(plan, "Sleep.\n\nFocus areas:\n- microbiome");
    }

    #[test]
    fn test_empty_plan_rejected() {
        let record = extract_record(r#"{"focus_areas": []}"#).unwrap();
        let err = SupervisorSpec.parse(&record, &input()).unwrap_err();
        assert_eq!(err.reason, FailureReason::InvalidValue);
    }

    #[test]
    fn test_fallback_is_degraded_no_guidance() {
        let fb = Phase::Generation.fallback();
        assert_eq!(SupervisorSpec.fallback(&input(), fb), None);
        assert_eq!(SupervisorSpec.fallback_status(fb), PhaseStatus::Degraded);
    }

    #[test]
    fn test_task_mentions_goal_and_schema() {
        let task = SupervisorSpec.task(&input());
        assert!(task.contains("Explain sleep regulation"));
        assert!(task.contains("focus_areas"));
    }
}
