//! Pipeline state machine: explicit phase states and legal transition guards.
//!
//! Provides a typed state model for the evolution loop so that:
//! 1. Every phase transition is auditable and logged.
//! 2. Out-of-order phases are rejected by `advance()`.
//! 3. The run result can replay the exact sequence of phases.
//!
//! The orchestrator calls `advance()` before entering each phase. Each call
//! validates the transition is legal and records it in the transition log.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of pipeline states.
///
/// Every run starts at `Generation` and terminates at `Complete`,
/// `Aborted` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Supervisor plan plus initial hypothesis generation.
    Generation,
    /// Attaching review records to every member.
    Review,
    /// Refreshing scores and producing the seeding order.
    Rank,
    /// Pairing, judging and Elo updates.
    Tournament,
    /// Producing the opaque insight block for evolution (iterations > 1).
    MetaReview,
    /// Refining the top-k into new hypotheses (iterations > 1).
    Evolution,
    /// Assigning per-iteration cluster ids (iterations > 1).
    Cluster,
    /// All iterations finished. Terminal.
    Complete,
    /// Empty population after generation. Terminal.
    Aborted,
    /// Cancellation observed between phases. Terminal.
    Cancelled,
}

impl PipelineState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted | Self::Cancelled)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation => write!(f, "Generation"),
            Self::Review => write!(f, "Review"),
            Self::Rank => write!(f, "Rank"),
            Self::Tournament => write!(f, "Tournament"),
            Self::MetaReview => write!(f, "MetaReview"),
            Self::Evolution => write!(f, "Evolution"),
            Self::Cluster => write!(f, "Cluster"),
            Self::Complete => write!(f, "Complete"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Legal transitions between pipeline states.
///
/// ```text
/// Generation → Review
/// Review     → Rank
/// Rank       → Tournament
/// Tournament → MetaReview | Cluster | Complete
/// Cluster    → MetaReview | Complete
/// MetaReview → Evolution
/// Evolution  → Review
/// (any non-terminal) → Aborted | Cancelled
/// ```
fn is_legal_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;

    if matches!(to, Aborted | Cancelled) && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Generation, Review)
            | (Review, Rank)
            | (Rank, Tournament)
            // First iteration ends after the tournament
            | (Tournament, MetaReview)
            | (Tournament, Complete)
            // Later iterations cluster before looping or finishing
            | (Tournament, Cluster)
            | (Cluster, MetaReview)
            | (Cluster, Complete)
            | (MetaReview, Evolution)
            | (Evolution, Review)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineState,
    pub to: PipelineState,
    /// Iteration number at the time of transition (1-based).
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The pipeline state machine.
///
/// Tracks the current state, enforces legal transitions, and keeps the
/// complete transition log for the run result.
pub struct StateMachine {
    current: PipelineState,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Generation`, iteration 1.
    pub fn new() -> Self {
        Self {
            current: PipelineState::Generation,
            iteration: 1,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: PipelineState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Aborted` from any non-terminal state.
    pub fn abort(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineState::Aborted, Some(reason))
    }

    /// Transition to `Cancelled` from any non-terminal state.
    pub fn cancel(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineState::Cancelled, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line history, e.g. `Generation → Complete (12ms, 5 transitions)`.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} → {} ({}ms, {} transitions)",
            PipelineState::Generation,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !self.transitions.is_empty() {
            let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
            summary.push_str(&format!(" [{}]", states.join(" → ")));
        }
        summary
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_iteration(sm: &mut StateMachine) {
        sm.advance(PipelineState::Review, None).unwrap();
        sm.advance(PipelineState::Rank, None).unwrap();
        sm.advance(PipelineState::Tournament, None).unwrap();
    }

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), PipelineState::Generation);
        assert_eq!(sm.iteration(), 1);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_single_iteration_path() {
        let mut sm = StateMachine::new();
        first_iteration(&mut sm);
        sm.advance(PipelineState::Complete, None).unwrap();
        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 4);
    }

    #[test]
    fn test_multi_iteration_path() {
        let mut sm = StateMachine::new();
        first_iteration(&mut sm);
        for iteration in 2..=3 {
            sm.set_iteration(iteration);
            sm.advance(PipelineState::MetaReview, None).unwrap();
            sm.advance(PipelineState::Evolution, None).unwrap();
            sm.advance(PipelineState::Review, None).unwrap();
            sm.advance(PipelineState::Rank, None).unwrap();
            sm.advance(PipelineState::Tournament, None).unwrap();
            sm.advance(PipelineState::Cluster, Some("clustering")).unwrap();
        }
        sm.advance(PipelineState::Complete, None).unwrap();
        assert_eq!(sm.transitions().len(), 3 + 2 * 6 + 1);
        assert_eq!(sm.transitions().last().map(|t| t.iteration), Some(3));
    }

    #[test]
    fn test_abort_and_cancel_from_any_non_terminal() {
        let states = [
            PipelineState::Generation,
            PipelineState::Review,
            PipelineState::Rank,
            PipelineState::Tournament,
            PipelineState::MetaReview,
            PipelineState::Evolution,
            PipelineState::Cluster,
        ];
        for state in states {
            let mut sm = StateMachine {
                current: state,
                iteration: 1,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            assert!(sm.abort("empty population").is_ok());
            assert_eq!(sm.current(), PipelineState::Aborted);

            let mut sm = StateMachine {
                current: state,
                iteration: 1,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            assert!(sm.cancel("ctrl-c").is_ok());
            assert_eq!(sm.current(), PipelineState::Cancelled);
        }
    }

    #[test]
    fn test_cannot_leave_terminal() {
        let mut sm = StateMachine::new();
        sm.abort("empty population").unwrap();
        let err = sm.advance(PipelineState::Review, None).unwrap_err();
        assert_eq!(err.from, PipelineState::Aborted);
        assert!(sm.cancel("late").is_err());
    }

    #[test]
    fn test_cannot_skip_review() {
        let mut sm = StateMachine::new();
        let err = sm.advance(PipelineState::Tournament, None).unwrap_err();
        assert_eq!(err.from, PipelineState::Generation);
        assert_eq!(err.to, PipelineState::Tournament);
    }

    #[test]
    fn test_evolution_must_follow_meta_review() {
        let mut sm = StateMachine::new();
        first_iteration(&mut sm);
        assert!(sm.advance(PipelineState::Evolution, None).is_err());
    }

    #[test]
    fn test_transition_record_has_reason() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::Review, Some("10 hypotheses")).unwrap();
        let record = &sm.transitions()[0];
        assert_eq!(record.from, PipelineState::Generation);
        assert_eq!(record.reason.as_deref(), Some("10 hypotheses"));
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::Review, None).unwrap();
        sm.abort("test").unwrap();
        let summary = sm.summary();
        assert!(summary.contains("Aborted"));
        assert!(summary.contains("2 transitions"));
    }
}
