//! Pipeline phases and the central fallback table.
//!
//! Every phase that calls an agent has exactly one documented fallback,
//! declared here and nowhere else:
//!
//! ```text
//! Generation  → empty batch            (failed; trips the abort gate)
//! Review      → neutral review (0.5)   (degraded)
//! Rank        → order by score         (degraded)
//! Tournament  → void match             (failed; no rating change)
//! MetaReview  → static insight text    (degraded)
//! Evolution   → no offspring           (failed; parent kept)
//! Cluster     → leave unclustered      (degraded)
//! ```

use serde::{Deserialize, Serialize};

use crate::resilience::PhaseStatus;
use crate::review::NEUTRAL_SCORE;

/// Insight text used when meta-review produces nothing usable.
pub const STATIC_INSIGHT: &str = "No meta-review available.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generation,
    Review,
    Rank,
    Tournament,
    MetaReview,
    Evolution,
    Cluster,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Self::Generation,
        Self::Review,
        Self::Rank,
        Self::Tournament,
        Self::MetaReview,
        Self::Evolution,
        Self::Cluster,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Review => "review",
            Self::Rank => "rank",
            Self::Tournament => "tournament",
            Self::MetaReview => "meta_review",
            Self::Evolution => "evolution",
            Self::Cluster => "cluster",
        }
    }

    /// The fallback applied when this phase's agent output is unusable.
    pub fn fallback(self) -> PhaseFallback {
        match self {
            Self::Generation => PhaseFallback::EmptyBatch,
            Self::Review => PhaseFallback::NeutralReview {
                composite: NEUTRAL_SCORE,
            },
            Self::Rank => PhaseFallback::ScoreOrder,
            Self::Tournament => PhaseFallback::VoidMatch,
            Self::MetaReview => PhaseFallback::StaticInsight(STATIC_INSIGHT),
            Self::Evolution => PhaseFallback::NoOffspring,
            Self::Cluster => PhaseFallback::Unclustered,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a phase produces in place of an agent result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseFallback {
    EmptyBatch,
    NeutralReview { composite: f64 },
    ScoreOrder,
    VoidMatch,
    StaticInsight(&'static str),
    NoOffspring,
    Unclustered,
}

impl PhaseFallback {
    /// Status reported for a call that ended in this fallback.
    ///
    /// Fallbacks that still yield a usable value are `Degraded`; those that
    /// yield nothing are `Failed`.
    pub fn status(self) -> PhaseStatus {
        match self {
            Self::EmptyBatch | Self::VoidMatch | Self::NoOffspring => PhaseStatus::Failed,
            Self::NeutralReview { .. }
            | Self::ScoreOrder
            | Self::StaticInsight(_)
            | Self::Unclustered => PhaseStatus::Degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_phase_has_a_fallback() {
        for phase in Phase::ALL {
            // Exhaustive match in `fallback` guarantees this; check statuses are never Ok.
            assert_ne!(phase.fallback().status(), PhaseStatus::Ok, "{phase}");
        }
    }

    #[test]
    fn test_review_fallback_is_neutral() {
        assert_eq!(
            Phase::Review.fallback(),
            PhaseFallback::NeutralReview { composite: 0.5 }
        );
    }

    #[test]
    fn test_empty_results_are_failed() {
        assert_eq!(Phase::Generation.fallback().status(), PhaseStatus::Failed);
        assert_eq!(Phase::Tournament.fallback().status(), PhaseStatus::Failed);
        assert_eq!(Phase::Evolution.fallback().status(), PhaseStatus::Failed);
        assert_eq!(Phase::Rank.fallback().status(), PhaseStatus::Degraded);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::MetaReview.to_string(), "meta_review");
        let json = serde_json::to_string(&Phase::MetaReview).unwrap();
        assert_eq!(json, "\"meta_review\"");
    }
}
