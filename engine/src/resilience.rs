//! Resilience: status-tagged phase results.
//!
//! Agent calls never surface as hard errors. Each call is wrapped in a
//! [`PhaseResult`] carrying an explicit status and, when the agent output
//! was unusable, the failure that routed it to the phase fallback.
//!
//! ```text
//! agent call
//!   ├─ valid on first attempt        → Ok
//!   ├─ valid on retry                → Ok        (attempts = 2, warning)
//!   └─ empty / malformed / timeout   → fallback  (Degraded or Failed)
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome class of a single phase call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// The agent produced a valid result.
    Ok,
    /// The fallback stood in with a usable value.
    Degraded,
    /// The fallback stood in with nothing usable.
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Metric label for a recovered agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EmptyResponse,
    MalformedResponse,
    Timeout,
    AgentUnavailable,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty_response"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Timeout => write!(f, "timeout"),
            Self::AgentUnavailable => write!(f, "agent_unavailable"),
        }
    }
}

/// One request/response exchange with an agent, excerpted for the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub attempt: u32,
    pub task_excerpt: String,
    pub response_excerpt: String,
    pub latency: Duration,
}

/// A phase call's payload plus how it was obtained.
#[derive(Debug, Clone)]
pub struct PhaseResult<T> {
    pub payload: T,
    pub status: PhaseStatus,
    /// Agent invocations made (1 or 2).
    pub attempts: u32,
    /// Last failure seen; set whenever the fallback was used.
    pub failure: Option<FailureKind>,
    pub warnings: Vec<String>,
    pub exchanges: Vec<Exchange>,
    pub elapsed: Duration,
}

impl<T> PhaseResult<T> {
    pub fn ok(payload: T, attempts: u32) -> Self {
        Self {
            payload,
            status: PhaseStatus::Ok,
            attempts,
            failure: None,
            warnings: Vec::new(),
            exchanges: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// A fallback payload. `status` comes from the phase's fallback entry.
    pub fn fallback(payload: T, status: PhaseStatus, failure: FailureKind, warning: String) -> Self {
        Self {
            payload,
            status,
            attempts: 0,
            failure: Some(failure),
            warnings: vec![warning],
            exchanges: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == PhaseStatus::Ok
    }

    pub fn used_fallback(&self) -> bool {
        self.status != PhaseStatus::Ok
    }
}

/// Counts of call statuses within a phase or iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTally {
    pub ok: usize,
    pub degraded: usize,
    pub failed: usize,
}

impl PhaseTally {
    pub fn record(&mut self, status: PhaseStatus) {
        match status {
            PhaseStatus::Ok => self.ok += 1,
            PhaseStatus::Degraded => self.degraded += 1,
            PhaseStatus::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: PhaseTally) {
        self.ok += other.ok;
        self.degraded += other.degraded;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.ok + self.degraded + self.failed
    }

    /// True when calls were made and none of them succeeded.
    pub fn none_ok(&self) -> bool {
        self.total() > 0 && self.ok == 0
    }
}
