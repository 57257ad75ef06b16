//! Agent capability seam.
//!
//! An agent is anything that turns task text into response text. The
//! orchestrator never knows which vendor sits behind it; tests plug in
//! scripted stubs, the binary plugs in [`crate::client::OpenAiCompatAgent`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cosci_engine::Phase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level failure. Recovered by the runner like an empty response.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unreadable response body: {0}")]
    Body(String),
}

/// A single-method text-in, text-out agent.
///
/// Implementations may return empty or unstructured text. They must not be
/// relied on to terminate; the caller enforces the timeout.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, task: &str) -> Result<String, AgentError>;
}

/// The job an agent performs in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Supervisor,
    Generation,
    Review,
    Ranking,
    Tournament,
    MetaReview,
    Evolution,
    Proximity,
}

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        Self::Supervisor,
        Self::Generation,
        Self::Review,
        Self::Ranking,
        Self::Tournament,
        Self::MetaReview,
        Self::Evolution,
        Self::Proximity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Generation => "generation",
            Self::Review => "review",
            Self::Ranking => "ranking",
            Self::Tournament => "tournament",
            Self::MetaReview => "meta_review",
            Self::Evolution => "evolution",
            Self::Proximity => "proximity",
        }
    }

    /// The role that serves a phase.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Generation => Self::Generation,
            Phase::Review => Self::Review,
            Phase::Rank => Self::Ranking,
            Phase::Tournament => Self::Tournament,
            Phase::MetaReview => Self::MetaReview,
            Phase::Evolution => Self::Evolution,
            Phase::Cluster => Self::Proximity,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == name)
            .ok_or_else(|| format!("unknown agent role '{}'", s.trim()))
    }
}

/// One agent per role. The supervisor is optional.
#[derive(Clone)]
pub struct AgentSet {
    agents: HashMap<AgentRole, Arc<dyn AgentCapability>>,
}

impl AgentSet {
    /// No agents; fill with [`AgentSet::with_role`].
    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Share one agent across every role, supervisor included.
    pub fn uniform(agent: Arc<dyn AgentCapability>) -> Self {
        let agents = AgentRole::ALL
            .iter()
            .map(|role| (*role, Arc::clone(&agent)))
            .collect();
        Self { agents }
    }

    /// Share one agent across the seven phase roles, with no supervisor.
    pub fn without_supervisor(agent: Arc<dyn AgentCapability>) -> Self {
        let mut set = Self::uniform(agent);
        set.agents.remove(&AgentRole::Supervisor);
        set
    }

    /// Replace the agent serving `role`.
    pub fn with_role(mut self, role: AgentRole, agent: Arc<dyn AgentCapability>) -> Self {
        self.agents.insert(role, agent);
        self
    }

    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn AgentCapability>> {
        self.agents.get(&role).cloned()
    }

    pub fn supervisor(&self) -> Option<Arc<dyn AgentCapability>> {
        self.get(AgentRole::Supervisor)
    }

    /// Roles without an agent, supervisor excluded.
    pub fn missing_roles(&self) -> Vec<AgentRole> {
        AgentRole::ALL
            .into_iter()
            .filter(|role| *role != AgentRole::Supervisor && !self.agents.contains_key(role))
            .collect()
    }
}

impl fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut roles: Vec<_> = self
            .agents
            .iter()
            .map(|(role, agent)| format!("{role}={}", agent.name()))
            .collect();
        roles.sort();
        f.debug_struct("AgentSet").field("agents", &roles).finish()
    }
}
