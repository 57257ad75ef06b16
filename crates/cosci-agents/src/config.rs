//! Run configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (applied by `main.rs`)
//! 2. `COSCI_*` environment variables
//! 3. TOML file passed with `--config`
//! 4. Built-in defaults
//!
//! `validate()` runs once, before any phase, and is the only place a
//! `Configuration` error is raised.
//!
//! Per-role system prompts follow the same layering: `[agent.role_prompts]`
//! in the file, `COSCI_PROMPT_<ROLE>` in the environment, then
//! `--role-prompt <role>=<file>` on the command line.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use cosci_engine::elo::{EloConfig, DEFAULT_K_FACTOR};
use cosci_engine::pairing::{PairingStrategy, TournamentMode, DEFAULT_MATCHES_PER_HYPOTHESIS};
use cosci_engine::review::DEFAULT_CRITERIA;
use cosci_engine::AggregationPolicy;
use serde::{Deserialize, Serialize};

use crate::agent::AgentRole;
use crate::prompts::system_prompt;
use crate::errors::EngineError;

/// Default OpenAI-compatible base URL (local vLLM / llama.cpp server).
const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";
const DEFAULT_MODEL: &str = "default";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4096;

const DEFAULT_TARGET_COUNT: usize = 10;
const DEFAULT_MAX_ITERATIONS: u32 = 3;
const DEFAULT_EVOLUTION_TOP_K: usize = 3;
const DEFAULT_CLUSTER_MIN_POPULATION: usize = 4;
const DEFAULT_CONCURRENCY_LIMIT: usize = 4;
const DEFAULT_PER_CALL_TIMEOUT_SECS: f64 = 120.0;
const DEFAULT_TRANSCRIPT_LIMIT: usize = 500;

const ENV_TARGET_COUNT: &str = "COSCI_TARGET_COUNT";
const ENV_MAX_ITERATIONS: &str = "COSCI_MAX_ITERATIONS";
const ENV_TOURNAMENT_MODE: &str = "COSCI_TOURNAMENT_MODE";
const ENV_K_FACTOR: &str = "COSCI_K_FACTOR";
const ENV_EVOLUTION_TOP_K: &str = "COSCI_EVOLUTION_TOP_K";
const ENV_CLUSTER_MIN_POPULATION: &str = "COSCI_CLUSTER_MIN_POPULATION";
const ENV_RANDOM_SEED: &str = "COSCI_RANDOM_SEED";
const ENV_CONCURRENCY_LIMIT: &str = "COSCI_CONCURRENCY_LIMIT";
const ENV_PER_CALL_TIMEOUT_SECS: &str = "COSCI_PER_CALL_TIMEOUT_SECS";
const ENV_MAX_POPULATION: &str = "COSCI_MAX_POPULATION";
const ENV_BASE_URL: &str = "COSCI_BASE_URL";
const ENV_API_KEY: &str = "COSCI_API_KEY";
const ENV_MODEL: &str = "COSCI_MODEL";
const ENV_PROMPT_PREFIX: &str = "COSCI_PROMPT_";

/// OpenAI-compatible endpoint shared by every agent role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentEndpointConfig {
    pub base_url: String,
    /// Never written back out; read from the file or `COSCI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-role model overrides keyed by role name, e.g. `tournament = "bigger-judge"`.
    pub role_models: BTreeMap<String, String>,
    /// Per-role system prompt overrides keyed by role name.
    pub role_prompts: BTreeMap<String, String>,
    /// Ask the supervisor for a research plan before generation.
    pub use_supervisor: bool,
}

impl Default for AgentEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            role_models: BTreeMap::new(),
            role_prompts: BTreeMap::new(),
            use_supervisor: true,
        }
    }
}

impl AgentEndpointConfig {
    pub fn model_for(&self, role: AgentRole) -> &str {
        self.role_models
            .get(role.as_str())
            .map(String::as_str)
            .unwrap_or(&self.model)
    }

    /// The configured override for `role`, or its built-in preamble.
    pub fn prompt_for(&self, role: AgentRole) -> &str {
        self.role_prompts
            .get(role.as_str())
            .map(String::as_str)
            .unwrap_or_else(|| system_prompt(role))
    }

    /// Read a `role=path` assignment and install the file as that role's prompt.
    pub fn set_role_prompt_file(&mut self, assignment: &str) -> Result<()> {
        let (role, path) = assignment
            .split_once('=')
            .with_context(|| format!("expected <role>=<file>, got '{assignment}'"))?;
        let role: AgentRole = role.parse().map_err(anyhow::Error::msg)?;
        let path = Path::new(path.trim());
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {role} prompt from {}", path.display()))?;
        self.role_prompts.insert(role.as_str().to_string(), prompt);
        Ok(())
    }

    fn validate_role_maps(&self) -> Result<(), EngineError> {
        for (name, map) in [("role_models", &self.role_models), ("role_prompts", &self.role_prompts)] {
            for (role, value) in map {
                role.parse::<AgentRole>()
                    .map_err(|e| config_error(format!("{name}: {e}")))?;
                if value.trim().is_empty() {
                    return Err(config_error(format!("{name}.{role} must not be empty")));
                }
            }
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hypotheses requested from the generation phase.
    pub target_count: usize,
    pub max_iterations: u32,
    /// `random`, `round_robin` or `proximity` (alias `swiss`).
    pub tournament_mode: String,
    pub k_factor: f64,
    pub evolution_top_k: usize,
    pub cluster_min_population: usize,
    pub random_seed: Option<u64>,
    pub concurrency_limit: usize,
    pub per_call_timeout_secs: f64,
    /// Random mode only.
    pub matches_per_hypothesis: usize,
    /// Proximity mode only; defaults to ceil(log2 n).
    pub proximity_rounds: Option<usize>,
    /// Independent reviews per hypothesis per Review phase.
    pub review_passes: usize,
    pub review_aggregation: AggregationPolicy,
    pub review_criteria: Vec<String>,
    pub max_population: Option<usize>,
    pub transcript_limit: usize,
    /// Hypotheses included in the run result; `None` keeps all.
    pub top_n: Option<usize>,
    pub agent: AgentEndpointConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_count: DEFAULT_TARGET_COUNT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tournament_mode: TournamentMode::Random.to_string(),
            k_factor: DEFAULT_K_FACTOR,
            evolution_top_k: DEFAULT_EVOLUTION_TOP_K,
            cluster_min_population: DEFAULT_CLUSTER_MIN_POPULATION,
            random_seed: None,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            per_call_timeout_secs: DEFAULT_PER_CALL_TIMEOUT_SECS,
            matches_per_hypothesis: DEFAULT_MATCHES_PER_HYPOTHESIS,
            proximity_rounds: None,
            review_passes: 1,
            review_aggregation: AggregationPolicy::Mean,
            review_criteria: DEFAULT_CRITERIA.iter().map(|c| c.to_string()).collect(),
            max_population: None,
            transcript_limit: DEFAULT_TRANSCRIPT_LIMIT,
            top_n: None,
            agent: AgentEndpointConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config
            .apply_env_from(|key| std::env::var(key).ok())
            .context("Invalid COSCI_* environment override")?;
        Ok(config)
    }

    /// Apply `COSCI_*` overrides from any key/value lookup.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(v) = lookup(ENV_TARGET_COUNT) {
            self.target_count = parse_env(ENV_TARGET_COUNT, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = parse_env(ENV_MAX_ITERATIONS, &v)?;
        }
        if let Some(v) = lookup(ENV_TOURNAMENT_MODE) {
            self.tournament_mode = v;
        }
        if let Some(v) = lookup(ENV_K_FACTOR) {
            self.k_factor = parse_env(ENV_K_FACTOR, &v)?;
        }
        if let Some(v) = lookup(ENV_EVOLUTION_TOP_K) {
            self.evolution_top_k = parse_env(ENV_EVOLUTION_TOP_K, &v)?;
        }
        if let Some(v) = lookup(ENV_CLUSTER_MIN_POPULATION) {
            self.cluster_min_population = parse_env(ENV_CLUSTER_MIN_POPULATION, &v)?;
        }
        if let Some(v) = lookup(ENV_RANDOM_SEED) {
            self.random_seed = Some(parse_env(ENV_RANDOM_SEED, &v)?);
        }
        if let Some(v) = lookup(ENV_CONCURRENCY_LIMIT) {
            self.concurrency_limit = parse_env(ENV_CONCURRENCY_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_PER_CALL_TIMEOUT_SECS) {
            self.per_call_timeout_secs = parse_env(ENV_PER_CALL_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_POPULATION) {
            self.max_population = Some(parse_env(ENV_MAX_POPULATION, &v)?);
        }
        if let Some(v) = lookup(ENV_BASE_URL) {
            self.agent.base_url = v;
        }
        if let Some(v) = lookup(ENV_API_KEY) {
            self.agent.api_key = Some(v);
        }
        if let Some(v) = lookup(ENV_MODEL) {
            self.agent.model = v;
        }
        for role in AgentRole::ALL {
            let key = format!("{ENV_PROMPT_PREFIX}{}", role.as_str().to_ascii_uppercase());
            if let Some(v) = lookup(&key) {
                self.agent.role_prompts.insert(role.as_str().to_string(), v);
            }
        }
        Ok(())
    }

    /// Reject values no run could start with.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.tournament()?;
        if self.target_count == 0 {
            return Err(config_error("target_count must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(config_error("max_iterations must be at least 1"));
        }
        if !self.k_factor.is_finite() || self.k_factor <= 0.0 {
            return Err(config_error(format!(
                "k_factor must be a positive number, got {}",
                self.k_factor
            )));
        }
        if self.evolution_top_k == 0 {
            return Err(config_error("evolution_top_k must be at least 1"));
        }
        if self.concurrency_limit == 0 {
            return Err(config_error("concurrency_limit must be at least 1"));
        }
        if !self.per_call_timeout_secs.is_finite() || self.per_call_timeout_secs <= 0.0 {
            return Err(config_error(format!(
                "per_call_timeout_secs must be positive, got {}",
                self.per_call_timeout_secs
            )));
        }
        if self.matches_per_hypothesis == 0 {
            return Err(config_error("matches_per_hypothesis must be at least 1"));
        }
        if self.review_passes == 0 {
            return Err(config_error("review_passes must be at least 1"));
        }
        if self.max_population == Some(0) {
            return Err(config_error("max_population must be at least 1 when set"));
        }
        self.review_aggregation.validate().map_err(config_error)?;
        self.agent.validate_role_maps()?;
        Ok(())
    }

    /// Parsed tournament mode.
    pub fn tournament(&self) -> Result<TournamentMode, EngineError> {
        self.tournament_mode.parse().map_err(config_error)
    }

    pub fn pairing_strategy(&self) -> Result<PairingStrategy, EngineError> {
        Ok(PairingStrategy {
            mode: self.tournament()?,
            matches_per_hypothesis: self.matches_per_hypothesis,
            proximity_rounds: self.proximity_rounds,
        })
    }

    pub fn elo(&self) -> EloConfig {
        EloConfig::new(self.k_factor)
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.per_call_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, EngineError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| config_error(format!("{key}={value}: {e}")))
}

fn config_error(message: impl Into<String>) -> EngineError {
    EngineError::Configuration(message.into())
}

/// Check if an inference endpoint is reachable (GET `{url}/models`).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
