//! Phase runner: one agent call, bounded, classified, never fatal.
//!
//! ## Lifecycle of one call
//!
//! ```text
//! PhaseRunner::run(agent, spec, input)
//!   → attempt 1: spec.task(input)        ── invoke with timeout
//!       valid          → PhaseResult { status: Ok }
//!       empty/malformed/timeout/transport → retry once
//!   → attempt 2: spec.retry_task(input)  ── invoke with timeout
//!       valid          → PhaseResult { status: Ok, attempts: 2 }
//!       otherwise      → spec.fallback(input, PHASE.fallback())
//! ```
//!
//! `fan_out` runs many calls of the same phase concurrently, bounded by a
//! semaphore, and re-associates every result with the key it was submitted
//! under. A worker that panics is replaced by the phase fallback.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cosci_engine::extraction::{excerpt, extract_record};
use cosci_engine::resilience::Exchange;
use cosci_engine::{
    ExtractionFailure, FailureKind, Phase, PhaseFallback, PhaseResult, PhaseStatus, Record,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent::AgentCapability;
use crate::errors::EngineError;

/// First call plus one retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Characters of task and response text kept per exchange.
const EXCHANGE_EXCERPT_CHARS: usize = 400;

/// How one phase talks to its agent and interprets the answer.
pub trait PhaseSpec: Send + Sync + 'static {
    /// Snapshot handed to the worker; never a reference into the population.
    type Input: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    /// Phase whose entry in the fallback table applies.
    const PHASE: Phase;

    fn task(&self, input: &Self::Input) -> String;

    /// Task text for the single retry. Defaults to the original task.
    fn retry_task(&self, input: &Self::Input) -> String {
        self.task(input)
    }

    /// Validate the generic record into the phase result.
    fn parse(&self, record: &Record, input: &Self::Input)
        -> Result<Self::Output, ExtractionFailure>;

    /// Raw text to phase result. Override to add recovery beyond extraction.
    fn parse_response(
        &self,
        raw: &str,
        input: &Self::Input,
    ) -> Result<Self::Output, ExtractionFailure> {
        let record = extract_record(raw)?;
        self.parse(&record, input).map_err(|f| f.with_raw(raw))
    }

    fn fallback(&self, input: &Self::Input, fallback: PhaseFallback) -> Self::Output;

    fn fallback_status(&self, fallback: PhaseFallback) -> PhaseStatus {
        fallback.status()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PhaseRunner {
    timeout: Duration,
}

impl PhaseRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one phase call to completion. Always returns a result.
    pub async fn run<S: PhaseSpec>(
        &self,
        agent: &dyn AgentCapability,
        spec: &S,
        input: &S::Input,
    ) -> PhaseResult<S::Output> {
        let started = Instant::now();
        let mut exchanges = Vec::new();
        let mut warnings = Vec::new();
        let mut last_failure = FailureKind::EmptyResponse;

        for attempt in 1..=MAX_ATTEMPTS {
            let task = if attempt == 1 {
                spec.task(input)
            } else {
                spec.retry_task(input)
            };

            let call_started = Instant::now();
            let outcome = tokio::time::timeout(self.timeout, agent.invoke(&task)).await;
            let latency = call_started.elapsed();

            let (raw, error) = match outcome {
                Err(_) => (String::new(), EngineError::Timeout(self.timeout)),
                Ok(Err(e)) => (String::new(), EngineError::AgentUnavailable(e.to_string())),
                Ok(Ok(raw)) if raw.trim().is_empty() => (raw, EngineError::empty(agent.name())),
                Ok(Ok(raw)) => match spec.parse_response(&raw, input) {
                    Ok(output) => {
                        exchanges.push(exchange(attempt, &task, &raw, latency));
                        debug!(
                            phase = %S::PHASE,
                            agent = agent.name(),
                            attempt,
                            latency_ms = latency.as_millis() as u64,
                            "Agent call succeeded"
                        );
                        let mut result = PhaseResult::ok(output, attempt);
                        result.warnings = warnings;
                        result.exchanges = exchanges;
                        result.elapsed = started.elapsed();
                        return result;
                    }
                    Err(failure) => (raw, EngineError::MalformedResponse(failure)),
                },
            };

            exchanges.push(exchange(attempt, &task, &raw, latency));
            debug!(
                phase = %S::PHASE,
                agent = agent.name(),
                attempt,
                error = %error,
                "Agent call unusable"
            );
            warnings.push(format!("attempt {attempt}: {error}"));
            if let Some(kind) = error.failure_kind() {
                last_failure = kind;
            }
            if !error.is_recoverable() {
                break;
            }
        }

        let fallback = S::PHASE.fallback();
        warn!(
            phase = %S::PHASE,
            agent = agent.name(),
            failure = %last_failure,
            "Using phase fallback"
        );
        let mut result = PhaseResult::fallback(
            spec.fallback(input, fallback),
            spec.fallback_status(fallback),
            last_failure,
            format!("{} fallback applied", S::PHASE),
        );
        result.attempts = MAX_ATTEMPTS;
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        result.exchanges = exchanges;
        result.elapsed = started.elapsed();
        result
    }

    /// Run one call per input concurrently, at most `limit` in flight.
    ///
    /// Results are keyed by the caller's key, never by completion order.
    pub async fn fan_out<K, S>(
        &self,
        agent: Arc<dyn AgentCapability>,
        spec: Arc<S>,
        inputs: Vec<(K, S::Input)>,
        limit: usize,
    ) -> BTreeMap<K, PhaseResult<S::Output>>
    where
        K: Ord + Clone + Debug + Send + 'static,
        S: PhaseSpec,
    {
        let sem = Arc::new(Semaphore::new(limit.max(1)));
        let submitted: BTreeMap<K, S::Input> = inputs.iter().cloned().collect();
        let mut join_set: JoinSet<(K, PhaseResult<S::Output>)> = JoinSet::new();

        for (key, input) in inputs {
            let sem = sem.clone();
            let agent = agent.clone();
            let spec = spec.clone();
            let runner = *self;

            join_set.spawn(async move {
                let _permit = sem.acquire().await;
                let result = runner.run(agent.as_ref(), spec.as_ref(), &input).await;
                (key, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((key, result)) => {
                    results.insert(key, result);
                }
                Err(e) => {
                    warn!(phase = %S::PHASE, error = %e, "Phase worker panicked");
                }
            }
        }

        for (key, input) in submitted {
            if !results.contains_key(&key) {
                let fallback = S::PHASE.fallback();
                let result = PhaseResult::fallback(
                    spec.fallback(&input, fallback),
                    spec.fallback_status(fallback),
                    FailureKind::AgentUnavailable,
                    format!("worker for {key:?} did not complete"),
                );
                results.insert(key, result);
            }
        }
        results
    }
}

fn exchange(attempt: u32, task: &str, raw: &str, latency: Duration) -> Exchange {
    Exchange {
        attempt,
        task_excerpt: excerpt(task, EXCHANGE_EXCERPT_CHARS),
        response_excerpt: excerpt(raw, EXCHANGE_EXCERPT_CHARS),
        latency,
    }
}
