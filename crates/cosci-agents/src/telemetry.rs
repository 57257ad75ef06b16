//! Run metrics, bounded transcript and the final run result.
//!
//! `MetricsCollector` accumulates per-iteration and per-phase counters while
//! the orchestrator runs; `finalize()` produces the `RunMetrics` snapshot
//! embedded in the `RunResult`.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use cosci_engine::resilience::PhaseTally;
use cosci_engine::{
    Hypothesis, HypothesisId, LineageEntry, MatchRecord, Phase, PhaseResult, Retirement,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::agent::AgentRole;
use crate::state_machine::TransitionRecord;

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    /// The run completed but a quality gate tripped.
    Degraded,
    /// Generation produced nothing, or the run was cancelled.
    Aborted,
}

/// Metrics for one phase within one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub phase: Phase,
    pub duration_ms: u64,
    pub calls: PhaseTally,
    /// Recovered failures keyed by `FailureKind` label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: u32,
    pub phases: Vec<PhaseMetrics>,
    /// Active population size when the iteration ended.
    pub population_size: usize,
    pub matches_decided: usize,
    pub matches_voided: usize,
    pub offspring: usize,
    pub retired: usize,
}

/// Call volume and latency for one agent role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCallStats {
    pub calls: u64,
    pub total_latency_ms: u64,
    pub mean_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub iterations: Vec<IterationMetrics>,
    pub agent_calls: BTreeMap<String, AgentCallStats>,
    pub tournament_valid: usize,
    pub tournament_void: usize,
    pub evolution_attempted: usize,
    pub evolution_produced: usize,
    /// Transcript entries evicted to stay within `transcript_limit`.
    pub transcript_pruned: usize,
    pub elapsed_ms: u64,
}

/// One agent exchange, excerpted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: AgentRole,
    pub iteration: u32,
    pub attempt: u32,
    pub task_excerpt: String,
    pub response_excerpt: String,
    pub latency_ms: u64,
}

/// Transcript that keeps only the newest `limit` entries.
#[derive(Debug, Clone)]
pub struct Transcript {
    limit: usize,
    entries: VecDeque<TranscriptEntry>,
    pruned: usize,
}

impl Transcript {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: VecDeque::new(),
            pruned: 0,
        }
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        if self.limit == 0 {
            self.pruned += 1;
            return;
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
            self.pruned += 1;
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries dropped to stay within the limit.
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries.into()
    }
}

/// Builder that accumulates metrics during the orchestrator loop.
///
/// Call `start_iteration()` / `finish_iteration()` around each iteration and
/// `record_phase()` after each batch of phase calls, then `finalize()`.
pub struct MetricsCollector {
    run_start: Instant,
    current_iteration: Option<IterationBuilder>,
    iterations: Vec<IterationMetrics>,
    agent_calls: BTreeMap<String, AgentCallStats>,
    tournament_valid: usize,
    tournament_void: usize,
    evolution_attempted: usize,
    evolution_produced: usize,
    transcript: Transcript,
}

struct IterationBuilder {
    iteration: u32,
    phases: Vec<PhaseMetrics>,
    matches_decided: usize,
    matches_voided: usize,
    offspring: usize,
    retired: usize,
}

impl MetricsCollector {
    pub fn new(transcript_limit: usize) -> Self {
        Self {
            run_start: Instant::now(),
            current_iteration: None,
            iterations: Vec::new(),
            agent_calls: BTreeMap::new(),
            tournament_valid: 0,
            tournament_void: 0,
            evolution_attempted: 0,
            evolution_produced: 0,
            transcript: Transcript::new(transcript_limit),
        }
    }

    pub fn start_iteration(&mut self, iteration: u32) {
        self.current_iteration = Some(IterationBuilder {
            iteration,
            phases: Vec::new(),
            matches_decided: 0,
            matches_voided: 0,
            offspring: 0,
            retired: 0,
        });
    }

    /// Record a batch of calls made for `phase` by the agent serving `role`.
    ///
    /// Consecutive batches for the same phase (supervisor then generator,
    /// or successive tournament rounds) merge into one entry.
    pub fn record_phase<'a, T: 'a>(
        &mut self,
        phase: Phase,
        role: AgentRole,
        results: impl IntoIterator<Item = &'a PhaseResult<T>>,
        elapsed: Duration,
    ) {
        let mut tally = PhaseTally::default();
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        let iteration = self.current_iteration.as_ref().map_or(0, |i| i.iteration);

        for result in results {
            tally.record(result.status);
            if let Some(kind) = result.failure {
                *failures.entry(kind.to_string()).or_default() += 1;
            }
            let stats = self.agent_calls.entry(role.as_str().to_string()).or_default();
            for exchange in &result.exchanges {
                stats.calls += 1;
                stats.total_latency_ms += exchange.latency.as_millis() as u64;
                self.transcript.push(TranscriptEntry {
                    role,
                    iteration,
                    attempt: exchange.attempt,
                    task_excerpt: exchange.task_excerpt.clone(),
                    response_excerpt: exchange.response_excerpt.clone(),
                    latency_ms: exchange.latency.as_millis() as u64,
                });
            }
            if stats.calls > 0 {
                stats.mean_latency_ms = stats.total_latency_ms as f64 / stats.calls as f64;
            }
        }

        if let Some(ref mut iter) = self.current_iteration {
            match iter.phases.last_mut() {
                Some(last) if last.phase == phase => {
                    last.duration_ms += elapsed.as_millis() as u64;
                    last.calls.merge(tally);
                    for (kind, count) in failures {
                        *last.failures.entry(kind).or_default() += count;
                    }
                }
                _ => iter.phases.push(PhaseMetrics {
                    phase,
                    duration_ms: elapsed.as_millis() as u64,
                    calls: tally,
                    failures,
                }),
            }
        }
    }

    pub fn record_match(&mut self, record: &MatchRecord) {
        let void = record.outcome.is_void();
        if void {
            self.tournament_void += 1;
        } else {
            self.tournament_valid += 1;
        }
        if let Some(ref mut iter) = self.current_iteration {
            if void {
                iter.matches_voided += 1;
            } else {
                iter.matches_decided += 1;
            }
        }
    }

    pub fn record_evolution(&mut self, attempted: usize, produced: usize) {
        self.evolution_attempted += attempted;
        self.evolution_produced += produced;
        if let Some(ref mut iter) = self.current_iteration {
            iter.offspring += produced;
        }
    }

    pub fn record_retirements(&mut self, count: usize) {
        if let Some(ref mut iter) = self.current_iteration {
            iter.retired += count;
        }
    }

    /// Tally of every call in the current iteration for `phase`.
    pub fn phase_tally(&self, phase: Phase) -> PhaseTally {
        let mut tally = PhaseTally::default();
        if let Some(iter) = &self.current_iteration {
            for p in iter.phases.iter().filter(|p| p.phase == phase) {
                tally.merge(p.calls);
            }
        }
        tally
    }

    pub fn finish_iteration(&mut self, population_size: usize) {
        if let Some(iter) = self.current_iteration.take() {
            info!(
                iteration = iter.iteration,
                population = population_size,
                decided = iter.matches_decided,
                voided = iter.matches_voided,
                offspring = iter.offspring,
                "Iteration complete"
            );
            self.iterations.push(IterationMetrics {
                iteration: iter.iteration,
                phases: iter.phases,
                population_size,
                matches_decided: iter.matches_decided,
                matches_voided: iter.matches_voided,
                offspring: iter.offspring,
                retired: iter.retired,
            });
        }
    }

    /// Finalize and produce the run metrics and the retained transcript.
    pub fn finalize(mut self, population_size: usize) -> (RunMetrics, Vec<TranscriptEntry>) {
        self.finish_iteration(population_size);
        let metrics = RunMetrics {
            iterations: self.iterations,
            agent_calls: self.agent_calls,
            tournament_valid: self.tournament_valid,
            tournament_void: self.tournament_void,
            evolution_attempted: self.evolution_attempted,
            evolution_produced: self.evolution_produced,
            transcript_pruned: self.transcript.pruned(),
            elapsed_ms: self.run_start.elapsed().as_millis() as u64,
        };
        (metrics, self.transcript.into_entries())
    }
}

/// Presentation view of one hypothesis in the final ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisSummary {
    pub id: HypothesisId,
    pub text: String,
    pub rating: i32,
    pub score: f64,
    pub win_rate: f64,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub review_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<LineageEntry>,
}

impl From<&Hypothesis> for HypothesisSummary {
    fn from(h: &Hypothesis) -> Self {
        Self {
            id: h.id(),
            text: h.text().to_string(),
            rating: h.rating(),
            score: h.score(),
            win_rate: h.win_rate(),
            wins: h.wins(),
            losses: h.losses(),
            draws: h.draws(),
            review_count: h.reviews().len(),
            cluster_id: h.cluster_id().map(str::to_string),
            lineage: h.lineage().to_vec(),
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub goal: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_reasons: Vec<String>,
    /// Rating desc, score desc, id asc.
    pub hypotheses: Vec<HypothesisSummary>,
    pub matches: Vec<MatchRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retirements: Vec<Retirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_review: Option<String>,
    pub metrics: RunMetrics,
    pub transitions: Vec<TransitionRecord>,
    pub transcript: Vec<TranscriptEntry>,
    pub prompt_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run result to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run result");
        Ok(())
    }
}
