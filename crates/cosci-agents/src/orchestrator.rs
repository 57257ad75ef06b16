//! Orchestration loop: generation, then review → rank → tournament, then
//! `max_iterations - 1` rounds of meta-review → evolution → review → rank →
//! tournament → cluster.
//!
//! The orchestrator owns the population. Workers get snapshots through
//! [`PhaseRunner::fan_out`]; every mutation is applied here, after the batch
//! completes, in key order. Cancellation is only observed between phases.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use cosci_engine::phase::STATIC_INSIGHT;
use cosci_engine::population::{MatchSlot, ReviewBatch};
use cosci_engine::review::SCORE_FLOOR;
use cosci_engine::{
    EloConfig, HypothesisId, MatchRecord, PairingStrategy, Phase, Population,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentCapability, AgentRole, AgentSet};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::phases::cluster::{ClusterInput, ClusterSpec};
use crate::phases::evolution::{EvolutionInput, EvolutionSpec};
use crate::phases::generation::{GenerationInput, GenerationSpec};
use crate::phases::meta_review::{MetaReviewInput, MetaReviewSpec};
use crate::phases::rank::{RankInput, RankSpec};
use crate::phases::review::{ReviewInput, ReviewSpec};
use crate::phases::supervisor::{SupervisorInput, SupervisorSpec};
use crate::phases::tournament::{MatchInput, TournamentSpec};
use crate::phases::HypothesisSnapshot;
use crate::prompts::PROMPT_VERSION;
use crate::runner::PhaseRunner;
use crate::state_machine::{PipelineState, StateMachine};
use crate::telemetry::{HypothesisSummary, MetricsCollector, RunResult, RunStatus};

pub struct Orchestrator {
    config: EngineConfig,
    agents: AgentSet,
    runner: PhaseRunner,
    pairing: PairingStrategy,
    elo: EloConfig,
    cancel: CancellationToken,
}

/// Mutable state of one run.
struct RunState {
    goal: String,
    population: Population,
    sm: StateMachine,
    metrics: MetricsCollector,
    matches: Vec<MatchRecord>,
    degraded_reasons: Vec<String>,
    abort_reason: Option<String>,
    insight: Option<String>,
    rng: StdRng,
}

impl Orchestrator {
    /// Validate the configuration and agent set. Nothing runs on failure.
    pub fn new(config: EngineConfig, agents: AgentSet) -> Result<Self, EngineError> {
        config.validate()?;
        let missing = agents.missing_roles();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|r| r.as_str()).collect();
            return Err(EngineError::Configuration(format!(
                "no agent configured for: {}",
                names.join(", ")
            )));
        }
        Ok(Self {
            runner: PhaseRunner::new(config.per_call_timeout()),
            pairing: config.pairing_strategy()?,
            elo: config.elo(),
            cancel: CancellationToken::new(),
            config,
            agents,
        })
    }

    /// Token that stops the run at the next phase boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline for `goal`.
    ///
    /// Agent failures never surface here; they degrade to phase fallbacks.
    /// An `Err` means a broken invariant (unknown id in a merge batch,
    /// illegal transition).
    pub async fn run(&self, goal: &str) -> Result<RunResult, EngineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let rng = match self.config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut run = RunState {
            goal: goal.to_string(),
            population: Population::new(self.config.review_aggregation),
            sm: StateMachine::new(),
            metrics: MetricsCollector::new(self.config.transcript_limit),
            matches: Vec::new(),
            degraded_reasons: Vec::new(),
            abort_reason: None,
            insight: None,
            rng,
        };

        info!(
            run_id = %run_id,
            mode = %self.pairing.mode,
            target = self.config.target_count,
            iterations = self.config.max_iterations,
            "Starting hypothesis run"
        );

        match self.drive(&mut run).await {
            Ok(()) => {}
            Err(EngineError::Cancelled(reason)) => {
                warn!(state = %run.sm.current(), reason = %reason, "Run cancelled");
                run.sm.cancel(&reason)?;
                run.abort_reason = Some(reason);
            }
            Err(e) => return Err(e),
        }

        Ok(self.finish(run, run_id, started_at))
    }

    async fn drive(&self, run: &mut RunState) -> Result<(), EngineError> {
        run.metrics.start_iteration(1);
        self.checkpoint(PipelineState::Generation)?;
        self.generate(run).await?;

        if run.population.is_empty() {
            let reason = "generation produced no hypotheses";
            warn!(reason, "Aborting run");
            run.sm.abort(reason)?;
            run.abort_reason = Some(reason.to_string());
            return Ok(());
        }

        for iteration in 1..=self.config.max_iterations {
            if iteration > 1 {
                run.metrics.finish_iteration(run.population.len());
                run.metrics.start_iteration(iteration);
                run.sm.set_iteration(iteration);
                run.population.clear_clusters();

                self.enter(run, PipelineState::MetaReview)?;
                self.meta_review(run, iteration).await;

                self.enter(run, PipelineState::Evolution)?;
                self.evolve(run, iteration).await?;
            }

            self.enter(run, PipelineState::Review)?;
            self.review(run, iteration).await?;

            self.enter(run, PipelineState::Rank)?;
            self.rank(run).await?;

            self.enter(run, PipelineState::Tournament)?;
            self.tournament(run, iteration).await?;

            if iteration > 1 {
                if let Some(max) = self.config.max_population {
                    let retired = run.population.enforce_cap(max, iteration);
                    run.metrics.record_retirements(retired.len());
                }
                self.enter(run, PipelineState::Cluster)?;
                self.cluster(run).await?;
            }
        }

        run.sm.advance(PipelineState::Complete, None)?;
        Ok(())
    }

    /// Cancellation checkpoint followed by the transition into `state`.
    fn enter(&self, run: &mut RunState, state: PipelineState) -> Result<(), EngineError> {
        self.checkpoint(state)?;
        run.sm.advance(state, None)?;
        Ok(())
    }

    fn checkpoint(&self, next: PipelineState) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled(format!("cancelled before {next}")));
        }
        Ok(())
    }

    fn agent(&self, phase: Phase) -> Result<Arc<dyn AgentCapability>, EngineError> {
        let role = AgentRole::for_phase(phase);
        self.agents
            .get(role)
            .ok_or_else(|| EngineError::Configuration(format!("no agent configured for {role}")))
    }

    async fn generate(&self, run: &mut RunState) -> Result<(), EngineError> {
        let mut guidance = None;
        if self.config.agent.use_supervisor {
            if let Some(supervisor) = self.agents.supervisor() {
                let started = Instant::now();
                let input = SupervisorInput {
                    goal: run.goal.clone(),
                    target_count: self.config.target_count,
                };
                let result = self.runner.run(supervisor.as_ref(), &SupervisorSpec, &input).await;
                run.metrics.record_phase(
                    Phase::Generation,
                    AgentRole::Supervisor,
                    [&result],
                    started.elapsed(),
                );
                if result.used_fallback() {
                    info!("Supervisor gave no usable plan, generating without guidance");
                }
                guidance = result.payload;
            }
        }

        let started = Instant::now();
        let generator = self.agent(Phase::Generation)?;
        let input = GenerationInput {
            goal: run.goal.clone(),
            target_count: self.config.target_count,
            guidance,
        };
        let result = self.runner.run(generator.as_ref(), &GenerationSpec, &input).await;
        run.metrics.record_phase(
            Phase::Generation,
            AgentRole::Generation,
            [&result],
            started.elapsed(),
        );

        for text in &result.payload {
            run.population.add_generated(text, 1)?;
        }
        info!(count = run.population.len(), "Generation complete");
        Ok(())
    }

    async fn review(&self, run: &mut RunState, iteration: u32) -> Result<(), EngineError> {
        let started = Instant::now();
        let reviewer = self.agent(Phase::Review)?;

        let mut inputs = Vec::new();
        for hypothesis in run.population.iter() {
            let snapshot = HypothesisSnapshot::from(hypothesis);
            for pass in 0..self.config.review_passes {
                let input = ReviewInput {
                    goal: run.goal.clone(),
                    hypothesis: snapshot.clone(),
                    criteria: self.config.review_criteria.clone(),
                };
                inputs.push(((hypothesis.id(), pass), input));
            }
        }

        let results = self
            .runner
            .fan_out(reviewer, Arc::new(ReviewSpec), inputs, self.config.concurrency_limit)
            .await;
        run.metrics.record_phase(
            Phase::Review,
            AgentRole::Review,
            results.values(),
            started.elapsed(),
        );

        let batch: ReviewBatch = results
            .into_iter()
            .map(|((id, _pass), result)| (id, result.payload))
            .collect();
        run.population.apply_reviews(batch)?;

        let all_fallback = run.metrics.phase_tally(Phase::Review).none_ok();
        let all_floor = run.population.iter().all(|h| h.score() <= SCORE_FLOOR);
        if all_fallback || all_floor {
            let cause = if all_fallback {
                "every review was a fallback"
            } else {
                "every hypothesis scored at the floor"
            };
            let gate = EngineError::DegradedPopulation(format!("iteration {iteration}: {cause}"));
            warn!(iteration, error = %gate, "Quality gate tripped");
            run.degraded_reasons.push(gate.to_string());
        }
        Ok(())
    }

    async fn rank(&self, run: &mut RunState) -> Result<(), EngineError> {
        let started = Instant::now();
        let ranker = self.agent(Phase::Rank)?;
        run.population.refresh_scores();

        let input = RankInput {
            goal: run.goal.clone(),
            hypotheses: run.population.iter().map(HypothesisSnapshot::from).collect(),
        };
        let result = self.runner.run(ranker.as_ref(), &RankSpec, &input).await;
        run.metrics.record_phase(Phase::Rank, AgentRole::Ranking, [&result], started.elapsed());

        let repaired = run.population.reorder(&result.payload);
        debug!(repaired, "Seeding order applied");
        Ok(())
    }

    async fn tournament(&self, run: &mut RunState, iteration: u32) -> Result<(), EngineError> {
        let judge = self.agent(Phase::Tournament)?;
        let spec = Arc::new(TournamentSpec);
        let rounds = self.pairing.round_count(run.population.len());
        let mut sat_out: BTreeSet<HypothesisId> = BTreeSet::new();

        for round in 0..rounds {
            let started = Instant::now();
            let ids: Vec<HypothesisId> = run.population.ids().to_vec();
            let ratings = run.population.ratings_in_order();
            let had_bye: BTreeSet<usize> = ids
                .iter()
                .enumerate()
                .filter(|(_, id)| sat_out.contains(id))
                .map(|(index, _)| index)
                .collect();
            let pairing = self.pairing.next_round(&ratings, &had_bye, &mut run.rng);
            if let Some(&bye) = pairing.bye.and_then(|i| ids.get(i)) {
                debug!(hypothesis = %bye, round, "Bye this round");
                sat_out.insert(bye);
            }

            let mut slots = Vec::with_capacity(pairing.pairs.len());
            let mut inputs = Vec::with_capacity(pairing.pairs.len());
            for &(i, j) in &pairing.pairs {
                let (Some(&a), Some(&b)) = (ids.get(i), ids.get(j)) else {
                    continue;
                };
                let (Some(ha), Some(hb)) = (run.population.get(a), run.population.get(b)) else {
                    continue;
                };
                let input = MatchInput {
                    goal: run.goal.clone(),
                    a: HypothesisSnapshot::from(ha),
                    b: HypothesisSnapshot::from(hb),
                };
                inputs.push((slots.len(), input));
                slots.push((a, b));
            }

            let results = self
                .runner
                .fan_out(judge.clone(), spec.clone(), inputs, self.config.concurrency_limit)
                .await;
            run.metrics.record_phase(
                Phase::Tournament,
                AgentRole::Tournament,
                results.values(),
                started.elapsed(),
            );

            for (index, result) in results {
                let Some(&(a, b)) = slots.get(index) else {
                    continue;
                };
                let slot = MatchSlot {
                    iteration,
                    round,
                    index,
                    a,
                    b,
                };
                let record = run.population.commit_match(&self.elo, slot, result.payload)?;
                if record.outcome.is_void() {
                    let dropped = EngineError::VoidMatch {
                        a,
                        b,
                        reason: record.void_reason.clone().unwrap_or_default(),
                    };
                    warn!(iteration, round, error = %dropped, "Match dropped");
                }
                run.metrics.record_match(&record);
                run.matches.push(record);
            }
        }

        run.population.sort_by_rating();
        info!(
            iteration,
            rounds,
            matches = run.matches.iter().filter(|m| m.iteration == iteration).count(),
            "Tournament complete"
        );
        Ok(())
    }

    async fn meta_review(&self, run: &mut RunState, iteration: u32) {
        let started = Instant::now();
        let Ok(reviewer) = self.agent(Phase::MetaReview) else {
            run.insight = Some(STATIC_INSIGHT.to_string());
            return;
        };
        let match_summary = run
            .matches
            .iter()
            .filter(|m| m.iteration + 1 == iteration && !m.outcome.is_void())
            .map(|m| match m.summary.as_str() {
                "" => format!("{} vs {}: {}", m.a, m.b, m.outcome),
                summary => format!("{} vs {}: {} ({summary})", m.a, m.b, m.outcome),
            })
            .collect();
        let input = MetaReviewInput {
            goal: run.goal.clone(),
            hypotheses: run.population.iter().map(HypothesisSnapshot::from).collect(),
            match_summary,
        };
        let result = self.runner.run(reviewer.as_ref(), &MetaReviewSpec, &input).await;
        run.metrics.record_phase(
            Phase::MetaReview,
            AgentRole::MetaReview,
            [&result],
            started.elapsed(),
        );
        run.insight = Some(result.payload);
    }

    async fn evolve(&self, run: &mut RunState, iteration: u32) -> Result<(), EngineError> {
        let started = Instant::now();
        let evolver = self.agent(Phase::Evolution)?;
        let parents = run.population.top_k_by_rating(self.config.evolution_top_k);
        let insight = run
            .insight
            .clone()
            .unwrap_or_else(|| STATIC_INSIGHT.to_string());

        let inputs: Vec<(HypothesisId, EvolutionInput)> = parents
            .iter()
            .filter_map(|id| run.population.get(*id))
            .map(|parent| {
                let input = EvolutionInput {
                    goal: run.goal.clone(),
                    parent: HypothesisSnapshot::from(parent),
                    insight: insight.clone(),
                };
                (parent.id(), input)
            })
            .collect();

        let results = self
            .runner
            .fan_out(evolver, Arc::new(EvolutionSpec), inputs, self.config.concurrency_limit)
            .await;
        run.metrics.record_phase(
            Phase::Evolution,
            AgentRole::Evolution,
            results.values(),
            started.elapsed(),
        );

        let mut produced = 0;
        for (parent, result) in results {
            if let Some(child) = result.payload {
                let id = run
                    .population
                    .add_evolved(parent, &child.text, child.refinement, iteration)?;
                debug!(parent = %parent, child = %id, "Offspring added");
                produced += 1;
            }
        }
        run.metrics.record_evolution(parents.len(), produced);
        info!(
            iteration,
            parents = parents.len(),
            produced,
            population = run.population.len(),
            "Evolution complete"
        );
        Ok(())
    }

    async fn cluster(&self, run: &mut RunState) -> Result<(), EngineError> {
        if run.population.len() < self.config.cluster_min_population {
            info!(
                population = run.population.len(),
                min = self.config.cluster_min_population,
                "Skipping clustering"
            );
            return Ok(());
        }
        let started = Instant::now();
        let agent = self.agent(Phase::Cluster)?;
        let input = ClusterInput {
            goal: run.goal.clone(),
            hypotheses: run.population.iter().map(HypothesisSnapshot::from).collect(),
        };
        let result = self.runner.run(agent.as_ref(), &ClusterSpec, &input).await;
        run.metrics.record_phase(Phase::Cluster, AgentRole::Proximity, [&result], started.elapsed());

        for (id, cluster_id) in &result.payload {
            run.population.assign_cluster(*id, cluster_id)?;
        }
        Ok(())
    }

    fn finish(&self, run: RunState, run_id: Uuid, started_at: chrono::DateTime<Utc>) -> RunResult {
        let status = if run.abort_reason.is_some() {
            RunStatus::Aborted
        } else if !run.degraded_reasons.is_empty() {
            RunStatus::Degraded
        } else {
            RunStatus::Ok
        };

        let top_n = self.config.top_n.unwrap_or(usize::MAX);
        let hypotheses: Vec<HypothesisSummary> = run
            .population
            .final_ranking()
            .into_iter()
            .take(top_n)
            .map(HypothesisSummary::from)
            .collect();
        let (metrics, transcript) = run.metrics.finalize(run.population.len());

        info!(
            run_id = %run_id,
            status = ?status,
            hypotheses = hypotheses.len(),
            matches = run.matches.len(),
            history = %run.sm.summary(),
            "Run finished"
        );

        RunResult {
            run_id,
            goal: run.goal,
            status,
            abort_reason: run.abort_reason,
            degraded_reasons: run.degraded_reasons,
            hypotheses,
            matches: run.matches,
            retirements: run.population.retired().to_vec(),
            meta_review: run.insight,
            metrics,
            transitions: run.sm.into_transitions(),
            transcript,
            prompt_version: PROMPT_VERSION.to_string(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}
