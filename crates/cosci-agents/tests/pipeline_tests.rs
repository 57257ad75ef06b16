//! End-to-end runs of the orchestrator against in-process scripted agents.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cosci_agents::state_machine::PipelineState;
use cosci_agents::{
    AgentCapability, AgentError, AgentRole, AgentSet, EngineConfig, Orchestrator, RunResult,
    RunStatus,
};
use cosci_engine::{EloConfig, HypothesisId, MatchOutcome, INITIAL_RATING};
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

struct Stub {
    name: &'static str,
    respond: Responder,
    calls: AtomicUsize,
    cancel_on_call: Mutex<Option<CancellationToken>>,
}

impl Stub {
    fn new(name: &'static str, respond: impl Fn(&str) -> String + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            name,
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            cancel_on_call: Mutex::new(None),
        })
    }

    fn fixed(name: &'static str, response: &'static str) -> Arc<Self> {
        Self::new(name, move |_| response.to_string())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentCapability for Stub {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(&self, task: &str) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_call.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok((self.respond)(task))
    }
}

struct Stubs {
    generation: Arc<Stub>,
    review: Arc<Stub>,
    ranking: Arc<Stub>,
    tournament: Arc<Stub>,
    meta_review: Arc<Stub>,
    evolution: Arc<Stub>,
    proximity: Arc<Stub>,
}

impl Stubs {
    fn healthy(count: usize) -> Self {
        let generated: Vec<String> = (1..=count)
            .map(|n| format!("{{\"text\": \"Mechanism {n} explains the effect\"}}"))
            .collect();
        let generation = format!("{{\"hypotheses\": [{}]}}", generated.join(", "));
        let evolved = Arc::new(AtomicUsize::new(0));
        Self {
            generation: Stub::new("generation", move |_| generation.clone()),
            review: Stub::fixed(
                "review",
                r#"{"overall_score": 0.6, "scores": {"novelty": 0.6}, "review_summary": "Plausible."}"#,
            ),
            ranking: Stub::fixed("ranking", r#"{"ranked_ids": ["H1"]}"#),
            tournament: Stub::fixed(
                "tournament",
                r#"```json
{"winner": "A", "decision_summary": "A is more specific."}
```"#,
            ),
            meta_review: Stub::fixed("meta_review", r#"{"recurring_weaknesses": ["vague mechanisms"]}"#),
            evolution: Stub::new("evolution", move |_| {
                let n = evolved.fetch_add(1, Ordering::SeqCst);
                format!("{{\"refined_hypothesis_text\": \"Refined mechanism {n}\", \"refinement_summary\": \"narrowed\"}}")
            }),
            proximity: Stub::fixed(
                "proximity",
                r#"{"similarity_clusters": [{"cluster_id": "mechanisms", "member_ids": ["H1", "H2"]}]}"#,
            ),
        }
    }

    fn agents(&self) -> AgentSet {
        AgentSet::empty()
            .with_role(AgentRole::Generation, self.generation.clone())
            .with_role(AgentRole::Review, self.review.clone())
            .with_role(AgentRole::Ranking, self.ranking.clone())
            .with_role(AgentRole::Tournament, self.tournament.clone())
            .with_role(AgentRole::MetaReview, self.meta_review.clone())
            .with_role(AgentRole::Evolution, self.evolution.clone())
            .with_role(AgentRole::Proximity, self.proximity.clone())
    }

    fn downstream_calls(&self) -> usize {
        [
            &self.review,
            &self.ranking,
            &self.tournament,
            &self.meta_review,
            &self.evolution,
            &self.proximity,
        ]
        .iter()
        .map(|s| s.calls())
        .sum()
    }
}

fn config(target_count: usize, max_iterations: u32, mode: &str) -> EngineConfig {
    EngineConfig {
        target_count,
        max_iterations,
        tournament_mode: mode.to_string(),
        k_factor: 32.0,
        random_seed: Some(7),
        per_call_timeout_secs: 5.0,
        concurrency_limit: 4,
        ..EngineConfig::default()
    }
}

async fn run(config: EngineConfig, stubs: &Stubs) -> RunResult {
    Orchestrator::new(config, stubs.agents())
        .unwrap()
        .run("Why do plants close their stomata at noon?")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_empty_generation_aborts_without_downstream_calls() {
    let mut stubs = Stubs::healthy(5);
    stubs.generation = Stub::fixed("generation", "   ");

    let result = run(config(5, 3, "round_robin"), &stubs).await;

    assert_eq!(result.status, RunStatus::Aborted);
    assert!(result.hypotheses.is_empty());
    assert!(result.matches.is_empty());
    assert_eq!(stubs.generation.calls(), 2);
    assert_eq!(stubs.downstream_calls(), 0);
    assert_eq!(
        result.transitions.last().map(|t| t.to),
        Some(PipelineState::Aborted)
    );
}

#[tokio::test]
async fn test_round_robin_ratings_are_zero_sum_and_replayable() {
    let stubs = Stubs::healthy(5);
    let result = run(config(5, 1, "round_robin"), &stubs).await;

    assert_eq!(result.status, RunStatus::Ok);
    assert_eq!(result.hypotheses.len(), 5);
    assert_eq!(result.matches.len(), 10);

    let total_delta: i32 = result.matches.iter().map(|m| m.delta_a() + m.delta_b()).sum();
    assert_eq!(total_delta, 0);

    // Replay every match in commit order from the initial ratings.
    let elo = EloConfig::new(32.0);
    let mut ratings: HashMap<HypothesisId, i32> = result
        .hypotheses
        .iter()
        .map(|h| (h.id, INITIAL_RATING))
        .collect();
    for m in &result.matches {
        assert_eq!(m.outcome, MatchOutcome::AWins);
        assert_eq!(ratings[&m.a], m.pre_rating_a);
        assert_eq!(ratings[&m.b], m.pre_rating_b);
        let (a, b) = elo.settle(m.pre_rating_a, m.pre_rating_b, cosci_engine::Outcome::Win);
        assert_eq!((a, b), (m.post_rating_a, m.post_rating_b));
        ratings.insert(m.a, a);
        ratings.insert(m.b, b);
    }
    for h in &result.hypotheses {
        assert_eq!(h.rating, ratings[&h.id]);
        assert_eq!(h.wins + h.losses + h.draws, 4);
    }

    // Presentation order: rating descending.
    let shown: Vec<i32> = result.hypotheses.iter().map(|h| h.rating).collect();
    let mut sorted = shown.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(shown, sorted);
}

#[tokio::test]
async fn test_one_malformed_review_gets_fallback_and_run_stays_ok() {
    let mut stubs = Stubs::healthy(4);
    stubs.review = Stub::new("review", |task| {
        if task.contains("Hypothesis H3:") {
            "The hypothesis is interesting but I will not score it.".to_string()
        } else {
            r#"{"overall_score": 0.8, "review_summary": "Solid."}"#.to_string()
        }
    });

    let result = run(config(4, 1, "round_robin"), &stubs).await;

    assert_eq!(result.status, RunStatus::Ok);
    assert!(result.degraded_reasons.is_empty());
    let h3 = result.hypotheses.iter().find(|h| h.id == HypothesisId(3)).unwrap();
    assert_eq!(h3.review_count, 1);
    assert_eq!(h3.score, 0.5);
    for h in result.hypotheses.iter().filter(|h| h.id != HypothesisId(3)) {
        assert_eq!(h.score, 0.8);
    }

    let review = result.metrics.iterations[0]
        .phases
        .iter()
        .find(|p| p.phase == cosci_engine::Phase::Review)
        .unwrap();
    assert_eq!((review.calls.ok, review.calls.degraded), (3, 1));
    assert_eq!(review.failures["malformed_response"], 1);
}

#[tokio::test]
async fn test_all_fallback_reviews_degrade_the_run() {
    let mut stubs = Stubs::healthy(3);
    stubs.review = Stub::fixed("review", "");

    let result = run(config(3, 1, "round_robin"), &stubs).await;

    assert_eq!(result.status, RunStatus::Degraded);
    assert_eq!(result.degraded_reasons.len(), 1);
    assert!(result.degraded_reasons[0].contains("fallback"));
    assert_eq!(result.hypotheses.len(), 3);
}

#[tokio::test]
async fn test_evolution_adds_children_and_keeps_parents() {
    let stubs = Stubs::healthy(4);
    let mut cfg = config(4, 2, "round_robin");
    cfg.evolution_top_k = 2;
    cfg.cluster_min_population = 2;

    let result = run(cfg, &stubs).await;

    assert_eq!(result.status, RunStatus::Ok);
    assert!(result.hypotheses.len() >= 6);
    assert_eq!(result.metrics.evolution_produced, 2);
    let children: Vec<_> = result.hypotheses.iter().filter(|h| !h.lineage.is_empty()).collect();
    assert_eq!(children.len(), 2);
    for child in children {
        assert_eq!(child.lineage.len(), 1);
        assert_eq!(child.lineage[0].refinement.as_deref(), Some("narrowed"));
        assert!(child.id.0 > 4);
    }
    assert!(result.meta_review.as_deref().unwrap().contains("vague mechanisms"));
    assert!(result
        .hypotheses
        .iter()
        .any(|h| h.cluster_id.as_deref() == Some("mechanisms")));
    assert_eq!(stubs.proximity.calls(), 1);
}

#[tokio::test]
async fn test_population_cap_retires_weakest_after_tournament() {
    let stubs = Stubs::healthy(4);
    let mut cfg = config(4, 2, "round_robin");
    cfg.evolution_top_k = 2;
    cfg.max_population = Some(4);

    let result = run(cfg, &stubs).await;

    assert_eq!(result.hypotheses.len(), 4);
    assert_eq!(result.retirements.len(), 2);
    let weakest_kept = result.hypotheses.iter().map(|h| h.rating).min().unwrap();
    for retired in &result.retirements {
        assert_eq!(retired.iteration, 2);
        assert!(retired.rating <= weakest_kept);
    }
}

#[tokio::test]
async fn test_unreadable_judge_voids_every_match() {
    let mut stubs = Stubs::healthy(3);
    stubs.tournament = Stub::fixed("tournament", "Both hypotheses have merit.");

    let result = run(config(3, 1, "round_robin"), &stubs).await;

    assert_eq!(result.status, RunStatus::Ok);
    assert_eq!(result.matches.len(), 3);
    assert!(result.matches.iter().all(|m| m.outcome.is_void()));
    assert!(result.hypotheses.iter().all(|h| h.rating == INITIAL_RATING));
    assert!(result.hypotheses.iter().all(|h| h.win_rate == 0.0));
    assert_eq!(result.metrics.tournament_void, 3);
    assert_eq!(result.metrics.tournament_valid, 0);
}

#[tokio::test]
async fn test_proximity_mode_gives_byes_on_odd_population() {
    let stubs = Stubs::healthy(5);
    let result = run(config(5, 1, "proximity"), &stubs).await;

    // ceil(log2 5) = 3 rounds of 2 matches each.
    assert_eq!(result.matches.len(), 6);
    let mut sat_out = Vec::new();
    for round in 0..3 {
        let played: Vec<HypothesisId> = result
            .matches
            .iter()
            .filter(|m| m.round == round)
            .flat_map(|m| [m.a, m.b])
            .collect();
        assert_eq!(played.len(), 4);
        let bye: Vec<HypothesisId> = result
            .hypotheses
            .iter()
            .map(|h| h.id)
            .filter(|id| !played.contains(id))
            .collect();
        assert_eq!(bye.len(), 1);
        assert!(!sat_out.contains(&bye[0]), "{} sat out twice", bye[0]);
        sat_out.push(bye[0]);
    }
}

#[tokio::test]
async fn test_cancellation_stops_at_next_phase_boundary() {
    let stubs = Stubs::healthy(3);
    let orchestrator = Orchestrator::new(config(3, 2, "round_robin"), stubs.agents()).unwrap();
    *stubs.review.cancel_on_call.lock().unwrap() = Some(orchestrator.cancellation_token());

    let result = orchestrator.run("goal").await.unwrap();

    assert_eq!(result.status, RunStatus::Aborted);
    assert!(result.abort_reason.unwrap().contains("Rank"));
    assert_eq!(stubs.review.calls(), 3);
    assert_eq!(stubs.ranking.calls(), 0);
    assert_eq!(stubs.tournament.calls(), 0);
    assert_eq!(
        result.transitions.last().map(|t| t.to),
        Some(PipelineState::Cancelled)
    );
}

#[tokio::test]
async fn test_seeded_runs_are_reproducible() {
    let first = run(config(6, 1, "random"), &Stubs::healthy(6)).await;
    let second = run(config(6, 1, "random"), &Stubs::healthy(6)).await;

    let pairs = |r: &RunResult| r.matches.iter().map(|m| (m.a, m.b)).collect::<Vec<_>>();
    assert_eq!(first.matches.len(), 18);
    assert_eq!(pairs(&first), pairs(&second));
}

#[tokio::test]
async fn test_small_transcript_limit_reports_evicted_entries() {
    let stubs = Stubs::healthy(3);
    let mut cfg = config(3, 1, "round_robin");
    cfg.transcript_limit = 4;

    let result = run(cfg, &stubs).await;

    // generation 1 + review 3 + rank 1 + tournament 3
    assert_eq!(result.transcript.len(), 4);
    assert_eq!(result.metrics.transcript_pruned, 4);
    let roles: Vec<AgentRole> = result.transcript.iter().map(|e| e.role).collect();
    assert_eq!(
        roles,
        vec![
            AgentRole::Ranking,
            AgentRole::Tournament,
            AgentRole::Tournament,
            AgentRole::Tournament,
        ]
    );
}
