//! Id-keyed population arena.
//!
//! The orchestrator owns exactly one [`Population`]. Phase workers only see
//! cloned snapshots; everything they produce comes back here through an
//! explicit merge step (`apply_reviews`, `commit_match`, `add_evolved`,
//! `assign_cluster`, `retire`). Nothing is ever looked up by text.
//!
//! `order` is the current seeding order used for pairing. It is always a
//! permutation of the member ids.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::elo::EloConfig;
use crate::hypothesis::{Hypothesis, HypothesisId};
use crate::review::{AggregationPolicy, Review};
use crate::tournament::{MatchDecision, MatchOutcome, MatchRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PopulationError {
    #[error("hypothesis {0} already exists")]
    DuplicateId(HypothesisId),
    #[error("unknown hypothesis {0}")]
    UnknownId(HypothesisId),
    #[error("hypothesis {0} cannot be matched against itself")]
    SelfMatch(HypothesisId),
    #[error("hypothesis text is empty")]
    EmptyText,
}

/// Audit record for a hypothesis leaving the active population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retirement {
    pub id: HypothesisId,
    pub text: String,
    pub rating: i32,
    pub score: f64,
    pub iteration: u32,
    pub reason: String,
    pub retired_at: DateTime<Utc>,
}

/// Reviews produced by one Review phase, applied in one step.
pub type ReviewBatch = Vec<(HypothesisId, Review)>;

/// Where a match sits in the tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSlot {
    pub iteration: u32,
    pub round: usize,
    pub index: usize,
    pub a: HypothesisId,
    pub b: HypothesisId,
}

#[derive(Debug, Clone)]
pub struct Population {
    members: HashMap<HypothesisId, Hypothesis>,
    order: Vec<HypothesisId>,
    next_id: u64,
    retired: Vec<Retirement>,
    aggregation: AggregationPolicy,
}

impl Default for Population {
    fn default() -> Self {
        Self::new(AggregationPolicy::default())
    }
}

impl Population {
    pub fn new(aggregation: AggregationPolicy) -> Self {
        Self {
            members: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
            retired: Vec::new(),
            aggregation,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: HypothesisId) -> Option<&Hypothesis> {
        self.members.get(&id)
    }

    pub fn contains(&self, id: HypothesisId) -> bool {
        self.members.contains_key(&id)
    }

    /// Member ids in seeding order.
    pub fn ids(&self) -> &[HypothesisId] {
        &self.order
    }

    /// Members in seeding order.
    pub fn iter(&self) -> impl Iterator<Item = &Hypothesis> + '_ {
        self.order.iter().filter_map(|id| self.members.get(id))
    }

    pub fn retired(&self) -> &[Retirement] {
        &self.retired
    }

    /// Insert a fully built hypothesis, rejecting duplicate ids.
    pub fn insert(&mut self, hypothesis: Hypothesis) -> Result<HypothesisId, PopulationError> {
        let id = hypothesis.id();
        if self.members.contains_key(&id) || self.retired.iter().any(|r| r.id == id) {
            return Err(PopulationError::DuplicateId(id));
        }
        self.next_id = self.next_id.max(id.0 + 1);
        self.members.insert(id, hypothesis);
        self.order.push(id);
        Ok(id)
    }

    /// Add a freshly generated hypothesis under a new id.
    pub fn add_generated(
        &mut self,
        text: &str,
        iteration: u32,
    ) -> Result<HypothesisId, PopulationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PopulationError::EmptyText);
        }
        let id = self.allocate_id();
        self.insert(Hypothesis::new(id, text, iteration))
    }

    /// Add an evolved child of `parent`. The parent is left untouched.
    pub fn add_evolved(
        &mut self,
        parent: HypothesisId,
        text: &str,
        refinement: Option<String>,
        iteration: u32,
    ) -> Result<HypothesisId, PopulationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PopulationError::EmptyText);
        }
        let child = {
            let parent = self
                .members
                .get(&parent)
                .ok_or(PopulationError::UnknownId(parent))?;
            Hypothesis::derive(self.peek_id(), parent, text, refinement, iteration)
        };
        self.allocate_id();
        self.insert(child)
    }

    fn peek_id(&self) -> HypothesisId {
        HypothesisId(self.next_id)
    }

    fn allocate_id(&mut self) -> HypothesisId {
        let id = self.peek_id();
        self.next_id += 1;
        id
    }

    /// Append a batch of reviews and recompute the affected scores.
    ///
    /// The batch is validated up front; an unknown id rejects the whole batch.
    pub fn apply_reviews(&mut self, batch: ReviewBatch) -> Result<(), PopulationError> {
        if let Some((id, _)) = batch.iter().find(|(id, _)| !self.members.contains_key(id)) {
            return Err(PopulationError::UnknownId(*id));
        }
        let mut touched = HashSet::new();
        for (id, review) in batch {
            if let Some(member) = self.members.get_mut(&id) {
                member.push_review(review);
                touched.insert(id);
            }
        }
        let policy = self.aggregation;
        for id in touched {
            if let Some(member) = self.members.get_mut(&id) {
                member.recompute_score(&policy);
            }
        }
        Ok(())
    }

    /// Recompute every member's score from its review history.
    pub fn refresh_scores(&mut self) {
        let policy = self.aggregation;
        for member in self.members.values_mut() {
            member.recompute_score(&policy);
        }
    }

    /// Adopt `ranked` as the new seeding order.
    ///
    /// Unknown and repeated ids are dropped; members missing from `ranked`
    /// keep their relative order after the ranked ones. The result is always
    /// a permutation of the population. Returns how many ids were repaired.
    pub fn reorder(&mut self, ranked: &[HypothesisId]) -> usize {
        let mut seen = HashSet::with_capacity(self.order.len());
        let mut order = Vec::with_capacity(self.order.len());
        let mut repaired = 0;
        for &id in ranked {
            if self.members.contains_key(&id) && seen.insert(id) {
                order.push(id);
            } else {
                repaired += 1;
            }
        }
        for &id in &self.order {
            if seen.insert(id) {
                order.push(id);
                repaired += 1;
            }
        }
        self.order = order;
        repaired
    }

    /// Stable re-sort of the seeding order by rating, highest first.
    pub fn sort_by_rating(&mut self) {
        let members = &self.members;
        self.order.sort_by(|a, b| {
            let ra = members.get(a).map(Hypothesis::rating).unwrap_or_default();
            let rb = members.get(b).map(Hypothesis::rating).unwrap_or_default();
            rb.cmp(&ra)
        });
    }

    /// Current ratings in seeding order.
    pub fn ratings_in_order(&self) -> Vec<i32> {
        self.iter().map(Hypothesis::rating).collect()
    }

    /// Commit one judged match.
    ///
    /// Both ids are validated before anything is written. Both new ratings
    /// are computed from the pre-match pair, then both sides and the record
    /// are written together. A void decision changes nothing but is still
    /// returned as a record.
    pub fn commit_match(
        &mut self,
        elo: &EloConfig,
        slot: MatchSlot,
        decision: MatchDecision,
    ) -> Result<MatchRecord, PopulationError> {
        if slot.a == slot.b {
            return Err(PopulationError::SelfMatch(slot.a));
        }
        let pre_a = self
            .members
            .get(&slot.a)
            .ok_or(PopulationError::UnknownId(slot.a))?
            .rating();
        let pre_b = self
            .members
            .get(&slot.b)
            .ok_or(PopulationError::UnknownId(slot.b))?
            .rating();

        let (post_a, post_b) = match decision.outcome.for_a() {
            Some(outcome_a) => elo.settle(pre_a, pre_b, outcome_a),
            None => (pre_a, pre_b),
        };

        match decision.outcome {
            MatchOutcome::Void => {
                warn!(
                    a = %slot.a,
                    b = %slot.b,
                    reason = decision.void_reason.as_deref().unwrap_or("unspecified"),
                    "Match voided"
                );
            }
            outcome => {
                if let Some(a) = self.members.get_mut(&slot.a) {
                    a.set_rating(post_a);
                    match outcome {
                        MatchOutcome::AWins => a.record_win(),
                        MatchOutcome::BWins => a.record_loss(),
                        _ => a.record_draw(),
                    }
                }
                if let Some(b) = self.members.get_mut(&slot.b) {
                    b.set_rating(post_b);
                    match outcome {
                        MatchOutcome::AWins => b.record_loss(),
                        MatchOutcome::BWins => b.record_win(),
                        _ => b.record_draw(),
                    }
                }
            }
        }

        Ok(MatchRecord {
            iteration: slot.iteration,
            round: slot.round,
            index: slot.index,
            a: slot.a,
            b: slot.b,
            pre_rating_a: pre_a,
            pre_rating_b: pre_b,
            outcome: decision.outcome,
            post_rating_a: post_a,
            post_rating_b: post_b,
            void_reason: decision.void_reason,
            dimension_scores: decision.dimension_scores,
            summary: decision.summary,
            recorded_at: Utc::now(),
        })
    }

    /// Drop every cluster assignment. Called at the start of each iteration.
    pub fn clear_clusters(&mut self) {
        for member in self.members.values_mut() {
            member.set_cluster(None);
        }
    }

    pub fn assign_cluster(
        &mut self,
        id: HypothesisId,
        cluster_id: &str,
    ) -> Result<(), PopulationError> {
        self.members
            .get_mut(&id)
            .ok_or(PopulationError::UnknownId(id))?
            .set_cluster(Some(cluster_id.to_string()));
        Ok(())
    }

    /// The `k` strongest members: rating desc, then score desc, then id asc.
    pub fn top_k_by_rating(&self, k: usize) -> Vec<HypothesisId> {
        let mut ids = self.final_order();
        ids.truncate(k);
        ids
    }

    /// Remove a member, leaving a retirement record behind.
    pub fn retire(
        &mut self,
        id: HypothesisId,
        reason: &str,
        iteration: u32,
    ) -> Result<Retirement, PopulationError> {
        let member = self
            .members
            .remove(&id)
            .ok_or(PopulationError::UnknownId(id))?;
        self.order.retain(|other| *other != id);
        let retirement = Retirement {
            id,
            text: member.text().to_string(),
            rating: member.rating(),
            score: member.score(),
            iteration,
            reason: reason.to_string(),
            retired_at: Utc::now(),
        };
        warn!(
            hypothesis = %id,
            rating = retirement.rating,
            reason,
            "Hypothesis retired"
        );
        self.retired.push(retirement.clone());
        Ok(retirement)
    }

    /// Retire the weakest members until at most `max` remain.
    ///
    /// Weakest means lowest rating, then lowest score, then newest id.
    pub fn enforce_cap(&mut self, max: usize, iteration: u32) -> Vec<Retirement> {
        let surplus = self.len().saturating_sub(max);
        let victims: Vec<HypothesisId> = self.final_order().into_iter().rev().take(surplus).collect();
        victims
            .into_iter()
            .filter_map(|id| {
                self.retire(id, &format!("population cap of {max} exceeded"), iteration)
                    .ok()
            })
            .collect()
    }

    /// Members in final presentation order: rating desc, score desc, id asc.
    pub fn final_ranking(&self) -> Vec<&Hypothesis> {
        self.final_order()
            .into_iter()
            .filter_map(|id| self.members.get(&id))
            .collect()
    }

    fn final_order(&self) -> Vec<HypothesisId> {
        let mut ids = self.order.clone();
        ids.sort_by(|a, b| {
            let ra = self.members.get(a).map(Hypothesis::rating).unwrap_or_default();
            let rb = self.members.get(b).map(Hypothesis::rating).unwrap_or_default();
            rb.cmp(&ra)
                .then_with(|| self.compare_by(*a, *b, |h| h.score()))
                .then(a.cmp(b))
        });
        ids
    }

    /// Descending comparison on an f64 member attribute.
    fn compare_by(
        &self,
        a: HypothesisId,
        b: HypothesisId,
        key: impl Fn(&Hypothesis) -> f64,
    ) -> Ordering {
        let ka = self.members.get(&a).map(&key).unwrap_or(f64::MIN);
        let kb = self.members.get(&b).map(&key).unwrap_or(f64::MIN);
        kb.total_cmp(&ka)
    }
}
