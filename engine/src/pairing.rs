//! Tournament pairing strategies.
//!
//! Strategies work on population indices (the position of each member in
//! the current seeding order) and never look at hypothesis content. The
//! caller maps indices back to ids.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MATCHES_PER_HYPOTHESIS: usize = 3;

/// How matches are drawn up each tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentMode {
    /// `n * matches_per_hypothesis` uniformly sampled pairs.
    Random,
    /// Every unordered pair exactly once.
    RoundRobin,
    /// Swiss-style: adjacent ratings meet, several rounds.
    Proximity,
}

impl fmt::Display for TournamentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::RoundRobin => write!(f, "round_robin"),
            Self::Proximity => write!(f, "proximity"),
        }
    }
}

impl FromStr for TournamentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "proximity" | "swiss" => Ok(Self::Proximity),
            other => Err(format!(
                "unknown tournament mode '{other}' (expected random, round_robin or proximity)"
            )),
        }
    }
}

/// One round of pairings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingRound {
    pub pairs: Vec<(usize, usize)>,
    /// Index left unpaired this round (proximity mode, odd population).
    pub bye: Option<usize>,
}

/// `n * matches_per_hypothesis` pairs: each index challenges a uniformly
/// drawn opponent other than itself, `matches_per_hypothesis` times.
pub fn random_pairs<R: Rng + ?Sized>(
    n: usize,
    matches_per_hypothesis: usize,
    rng: &mut R,
) -> Vec<(usize, usize)> {
    if n < 2 {
        return Vec::new();
    }
    let mut pairs = Vec::with_capacity(n * matches_per_hypothesis);
    for a in 0..n {
        for _ in 0..matches_per_hypothesis {
            // Draw from the n-1 other slots, then shift past `a`.
            let mut b = rng.random_range(0..n - 1);
            if b >= a {
                b += 1;
            }
            pairs.push((a, b));
        }
    }
    pairs
}

/// Every unordered pair `(i, j)` with `i < j`, exactly once.
pub fn round_robin_pairs(n: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Sort by rating (descending, ties by index) and pair neighbours.
///
/// With an odd count the bye goes to the lowest-rated index not in
/// `had_bye`. Once every index has sat out, the lowest-rated sits out again.
pub fn proximity_round(ratings: &[i32], had_bye: &BTreeSet<usize>) -> PairingRound {
    let mut order: Vec<usize> = (0..ratings.len()).collect();
    order.sort_by(|&x, &y| ratings[y].cmp(&ratings[x]).then(x.cmp(&y)));

    let mut bye = None;
    if order.len() % 2 == 1 {
        let slot = order
            .iter()
            .rposition(|i| !had_bye.contains(i))
            .unwrap_or(order.len() - 1);
        bye = Some(order.remove(slot));
    }

    let pairs = order
        .chunks_exact(2)
        .map(|chunk| (chunk[0], chunk[1]))
        .collect();
    PairingRound { pairs, bye }
}

/// `ceil(log2 n)`; zero when fewer than two members.
pub fn default_proximity_rounds(n: usize) -> usize {
    if n < 2 {
        return 0;
    }
    (usize::BITS - (n - 1).leading_zeros()) as usize
}

/// Configured pairing behaviour for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingStrategy {
    pub mode: TournamentMode,
    pub matches_per_hypothesis: usize,
    /// Overrides [`default_proximity_rounds`] when set.
    pub proximity_rounds: Option<usize>,
}

impl PairingStrategy {
    pub fn new(mode: TournamentMode) -> Self {
        Self {
            mode,
            matches_per_hypothesis: DEFAULT_MATCHES_PER_HYPOTHESIS,
            proximity_rounds: None,
        }
    }

    /// Rounds to play for a population of `n`.
    ///
    /// Random and round-robin draw every pair up front in a single round;
    /// proximity re-pairs on updated ratings each round.
    pub fn round_count(&self, n: usize) -> usize {
        if n < 2 {
            return 0;
        }
        match self.mode {
            TournamentMode::Random | TournamentMode::RoundRobin => 1,
            TournamentMode::Proximity => self
                .proximity_rounds
                .unwrap_or_else(|| default_proximity_rounds(n)),
        }
    }

    /// Pairings for the next round given the current ratings in seeding order.
    ///
    /// `had_bye` holds the indices that already sat out a proximity round of
    /// this tournament; other modes ignore it.
    pub fn next_round<R: Rng + ?Sized>(
        &self,
        ratings: &[i32],
        had_bye: &BTreeSet<usize>,
        rng: &mut R,
    ) -> PairingRound {
        let n = ratings.len();
        match self.mode {
            TournamentMode::Random => PairingRound {
                pairs: random_pairs(n, self.matches_per_hypothesis, rng),
                bye: None,
            },
            TournamentMode::RoundRobin => PairingRound {
                pairs: round_robin_pairs(n),
                bye: None,
            },
            TournamentMode::Proximity => proximity_round(ratings, had_bye),
        }
    }
}
