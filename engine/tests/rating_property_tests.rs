//! Rating and pairing property tests: grid-driven validation of the Elo
//! update and pairing strategies.
//!
//! Tests verify:
//! - A win never lowers a rating and a loss never raises one
//! - Settled matches are zero-sum
//! - Equal ratings move by equal magnitudes
//! - Round-robin yields exactly n(n-1)/2 unique unordered pairs
//! - Random pairing never produces self-pairs and has the requested size
//! - Proximity rounds pair every member at most once, with one bye when odd
//! - Byes rotate through distinct members before anyone sits out twice

use std::collections::{BTreeSet, HashSet};

use cosci_engine::elo::{update_rating, EloConfig, Outcome};
use cosci_engine::pairing::{
    default_proximity_rounds, proximity_round, random_pairs, round_robin_pairs, PairingStrategy,
    TournamentMode,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const RATINGS: [i32; 7] = [800, 1000, 1150, 1200, 1250, 1400, 1800];
const K_FACTORS: [f64; 4] = [8.0, 16.0, 32.0, 64.0];

// ── Property: direction of rating change ───────────────────────────

// The delta is round(k * (actual - expected)), so for a wide enough gap
// the favourite's win rounds to zero. Strict movement only holds at equal
// ratings; elsewhere the bound is non-strict.
#[test]
fn prop_win_raises_loss_lowers() {
    assert_eq!(update_rating(3000, 0, Outcome::Win, 32.0), 3000);
    assert_eq!(update_rating(0, 3000, Outcome::Loss, 32.0), 0);
    assert!(update_rating(0, 3000, Outcome::Win, 32.0) > 0);

    for &k in &K_FACTORS {
        for &r1 in &RATINGS {
            for &r2 in &RATINGS {
                let won = update_rating(r1, r2, Outcome::Win, k);
                let lost = update_rating(r2, r1, Outcome::Loss, k);
                assert!(won >= r1, "k={k} r1={r1} r2={r2}: win lowered rating to {won}");
                assert!(lost <= r2, "k={k} r1={r1} r2={r2}: loss raised rating to {lost}");
                if r1 == r2 {
                    assert!(won > r1, "k={k} r={r1}: even win must gain");
                    assert!(lost < r2, "k={k} r={r1}: even loss must drop");
                }
            }
        }
    }
}

// ── Property: symmetry at equal ratings ────────────────────────────

#[test]
fn prop_equal_ratings_equal_magnitudes() {
    for &k in &K_FACTORS {
        for &r in &RATINGS {
            let gain = update_rating(r, r, Outcome::Win, k) - r;
            let drop = r - update_rating(r, r, Outcome::Loss, k);
            assert_eq!(gain, drop, "k={k} r={r}");
            assert_eq!(update_rating(r, r, Outcome::Draw, k), r, "k={k} r={r}");
        }
    }
}

// ── Property: settled matches are zero-sum ─────────────────────────

#[test]
fn prop_settle_zero_sum() {
    for &k in &K_FACTORS {
        let elo = EloConfig::new(k);
        for &ra in &RATINGS {
            for &rb in &RATINGS {
                for outcome in [Outcome::Win, Outcome::Loss, Outcome::Draw] {
                    let (a, b) = elo.settle(ra, rb, outcome);
                    assert_eq!(a + b, ra + rb, "k={k} ra={ra} rb={rb} {outcome:?}");
                    assert_eq!(a, update_rating(ra, rb, outcome, k));
                }
            }
        }
    }
}

// ── Property: round-robin coverage ─────────────────────────────────

#[test]
fn prop_round_robin_unique_pairs() {
    for n in 0..12usize {
        let pairs = round_robin_pairs(n);
        assert_eq!(pairs.len(), n * n.saturating_sub(1) / 2, "n={n}");

        let unique: HashSet<(usize, usize)> = pairs
            .iter()
            .map(|&(a, b)| (a.min(b), a.max(b)))
            .collect();
        assert_eq!(unique.len(), pairs.len(), "n={n}: duplicate pair");
        assert!(pairs.iter().all(|&(a, b)| a != b && a < n && b < n));
    }
}

// ── Property: random pairing shape ─────────────────────────────────

#[test]
fn prop_random_pairs_shape() {
    for seed in 0..20u64 {
        for n in 2..9usize {
            for per in 1..4usize {
                let mut rng = StdRng::seed_from_u64(seed);
                let pairs = random_pairs(n, per, &mut rng);
                assert_eq!(pairs.len(), n * per, "seed={seed} n={n} per={per}");
                for &(a, b) in &pairs {
                    assert_ne!(a, b, "seed={seed} n={n}: self pair");
                    assert!(a < n && b < n);
                }
                // every member appears at least `per` times
                for member in 0..n {
                    let appearances = pairs
                        .iter()
                        .filter(|&&(a, b)| a == member || b == member)
                        .count();
                    assert!(appearances >= per, "seed={seed} n={n} member={member}");
                }
            }
        }
    }
}

// ── Property: proximity rounds ─────────────────────────────────────

#[test]
fn prop_proximity_pairs_each_member_once() {
    for n in 0..12usize {
        let ratings: Vec<i32> = (0..n).map(|i| 1200 + ((i as i32 * 37) % 200) - 100).collect();
        let round = proximity_round(&ratings, &BTreeSet::new());

        let mut seen = HashSet::new();
        for &(a, b) in &round.pairs {
            assert!(seen.insert(a), "n={n}: {a} paired twice");
            assert!(seen.insert(b), "n={n}: {b} paired twice");
            assert!(ratings[a] >= ratings[b], "n={n}: pair not in rating order");
        }
        assert_eq!(round.pairs.len(), n / 2, "n={n}");
        assert_eq!(round.bye.is_some(), n % 2 == 1, "n={n}");
        if let Some(bye) = round.bye {
            assert!(!seen.contains(&bye));
        }
    }
}

#[test]
fn prop_proximity_byes_go_to_distinct_members() {
    for n in (3..16usize).step_by(2) {
        let ratings: Vec<i32> = (0..n).map(|i| 1500 - i as i32 * 25).collect();
        let mut had_bye = BTreeSet::new();
        for round_no in 0..n {
            let round = proximity_round(&ratings, &had_bye);
            let bye = round.bye.expect("odd population always has a bye");
            assert!(had_bye.insert(bye), "n={n} round={round_no}: {bye} sat out twice");
            assert_eq!(round.pairs.len(), n / 2, "n={n}");
        }
        assert_eq!(had_bye.len(), n);
    }
}

#[test]
fn prop_strategy_round_counts() {
    for n in 0..40usize {
        let proximity = PairingStrategy::new(TournamentMode::Proximity);
        assert_eq!(proximity.round_count(n), default_proximity_rounds(n));
        if n >= 2 {
            // 2^(rounds-1) < n <= 2^rounds
            let rounds = default_proximity_rounds(n) as u32;
            assert!(n <= 1usize << rounds, "n={n}");
            assert!(n > 1usize << (rounds - 1), "n={n}");
        }
    }
}
