//! Top-two Thompson sampling traffic allocation.
//!
//! The allocation for the next traffic window is read off the shared draw
//! matrix: each row is one simulated "round" where the primary argmax wins.
//! On a `top_two_beta` fraction of rounds (gated by the row's uniform
//! draw) the challenger matrix nominates a second arm; when it differs from
//! the primary winner the two split the round's mass, so challenger rounds
//! spread traffic across the plausible top two instead of concentrating it
//! on a single sampled winner.
//!
//! An exploration floor then guarantees every active arm at least
//! `explore_floor / n_active` of the traffic.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};

use crate::posterior::Posterior;
use crate::sampler::{row_argmax, DrawMatrix};

/// Raise every weight to at least `explore_floor / len`, renormalizing so
/// the result is still a distribution.
///
/// Entries already at or above the floor shrink proportionally to make
/// room; the loop re-pins any entry the rescale pushes below the floor, so
/// the floor holds exactly on every entry of the output.
pub fn apply_exploration_floor(weights: &mut [f64], explore_floor: f64) {
    let v = weights.len();
    if v == 0 {
        return;
    }
    let uniform = 1.0 / v as f64;
    let floor = if explore_floor.is_finite() && explore_floor > 0.0 {
        (explore_floor / v as f64).min(uniform)
    } else {
        0.0
    };

    let sum: f64 = weights.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        weights.fill(uniform);
        return;
    }
    for w in weights.iter_mut() {
        *w /= sum;
    }
    if floor == 0.0 {
        return;
    }

    let mut pinned = vec![false; v];
    loop {
        let n_pinned = pinned.iter().filter(|p| **p).count();
        if n_pinned == v {
            weights.fill(uniform);
            return;
        }
        let free_mass = 1.0 - n_pinned as f64 * floor;
        let free_sum: f64 = weights
            .iter()
            .zip(pinned.iter())
            .filter(|(_, p)| !**p)
            .map(|(w, _)| *w)
            .sum();
        if free_sum <= 0.0 {
            break;
        }
        let scale = free_mass / free_sum;
        let mut newly_pinned = false;
        for (w, p) in weights.iter_mut().zip(pinned.iter_mut()) {
            if !*p && *w * scale < floor {
                *p = true;
                newly_pinned = true;
            }
        }
        if !newly_pinned {
            for (w, p) in weights.iter_mut().zip(pinned.iter()) {
                if *p {
                    *w = floor;
                } else {
                    *w *= scale;
                }
            }
            return;
        }
    }

    weights.fill(uniform);
}

/// Tally the top-two Thompson allocation from the draw matrix.
///
/// Returns weights in variant order, before the exploration floor.
pub fn top_two_tally(matrix: &DrawMatrix, top_two_beta: f64) -> Vec<f64> {
    let v = matrix.n_variants();
    let s = matrix.n_samples();
    let mut tally = vec![0.0f64; v];
    if s == 0 || v == 0 {
        return tally;
    }
    let beta = top_two_beta.clamp(0.0, 1.0);

    for row in 0..s {
        let primary = row_argmax(matrix.primary_row(row));
        if matrix.gate(row) < beta {
            let challenger = row_argmax(matrix.challenger_row(row));
            if challenger != primary {
                tally[primary] += 0.5;
                tally[challenger] += 0.5;
                continue;
            }
        }
        tally[primary] += 1.0;
    }
    for t in tally.iter_mut() {
        *t /= s as f64;
    }
    tally
}

/// Suggested traffic allocation: top-two tally plus the exploration floor,
/// keyed by variant.
pub fn suggest_allocation(
    matrix: &DrawMatrix,
    variants: &[String],
    top_two_beta: f64,
    explore_floor: f64,
) -> BTreeMap<String, f64> {
    debug_assert_eq!(variants.len(), matrix.n_variants());
    let mut weights = top_two_tally(matrix, top_two_beta);
    apply_exploration_floor(&mut weights, explore_floor);
    variants
        .iter()
        .cloned()
        .zip(weights)
        .collect()
}

/// Single-round Thompson selection for hot-path visitor assignment: draw
/// one sample per posterior and return the argmax (earliest index on exact
/// ties).
pub fn select_variant(posteriors: &[Posterior], seed: u64) -> usize {
    let mut rng = StdRng::seed_from_u64(seed);
    let draws: Vec<f64> = posteriors
        .iter()
        .map(|p| match Beta::new(p.alpha, p.beta) {
            Ok(dist) => dist.sample(&mut rng),
            Err(_) => 0.5,
        })
        .collect();
    row_argmax(&draws)
}
