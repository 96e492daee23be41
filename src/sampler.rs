//! Monte-Carlo sampling of the joint posterior.
//!
//! One call draws everything the downstream stages need — a primary
//! `S x V` matrix, a challenger matrix for top-two Thompson allocation, and
//! a uniform gate per row — from a single seeded `StdRng` stream.  Every
//! derived quantity (probability-of-best, expected loss, pairwise
//! differences, HDIs, allocation tallies) is computed from this one draw;
//! no stage resamples.
//!
//! Sampling is **seedable and deterministic by default**: an unset
//! `mc_seed` means seed 0, so two calls on the same snapshot are
//! byte-identical.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};

use crate::posterior::Posterior;

/// Index of the row maximum, earliest index on exact ties.
pub(crate) fn row_argmax(row: &[f64]) -> usize {
    let mut best = 0usize;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// The shared draw matrix: correlated posterior samples for every variant.
#[derive(Debug, Clone)]
pub struct DrawMatrix {
    /// Row-major `S x V` primary samples.
    primary: Vec<f64>,
    /// Row-major `S x V` challenger samples (independent second draw).
    challenger: Vec<f64>,
    /// One uniform in `[0, 1)` per row, gating challenger trials.
    gates: Vec<f64>,
    n_samples: usize,
    n_variants: usize,
}

impl DrawMatrix {
    /// Draw `n_samples` rows from each posterior.
    ///
    /// Column order follows `posteriors`; the fill order (all primary
    /// columns, then all challenger columns, then gates) is fixed so a seed
    /// pins the entire matrix.
    pub fn draw(posteriors: &[Posterior], n_samples: usize, seed: u64) -> Self {
        let n_variants = posteriors.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut primary = vec![0.0; n_samples * n_variants];
        let mut challenger = vec![0.0; n_samples * n_variants];

        for (v, post) in posteriors.iter().enumerate() {
            fill_column(&mut primary, n_variants, v, post, n_samples, &mut rng);
        }
        for (v, post) in posteriors.iter().enumerate() {
            fill_column(&mut challenger, n_variants, v, post, n_samples, &mut rng);
        }
        let gates: Vec<f64> = (0..n_samples).map(|_| rng.gen::<f64>()).collect();

        Self {
            primary,
            challenger,
            gates,
            n_samples,
            n_variants,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_variants(&self) -> usize {
        self.n_variants
    }

    /// Primary samples for row `s`.
    pub fn primary_row(&self, s: usize) -> &[f64] {
        &self.primary[s * self.n_variants..(s + 1) * self.n_variants]
    }

    /// Challenger samples for row `s`.
    pub fn challenger_row(&self, s: usize) -> &[f64] {
        &self.challenger[s * self.n_variants..(s + 1) * self.n_variants]
    }

    /// Uniform gate for row `s`.
    pub fn gate(&self, s: usize) -> f64 {
        self.gates[s]
    }

    /// Copy of primary column `v`.
    pub fn column(&self, v: usize) -> Vec<f64> {
        (0..self.n_samples).map(|s| self.primary[s * self.n_variants + v]).collect()
    }

    /// `P(variant v is best)`: the fraction of rows whose maximum sits in
    /// column `v`.  Sums to exactly 1 over variants.
    pub fn probability_best(&self) -> Vec<f64> {
        let mut wins = vec![0u64; self.n_variants];
        for s in 0..self.n_samples {
            wins[row_argmax(self.primary_row(s))] += 1;
        }
        wins.iter().map(|&w| w as f64 / self.n_samples as f64).collect()
    }

    /// Expected loss per variant: `mean(rowmax - column)`, the expected
    /// regret of shipping that variant instead of the unknown best.
    pub fn expected_loss(&self) -> Vec<f64> {
        let mut acc = vec![0.0f64; self.n_variants];
        for s in 0..self.n_samples {
            let row = self.primary_row(s);
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for (v, &x) in row.iter().enumerate() {
                acc[v] += max - x;
            }
        }
        acc.iter().map(|a| a / self.n_samples as f64).collect()
    }

    /// Pairwise difference samples `column(a) - column(b)`.
    pub fn diff_samples(&self, a: usize, b: usize) -> Vec<f64> {
        (0..self.n_samples)
            .map(|s| {
                let row = self.primary_row(s);
                row[a] - row[b]
            })
            .collect()
    }

    /// Fraction of rows where `column(b) > column(a)`.
    pub fn probability_greater(&self, b: usize, a: usize) -> f64 {
        let mut count = 0u64;
        for s in 0..self.n_samples {
            let row = self.primary_row(s);
            if row[b] > row[a] {
                count += 1;
            }
        }
        count as f64 / self.n_samples as f64
    }
}

fn fill_column(
    matrix: &mut [f64],
    n_variants: usize,
    v: usize,
    post: &Posterior,
    n_samples: usize,
    rng: &mut StdRng,
) {
    match Beta::new(post.alpha, post.beta) {
        Ok(dist) => {
            for s in 0..n_samples {
                matrix[s * n_variants + v] = dist.sample(rng);
            }
        }
        // alpha/beta are validated positive upstream; midpoint fallback on
        // a malformed distribution rather than a panic.
        Err(_) => {
            for s in 0..n_samples {
                matrix[s * n_variants + v] = 0.5;
            }
        }
    }
}

/// Highest-density interval from Monte-Carlo samples.
///
/// Sorted-interval method: the narrowest window over the sorted samples
/// containing `ceil(mass * n)` of them.  Earliest window wins on width
/// ties, which keeps the result deterministic.
pub fn hdi_from_samples(samples: &[f64], mass: f64) -> (f64, f64) {
    debug_assert!(!samples.is_empty());
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let window = ((mass * n as f64).ceil() as usize).max(1);
    if window >= n {
        return (sorted[0], sorted[n - 1]);
    }

    let mut best_idx = 0usize;
    let mut best_width = f64::INFINITY;
    for i in 0..=(n - window) {
        let width = sorted[i + window - 1] - sorted[i];
        if width < best_width {
            best_width = width;
            best_idx = i;
        }
    }
    (sorted[best_idx], sorted[best_idx + window - 1])
}

/// Unbiased sample variance; 0 for fewer than two samples.
pub fn sample_variance(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.0)
}
