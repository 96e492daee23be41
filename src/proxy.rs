//! Engagement proxy scoring and variance reduction.
//!
//! When an experiment has too few conversions to move a posterior (1 vs 0
//! on ~100 visitors), per-visitor engagement serves as a leading indicator.
//! This module covers both ends of that pipeline:
//!
//! - [`engagement_score`]: collapse raw behavioural signals (scroll depth,
//!   active time, clicks, form engagement) into one bounded score. This is
//!   what ingestion-side callers run per visitor before building a snapshot.
//! - [`summarize_engagement`]: winsorize the per-visitor score arrays at a
//!   pooled quantile, optionally apply CUPED variance reduction against a
//!   pre-exposure covariate, and reduce each variant to a mean plus an
//!   effective sample size.

use std::collections::BTreeMap;

use crate::{CupedThetaSource, EngineConfig, ExperimentSnapshot};

/// Soft ceilings used to normalize raw signals into `[0, 1]`.
pub const MAX_SCROLL_DEPTH_PCT: f64 = 100.0;
pub const MAX_ACTIVE_TIME_MS: f64 = 60_000.0;
pub const MAX_CLICKS: f64 = 10.0;

/// Raw behavioural signals for a single visitor.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngagementSignals {
    /// Maximum scroll depth reached, in percent (0–100).
    pub scroll_depth_pct: f64,
    /// Active time on page, in milliseconds.
    pub active_time_ms: f64,
    /// Click interactions.
    pub clicks: u32,
    /// Whether the visitor interacted with a form.
    pub form_engaged: bool,
}

/// Weights for the four engagement signals.
///
/// The defaults `(0.3, 0.3, 0.2, 0.2)` are the platform baseline; the
/// calibrator replaces them with OLS-fitted weights once a project has
/// enough labelled history.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProxyWeights {
    pub scroll: f64,
    pub time: f64,
    pub clicks: f64,
    pub form: f64,
}

impl Default for ProxyWeights {
    fn default() -> Self {
        Self {
            scroll: 0.3,
            time: 0.3,
            clicks: 0.2,
            form: 0.2,
        }
    }
}

impl ProxyWeights {
    /// Sum of the four weights.
    pub fn total(&self) -> f64 {
        self.scroll + self.time + self.clicks + self.form
    }

    /// Return a copy scaled so the weights sum to 1 (no-op on a zero sum).
    pub fn normalized(&self) -> Self {
        let t = self.total();
        if !(t.is_finite() && t > 0.0) {
            return *self;
        }
        Self {
            scroll: self.scroll / t,
            time: self.time / t,
            clicks: self.clicks / t,
            form: self.form / t,
        }
    }
}

/// Compute the composite engagement score for one visitor.
///
/// Each signal saturates at its soft ceiling (scroll at 100%, active time at
/// 60 s, clicks at 10) before the weighted combination, so the result stays
/// in `[0, 1]` for normalized weights.
///
/// # Example
///
/// ```rust
/// use uplift::{engagement_score, EngagementSignals, ProxyWeights};
///
/// let signals = EngagementSignals {
///     scroll_depth_pct: 80.0,
///     active_time_ms: 30_000.0,
///     clicks: 5,
///     form_engaged: false,
/// };
/// let score = engagement_score(&signals, &ProxyWeights::default());
/// assert!((score - (0.3 * 0.8 + 0.3 * 0.5 + 0.2 * 0.5)).abs() < 1e-9);
/// ```
pub fn engagement_score(signals: &EngagementSignals, weights: &ProxyWeights) -> f64 {
    let w = weights.normalized();
    let scroll = (signals.scroll_depth_pct.max(0.0) / MAX_SCROLL_DEPTH_PCT).min(1.0);
    let time = (signals.active_time_ms.max(0.0) / MAX_ACTIVE_TIME_MS).min(1.0);
    let clicks = (f64::from(signals.clicks) / MAX_CLICKS).min(1.0);
    let form = if signals.form_engaged { 1.0 } else { 0.0 };
    (w.scroll * scroll + w.time * time + w.clicks * clicks + w.form * form).clamp(0.0, 1.0)
}

/// Linear-interpolation quantile of a sorted slice (`q` in `[0, 1]`).
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Winsorization cap: the `p`-quantile of all scores pooled across variants.
///
/// Returns `None` when there are no scores.
pub fn winsorize_cap(scores: &BTreeMap<String, Vec<f64>>, p: f64) -> Option<f64> {
    let mut pooled: Vec<f64> = scores.values().flatten().copied().collect();
    if pooled.is_empty() {
        return None;
    }
    pooled.sort_by(f64::total_cmp);
    Some(quantile_sorted(&pooled, p))
}

/// CUPED coefficient `theta = cov(y, x) / var(x)`.
///
/// Returns `None` when the covariate is (near-)constant, in which case the
/// adjustment would be a no-op anyway.
pub fn cuped_theta(y: &[f64], x: &[f64]) -> Option<f64> {
    if y.len() != x.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let var_x = x.iter().map(|v| (v - mean_x) * (v - mean_x)).sum::<f64>() / n;
    if var_x < 1e-10 {
        return None;
    }
    let cov = y
        .iter()
        .zip(x.iter())
        .map(|(yi, xi)| (yi - mean_y) * (xi - mean_x))
        .sum::<f64>()
        / n;
    Some(cov / var_x)
}

/// Apply the CUPED adjustment `y - theta * (x - x_bar)`.
pub fn cuped_adjust(y: &[f64], x: &[f64], theta: f64, x_bar: f64) -> Vec<f64> {
    y.iter()
        .zip(x.iter())
        .map(|(yi, xi)| yi - theta * (xi - x_bar))
        .collect()
}

/// Per-variant proxy summary: the adjusted mean and how many visitors it
/// rests on.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProxySummary {
    /// Mean adjusted score, clamped to `[0, 1]`.
    pub mean: f64,
    /// Number of visitors with an engagement score.
    pub n: usize,
}

/// Winsorize, CUPED-adjust, and summarize engagement scores per variant.
///
/// Variants without any scores are absent from the output map. The
/// winsorization cap is computed pooled across all variants; the CUPED
/// coefficient scope follows `config.cuped_theta_source`.
pub fn summarize_engagement(snapshot: &ExperimentSnapshot) -> BTreeMap<String, ProxySummary> {
    let cfg: &EngineConfig = &snapshot.config;
    let mut out = BTreeMap::new();

    let cap = match winsorize_cap(&snapshot.engagement, cfg.winsorize_p) {
        Some(c) => c,
        None => return out,
    };

    // Winsorized score arrays, in variant order.
    let mut winsorized: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for v in &snapshot.variants {
        if let Some(scores) = snapshot.engagement.get(v) {
            if !scores.is_empty() {
                winsorized.insert(v.as_str(), scores.iter().map(|s| s.min(cap)).collect());
            }
        }
    }

    // Pooled CUPED coefficient, when requested and covariates exist.
    let pooled_theta = if cfg.cuped_theta_source == CupedThetaSource::Pooled {
        let mut ys = Vec::new();
        let mut xs = Vec::new();
        for (v, scores) in &winsorized {
            if let Some(cov) = snapshot.covariates.get(*v) {
                ys.extend_from_slice(scores);
                xs.extend_from_slice(cov);
            }
        }
        cuped_theta(&ys, &xs).map(|theta| {
            let x_bar = xs.iter().sum::<f64>() / xs.len() as f64;
            (theta, x_bar)
        })
    } else {
        None
    };

    for (v, scores) in winsorized {
        let adjusted = match (snapshot.covariates.get(v), cfg.cuped_theta_source) {
            (Some(cov), CupedThetaSource::Pooled) => match pooled_theta {
                Some((theta, x_bar)) => cuped_adjust(&scores, cov, theta, x_bar),
                None => scores,
            },
            (Some(cov), CupedThetaSource::PerVariant) => match cuped_theta(&scores, cov) {
                Some(theta) => {
                    let x_bar = cov.iter().sum::<f64>() / cov.len() as f64;
                    cuped_adjust(&scores, cov, theta, x_bar)
                }
                None => scores,
            },
            (None, _) => scores,
        };
        let mean = adjusted.iter().sum::<f64>() / adjusted.len() as f64;
        out.insert(
            v.to_string(),
            ProxySummary {
                mean: mean.clamp(0.0, 1.0),
                n: adjusted.len(),
            },
        );
    }

    out
}

/// Engagement gap between the strongest and weakest variants.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngagementComparison {
    /// Variant with the highest mean engagement.
    pub best: String,
    /// Variant with the lowest mean engagement.
    pub worst: String,
    pub best_mean: f64,
    pub worst_mean: f64,
}

impl EngagementComparison {
    /// Absolute gap between best and worst means.
    pub fn gap(&self) -> f64 {
        self.best_mean - self.worst_mean
    }
}

/// Compare mean engagement across variants.
///
/// Needs at least two variants with scores; ties resolve to the variant
/// earlier in key order (the map's iteration order).
pub fn compare_engagement(
    summaries: &BTreeMap<String, ProxySummary>,
) -> Option<EngagementComparison> {
    if summaries.len() < 2 {
        return None;
    }
    let mut iter = summaries.iter();
    let (first_key, first) = iter.next()?;
    let mut best = (first_key.clone(), first.mean);
    let mut worst = (first_key.clone(), first.mean);
    for (k, s) in iter {
        if s.mean > best.1 {
            best = (k.clone(), s.mean);
        }
        if s.mean < worst.1 {
            worst = (k.clone(), s.mean);
        }
    }
    Some(EngagementComparison {
        best: best.0,
        worst: worst.0,
        best_mean: best.1,
        worst_mean: worst.1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineConfig, ExperimentSnapshot};

    fn snapshot_with(
        engagement: BTreeMap<String, Vec<f64>>,
        covariates: BTreeMap<String, Vec<f64>>,
        cfg: EngineConfig,
    ) -> ExperimentSnapshot {
        ExperimentSnapshot {
            experiment_key: "exp".to_string(),
            variants: vec!["a".to_string(), "b".to_string()],
            exposures: BTreeMap::from([("a".to_string(), 10), ("b".to_string(), 10)]),
            conversions: BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 0)]),
            engagement,
            covariates,
            config: cfg,
            history: Vec::new(),
        }
    }

    #[test]
    fn engagement_score_saturates_each_signal() {
        let w = ProxyWeights::default();
        let maxed = EngagementSignals {
            scroll_depth_pct: 250.0,
            active_time_ms: 600_000.0,
            clicks: 40,
            form_engaged: true,
        };
        assert!((engagement_score(&maxed, &w) - 1.0).abs() < 1e-12);

        let idle = EngagementSignals::default();
        assert_eq!(engagement_score(&idle, &w), 0.0);
    }

    #[test]
    fn engagement_score_weights_components() {
        let w = ProxyWeights::default();
        // Full scroll only: 0.3 of the mass.
        let s = EngagementSignals {
            scroll_depth_pct: 100.0,
            ..Default::default()
        };
        assert!((engagement_score(&s, &w) - 0.3).abs() < 1e-12);

        // Half the time ceiling: 0.3 * 0.5.
        let s = EngagementSignals {
            active_time_ms: 30_000.0,
            ..Default::default()
        };
        assert!((engagement_score(&s, &w) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn custom_weights_change_the_score() {
        let s = EngagementSignals {
            scroll_depth_pct: 100.0,
            active_time_ms: 60_000.0,
            ..Default::default()
        };
        let all_scroll = ProxyWeights {
            scroll: 1.0,
            time: 0.0,
            clicks: 0.0,
            form: 0.0,
        };
        assert!((engagement_score(&s, &all_scroll) - 1.0).abs() < 1e-12);
        assert!(engagement_score(&s, &ProxyWeights::default()) < 1.0);
    }

    #[test]
    fn winsorize_caps_pooled_outliers() {
        let scores = BTreeMap::from([
            ("a".to_string(), vec![0.1; 50]),
            ("b".to_string(), vec![0.1; 49].into_iter().chain([1.0]).collect()),
        ]);
        let cap = winsorize_cap(&scores, 0.95).unwrap();
        assert!(cap < 1.0, "cap={cap}");

        let snap = snapshot_with(scores, BTreeMap::new(), EngineConfig::default());
        let summary = summarize_engagement(&snap);
        // The single 1.0 outlier in "b" is capped, so the means stay close.
        let a = summary.get("a").unwrap().mean;
        let b = summary.get("b").unwrap().mean;
        assert!(b - a < 0.02, "a={a} b={b}");
    }

    #[test]
    fn summary_means_and_sizes() {
        let scores = BTreeMap::from([
            ("a".to_string(), vec![0.2, 0.4]),
            ("b".to_string(), vec![0.6]),
        ]);
        let snap = snapshot_with(scores, BTreeMap::new(), EngineConfig::default());
        let summary = summarize_engagement(&snap);
        assert_eq!(summary.get("a").unwrap().n, 2);
        assert!((summary.get("a").unwrap().mean - 0.3).abs() < 1e-9);
        assert_eq!(summary.get("b").unwrap().n, 1);
    }

    #[test]
    fn no_engagement_yields_empty_summary() {
        let snap = snapshot_with(BTreeMap::new(), BTreeMap::new(), EngineConfig::default());
        assert!(summarize_engagement(&snap).is_empty());
    }

    #[test]
    fn cuped_reduces_variance_when_correlated() {
        // Post scores correlated with a pre-exposure covariate.
        let x: Vec<f64> = (0..40).map(|i| 0.2 + 0.01 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v + 0.1).collect();
        let theta = cuped_theta(&y, &x).unwrap();
        let x_bar = x.iter().sum::<f64>() / x.len() as f64;
        let adjusted = cuped_adjust(&y, &x, theta, x_bar);

        let var = |s: &[f64]| {
            let m = s.iter().sum::<f64>() / s.len() as f64;
            s.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / s.len() as f64
        };
        assert!(var(&adjusted) < var(&y) * 0.01, "perfectly correlated covariate should absorb variance");
    }

    #[test]
    fn cuped_theta_none_for_constant_covariate() {
        assert!(cuped_theta(&[0.1, 0.2, 0.3], &[0.5, 0.5, 0.5]).is_none());
        assert!(cuped_theta(&[0.1, 0.2], &[0.5]).is_none());
    }

    #[test]
    fn compare_engagement_finds_the_gap() {
        let summaries = BTreeMap::from([
            ("a".to_string(), ProxySummary { mean: 0.10, n: 50 }),
            ("b".to_string(), ProxySummary { mean: 0.40, n: 50 }),
        ]);
        let cmp = compare_engagement(&summaries).unwrap();
        assert_eq!(cmp.best, "b");
        assert_eq!(cmp.worst, "a");
        assert!((cmp.gap() - 0.30).abs() < 1e-12);

        let single = BTreeMap::from([("a".to_string(), ProxySummary { mean: 0.1, n: 1 })]);
        assert!(compare_engagement(&single).is_none());
    }

    #[test]
    fn per_variant_theta_scope() {
        let mut cfg = EngineConfig::default();
        cfg.cuped_theta_source = CupedThetaSource::PerVariant;
        let engagement = BTreeMap::from([(
            "a".to_string(),
            vec![0.2, 0.3, 0.4, 0.5],
        )]);
        let covariates = BTreeMap::from([(
            "a".to_string(),
            vec![0.1, 0.2, 0.3, 0.4],
        )]);
        let snap = snapshot_with(engagement, covariates, cfg);
        let summary = summarize_engagement(&snap);
        // Adjustment is mean-preserving: the mean equals the raw mean.
        assert!((summary.get("a").unwrap().mean - 0.35).abs() < 1e-9);
    }
}
