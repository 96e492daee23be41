//! James-Stein shrinkage of reported effect sizes.
//!
//! Raw effect sizes from adaptively-stopped experiments overestimate: the
//! winner's curse.  When a project has accumulated enough completed
//! experiments, the reported effect is pulled toward the cross-experiment
//! mean in proportion to how noisy the current estimate is:
//!
//! ```text
//!   d_shrunk = d_bar + tau^2 / (tau^2 + sigma^2) * (d_raw - d_bar)
//! ```
//!
//! where `tau^2` is the between-experiment variance and `sigma^2` the
//! posterior variance of the current effect.  Shrinkage is diagnostic only:
//! ship decisions always use the raw posterior.

use crate::CompletedExperiment;
use crate::sampler::sample_variance;

/// Below this many completed experiments the between-experiment variance is
/// too noisy to trust; shrinkage is disabled and the shrunk effect equals
/// the raw one.
pub const MIN_HISTORY_FOR_SHRINKAGE: usize = 5;

/// Observed effect sizes (treatment minus control) from history, with
/// non-finite rows dropped.
pub fn history_effects(history: &[CompletedExperiment]) -> Vec<f64> {
    history
        .iter()
        .map(|h| h.treatment_rate - h.control_rate)
        .filter(|d| d.is_finite())
        .collect()
}

/// Shrink a raw effect toward the cross-experiment mean.
///
/// `sigma_sq` is the posterior variance of the raw effect (the sample
/// variance of its Monte-Carlo difference draws).  Returns `raw` unchanged
/// when history is below [`MIN_HISTORY_FOR_SHRINKAGE`] experiments.
pub fn shrink_effect(raw: f64, sigma_sq: f64, history: &[CompletedExperiment]) -> f64 {
    let effects = history_effects(history);
    if effects.len() < MIN_HISTORY_FOR_SHRINKAGE {
        return raw;
    }
    let grand_mean = effects.iter().sum::<f64>() / effects.len() as f64;
    let tau_sq = sample_variance(&effects);
    let denom = tau_sq + sigma_sq.max(0.0);
    if denom <= 0.0 {
        return raw;
    }
    grand_mean + tau_sq / denom * (raw - grand_mean)
}
