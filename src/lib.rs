//! `uplift`: a Bayesian decision engine for small-sample A/B tests.
//!
//! This crate is designed for experiments where classical testing is
//! silent: tens of visitors per arm, possibly zero conversions on one side.
//! Given per-variant exposure counts, conversion counts, and optional
//! engagement signals, one call produces posterior beliefs, an
//! expected-loss ship/keep-testing/equivalence decision, a top-two
//! Thompson traffic allocation, and a plain-English recommendation.
//!
//! Goals:
//! - **Deterministic by default**: same snapshot + same seed → byte-identical results.
//! - **Honest at small n**: conjugate Beta-Binomial posteriors, expected-loss
//!   stopping, and a ROPE so "no difference that matters" is a first-class verdict.
//! - **Useful at zero conversions**: engagement proxies blend into the posterior
//!   as bounded pseudo-observations instead of being ignored.
//! - **One draw matrix**: every Monte-Carlo quantity in a call comes from a single
//!   shared draw; stages never resample.
//!
//! Pipeline (leaves first):
//! - [`resolve_prior`]: user-specified → project empirical Bayes → `Beta(1, 19)`.
//! - [`summarize_engagement`]: winsorize + CUPED-adjust proxy scores per variant.
//! - [`posterior_for_variant`]: conjugate update, proxy-blended when sparse.
//! - [`DrawMatrix`]: seeded posterior samples; P(best), expected loss, HDIs.
//! - [`decide`]: ROPE / epsilon decision rules.
//! - [`suggest_allocation`]: top-two Thompson sampling with an exploration floor.
//! - [`shrink_effect`]: James-Stein pull of the reported effect (diagnostic only).
//! - [`analyze`]: the orchestrator tying it all together into an [`EngineResult`].
//!
//! Non-goals:
//! - No sequential/frequentist significance testing, no MCMC, no time dynamics.
//! - No storage, HTTP, or event ingestion: the engine is a pure function of an
//!   [`ExperimentSnapshot`]; callers persist history and calibrated weights.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

mod error;
pub use error::*;

mod prior;
pub use prior::*;

mod proxy;
pub use proxy::*;

mod posterior;
pub use posterior::*;

mod sampler;
pub use sampler::*;

mod decision;
pub use decision::*;

mod thompson;
pub use thompson::*;

mod shrinkage;
pub use shrinkage::*;

mod calibrate;
pub use calibrate::*;

mod recommend;
pub use recommend::*;

mod engine;
pub use engine::*;

pub const UPLIFT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hard ceiling on Monte-Carlo draws per variant.
pub const MAX_MC_SAMPLES: usize = 200_000;

/// Hard ceiling on the number of variants.
pub const MAX_VARIANTS: usize = 64;

/// Scope for the CUPED coefficient `theta = cov(y, x) / var(x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CupedThetaSource {
    /// One coefficient from all variants pooled (default).
    #[default]
    Pooled,
    /// A separate coefficient per variant.
    PerVariant,
}

/// Engine configuration. Defaults are supplied here, not by the caller.
///
/// With the `serde` feature, deserialization rejects unknown keys, so a
/// mistyped option fails loudly instead of silently using a default.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields, default))]
pub struct EngineConfig {
    /// Explicit prior for every arm. Absent: empirical Bayes from history,
    /// then the platform default `Beta(1, 19)`.
    pub prior: Option<BetaPrior>,
    /// Expected-loss ship threshold (epsilon), in conversion-rate units.
    pub loss_threshold: f64,
    /// Half-width of the region of practical equivalence.
    pub rope_half_width: f64,
    /// Credible-interval mass for HDIs.
    pub hdi_mass: f64,
    /// Monte-Carlo draws per variant.
    pub mc_samples: usize,
    /// Seed for the draw matrix. Absent means seed 0 (deterministic by default).
    pub mc_seed: Option<u64>,
    /// Below this total exposure the decision is forced to `collecting_data`.
    pub min_total_n: u64,
    /// Minimum total allocation share spread across arms by the bandit floor.
    pub explore_floor: f64,
    /// Probability of a challenger trial in top-two Thompson sampling.
    pub top_two_beta: f64,
    /// Blend engagement proxies into sparse posteriors.
    pub use_proxy: bool,
    /// Upper quantile for proxy winsorization (pooled across variants).
    pub winsorize_p: f64,
    /// Scope of the CUPED coefficient.
    pub cuped_theta_source: CupedThetaSource,
    /// Report James-Stein-shrunk effect sizes alongside raw ones.
    pub shrinkage: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prior: None,
            loss_threshold: 0.005,
            rope_half_width: 0.005,
            hdi_mass: 0.95,
            mc_samples: 20_000,
            mc_seed: None,
            min_total_n: 30,
            explore_floor: 0.10,
            top_two_beta: 0.5,
            use_proxy: true,
            winsorize_p: 0.99,
            cuped_theta_source: CupedThetaSource::Pooled,
            shrinkage: true,
        }
    }
}

impl EngineConfig {
    /// Check every option against its documented range.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(p) = &self.prior {
            if !(p.alpha.is_finite() && p.alpha > 0.0 && p.beta.is_finite() && p.beta > 0.0) {
                return Err(EngineError::config(
                    "prior",
                    format!(
                        "alpha and beta must be finite and positive, got ({}, {})",
                        p.alpha, p.beta
                    ),
                ));
            }
        }
        if !(self.loss_threshold.is_finite() && self.loss_threshold >= 0.0) {
            return Err(EngineError::config(
                "loss_threshold",
                format!("must be a non-negative finite number, got {}", self.loss_threshold),
            ));
        }
        if !(self.rope_half_width.is_finite() && self.rope_half_width >= 0.0) {
            return Err(EngineError::config(
                "rope_half_width",
                format!("must be a non-negative finite number, got {}", self.rope_half_width),
            ));
        }
        if !(self.hdi_mass.is_finite() && self.hdi_mass > 0.0 && self.hdi_mass < 1.0) {
            return Err(EngineError::config(
                "hdi_mass",
                format!("must be in (0, 1), got {}", self.hdi_mass),
            ));
        }
        if self.mc_samples == 0 || self.mc_samples > MAX_MC_SAMPLES {
            return Err(EngineError::config(
                "mc_samples",
                format!("must be in 1..={MAX_MC_SAMPLES}, got {}", self.mc_samples),
            ));
        }
        if !(self.explore_floor.is_finite() && (0.0..=1.0).contains(&self.explore_floor)) {
            return Err(EngineError::config(
                "explore_floor",
                format!("must be in [0, 1], got {}", self.explore_floor),
            ));
        }
        if !(self.top_two_beta.is_finite() && (0.0..=1.0).contains(&self.top_two_beta)) {
            return Err(EngineError::config(
                "top_two_beta",
                format!("must be in [0, 1], got {}", self.top_two_beta),
            ));
        }
        if !(self.winsorize_p.is_finite() && self.winsorize_p > 0.0 && self.winsorize_p <= 1.0) {
            return Err(EngineError::config(
                "winsorize_p",
                format!("must be in (0, 1], got {}", self.winsorize_p),
            ));
        }
        Ok(())
    }
}

/// A completed past experiment, persisted by the caller and fed back in for
/// empirical-Bayes priors, shrinkage, and runtime projections.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompletedExperiment {
    /// Final conversion rate of the control arm.
    pub control_rate: f64,
    /// Final conversion rate of the (best) treatment arm.
    pub treatment_rate: f64,
    /// Control arm sample size.
    pub control_n: u64,
    /// Treatment arm sample size.
    pub treatment_n: u64,
    /// Mean daily visitors while the experiment ran, when known.
    pub daily_visitors: Option<f64>,
}

/// Immutable input to one engine call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExperimentSnapshot {
    /// Opaque experiment identifier, echoed into the result.
    pub experiment_key: String,
    /// Variant keys in order; the first is conventionally the control.
    pub variants: Vec<String>,
    /// Visitors assigned per variant. Missing variants count as 0.
    pub exposures: BTreeMap<String, u64>,
    /// Conversions per variant; never more than the exposures.
    pub conversions: BTreeMap<String, u64>,
    /// Per-visitor engagement proxy scores in `[0, 1]`, where collected.
    #[cfg_attr(feature = "serde", serde(default))]
    pub engagement: BTreeMap<String, Vec<f64>>,
    /// Pre-exposure CUPED covariates, parallel to `engagement` per variant.
    #[cfg_attr(feature = "serde", serde(default))]
    pub covariates: BTreeMap<String, Vec<f64>>,
    /// Engine options.
    #[cfg_attr(feature = "serde", serde(default))]
    pub config: EngineConfig,
    /// Completed experiments from the same project.
    #[cfg_attr(feature = "serde", serde(default))]
    pub history: Vec<CompletedExperiment>,
}

impl ExperimentSnapshot {
    /// Exposures for a variant (0 when absent from the map).
    pub fn exposures_for(&self, variant: &str) -> u64 {
        self.exposures.get(variant).copied().unwrap_or(0)
    }

    /// Conversions for a variant (0 when absent from the map).
    pub fn conversions_for(&self, variant: &str) -> u64 {
        self.conversions.get(variant).copied().unwrap_or(0)
    }

    /// Total exposures across all variants.
    pub fn total_exposures(&self) -> u64 {
        self.variants.iter().map(|v| self.exposures_for(v)).sum()
    }

    /// Total conversions across all variants.
    pub fn total_conversions(&self) -> u64 {
        self.variants.iter().map(|v| self.conversions_for(v)).sum()
    }

    /// Mean historical daily visitor rate, when any history rows carry one.
    pub fn mean_daily_visitors(&self) -> Option<f64> {
        let rates: Vec<f64> = self
            .history
            .iter()
            .filter_map(|h| h.daily_visitors)
            .filter(|d| d.is_finite() && *d > 0.0)
            .collect();
        if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        }
    }

    /// Validate config and data consistency.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.config.validate()?;

        if self.variants.len() < 2 {
            return Err(EngineError::data(format!(
                "need at least 2 variants, got {}",
                self.variants.len()
            )));
        }
        if self.variants.len() > MAX_VARIANTS {
            return Err(EngineError::config(
                "variants",
                format!("at most {MAX_VARIANTS} variants, got {}", self.variants.len()),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for v in &self.variants {
            if !seen.insert(v.as_str()) {
                return Err(EngineError::data(format!("duplicate variant key `{v}`")));
            }
        }

        for key in self.exposures.keys().chain(self.conversions.keys()) {
            if !seen.contains(key.as_str()) {
                return Err(EngineError::data(format!(
                    "unknown variant key `{key}` in counts"
                )));
            }
        }
        for v in &self.variants {
            let n = self.exposures_for(v);
            let k = self.conversions_for(v);
            if k > n {
                return Err(EngineError::data(format!(
                    "variant `{v}` has {k} conversions but only {n} exposures"
                )));
            }
        }

        for (key, scores) in &self.engagement {
            if !seen.contains(key.as_str()) {
                return Err(EngineError::data(format!(
                    "unknown variant key `{key}` in engagement"
                )));
            }
            for s in scores {
                if !(s.is_finite() && (0.0..=1.0).contains(s)) {
                    return Err(EngineError::data(format!(
                        "engagement score {s} for `{key}` outside [0, 1]"
                    )));
                }
            }
        }
        for (key, cov) in &self.covariates {
            if !seen.contains(key.as_str()) {
                return Err(EngineError::data(format!(
                    "unknown variant key `{key}` in covariates"
                )));
            }
            if cov.iter().any(|c| !c.is_finite()) {
                return Err(EngineError::data(format!(
                    "non-finite covariate for `{key}`"
                )));
            }
            let engagement_len = self.engagement.get(key).map(Vec::len).unwrap_or(0);
            if cov.len() != engagement_len {
                return Err(EngineError::data(format!(
                    "covariates for `{key}` have length {} but engagement has {}",
                    cov.len(),
                    engagement_len
                )));
            }
        }

        Ok(())
    }
}
