//! The engine orchestrator: one call from snapshot to result.
//!
//! `analyze` wires the stages in leaves-first order — prior resolution and
//! proxy summaries feed the posteriors, the posteriors feed one shared
//! draw matrix, and every decision artifact (status, allocation, effect
//! sizes, recommendation) is derived from that single draw.  The call is a
//! pure function: no global state, no logging, no retries.

use std::collections::BTreeMap;

use crate::decision::{decide, leading_pair, rope_outcome, Decision, DecisionContext, RopeAnalysis};
use crate::error::EngineError;
use crate::posterior::{posterior_for_variant, SPARSE_CELL_THRESHOLD};
use crate::prior::{resolve_prior, PriorSource};
use crate::proxy::{compare_engagement, summarize_engagement};
use crate::recommend::{recommendation_text, RecommendationInputs};
use crate::sampler::{hdi_from_samples, sample_variance, DrawMatrix};
use crate::shrinkage::shrink_effect;
use crate::thompson::suggest_allocation;
use crate::{CompletedExperiment, ExperimentSnapshot};

/// Per-variant slice of the result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VariantReport {
    pub variant_key: String,
    pub visitors: u64,
    pub conversions: u64,
    /// Observed `k / n`, or 0 when `n == 0`.
    pub conversion_rate: f64,
    pub posterior_alpha: f64,
    pub posterior_beta: f64,
    pub posterior_mean: f64,
    /// HDI of the conversion rate at the configured mass.
    pub credible_interval: (f64, f64),
    /// Mean engagement proxy score, when collected.
    pub engagement_score: Option<f64>,
    pub probability_best: f64,
    pub expected_loss: f64,
}

/// Complete analysis result: the serialized contract consumed by the
/// dashboard and the API layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineResult {
    pub experiment_key: String,
    pub total_visitors: u64,
    pub variants: Vec<VariantReport>,
    /// `P(variant B beats variant A)`; only for two-variant experiments.
    pub probability_b_beats_a: Option<f64>,
    pub decision: Decision,
    pub rope_analysis: Option<RopeAnalysis>,
    /// Sums to 1 within 1e-9; every arm holds at least the exploration floor.
    pub suggested_allocation: BTreeMap<String, f64>,
    /// Leading (or best challenger) posterior mean minus control's. Absent
    /// before any exposure.
    pub raw_effect_size: Option<f64>,
    /// James-Stein-shrunk counterpart; equals the raw effect without enough
    /// history or with shrinkage disabled.
    pub shrunk_effect_size: Option<f64>,
    pub prior_used: PriorSource,
    pub recommendation: String,
}

impl CompletedExperiment {
    /// Build the persistable history record from a finished experiment's
    /// result.  The control is the first variant; the treatment is the best
    /// non-control arm by posterior mean.  Returns `None` for results with
    /// fewer than two variants.
    pub fn from_result(result: &EngineResult, daily_visitors: Option<f64>) -> Option<Self> {
        let control = result.variants.first()?;
        let treatment = result
            .variants
            .iter()
            .skip(1)
            .reduce(|best, v| if v.posterior_mean > best.posterior_mean { v } else { best })?;
        Some(Self {
            control_rate: control.conversion_rate,
            treatment_rate: treatment.conversion_rate,
            control_n: control.visitors,
            treatment_n: treatment.visitors,
            daily_visitors,
        })
    }
}

/// Run the full analysis pipeline on a snapshot.
///
/// Errors only on invalid config or inconsistent data; an experiment with
/// no traffic at all still returns a well-formed `collecting_data` result
/// with prior-shaped posteriors and a uniform allocation.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeMap;
/// use uplift::{analyze, EngineConfig, ExperimentSnapshot};
///
/// let snapshot = ExperimentSnapshot {
///     experiment_key: "cta-color".to_string(),
///     variants: vec!["control".to_string(), "variant".to_string()],
///     exposures: BTreeMap::from([
///         ("control".to_string(), 100),
///         ("variant".to_string(), 100),
///     ]),
///     conversions: BTreeMap::from([
///         ("control".to_string(), 1),
///         ("variant".to_string(), 0),
///     ]),
///     engagement: BTreeMap::new(),
///     covariates: BTreeMap::new(),
///     config: EngineConfig::default(),
///     history: Vec::new(),
/// };
///
/// let result = analyze(&snapshot).unwrap();
/// assert_eq!(result.total_visitors, 200);
/// assert_eq!(result.decision.decision_status.as_str(), "keep_testing");
/// let total: f64 = result.suggested_allocation.values().sum();
/// assert!((total - 1.0).abs() < 1e-9);
/// ```
pub fn analyze(snapshot: &ExperimentSnapshot) -> Result<EngineResult, EngineError> {
    snapshot.validate()?;

    let cfg = &snapshot.config;
    let variants = &snapshot.variants;
    let n_variants = variants.len();
    let total_exposures = snapshot.total_exposures();
    let total_conversions = snapshot.total_conversions();

    let (prior, prior_used) = resolve_prior(cfg.prior, &snapshot.history);
    let proxy_summaries = summarize_engagement(snapshot);

    let mut posteriors = Vec::with_capacity(n_variants);
    let mut proxy_informed = false;
    for v in variants {
        let n = snapshot.exposures_for(v);
        let k = snapshot.conversions_for(v);
        let proxy = proxy_summaries.get(v).copied();
        if cfg.use_proxy
            && k.min(n - k) < SPARSE_CELL_THRESHOLD
            && proxy.map(|p| p.n > 0).unwrap_or(false)
        {
            proxy_informed = true;
        }
        posteriors.push(posterior_for_variant(prior, k, n, proxy, cfg.use_proxy));
    }

    let seed = cfg.mc_seed.unwrap_or(0);
    let matrix = DrawMatrix::draw(&posteriors, cfg.mc_samples, seed);
    let probability_best = matrix.probability_best();
    let expected_loss = matrix.expected_loss();

    // Top-two pair, order-normalized so the reported diff is "later minus
    // earlier" in the variant ordering.
    let (lead, runner_up) = leading_pair(&expected_loss);
    let (a_idx, b_idx) = (lead.min(runner_up), lead.max(runner_up));
    let diff = matrix.diff_samples(b_idx, a_idx);
    let diff_hdi = hdi_from_samples(&diff, cfg.hdi_mass);
    let rope_analysis = RopeAnalysis {
        rope: (-cfg.rope_half_width, cfg.rope_half_width),
        hdi: diff_hdi,
        decision: rope_outcome(diff_hdi, cfg.rope_half_width),
    };

    let decision = decide(
        &DecisionContext {
            variants,
            total_exposures,
            total_conversions,
            expected_loss: &expected_loss,
            diff_hdi,
            proxy_informed,
            daily_visitors: snapshot.mean_daily_visitors(),
        },
        cfg,
    );

    let suggested_allocation = if total_exposures == 0 {
        // Nothing observed: an exact uniform split, not a sampled one.
        let share = 1.0 / n_variants as f64;
        variants.iter().map(|v| (v.clone(), share)).collect()
    } else {
        suggest_allocation(&matrix, variants, cfg.top_two_beta, cfg.explore_floor)
    };

    // Reported effect: the leading variant against the control, or the best
    // challenger when the control itself leads.
    let (raw_effect_size, shrunk_effect_size) = if total_exposures == 0 {
        (None, None)
    } else {
        let challenger = if lead == 0 { runner_up } else { lead };
        let raw = posteriors[challenger].mean() - posteriors[0].mean();
        let effect_diff = matrix.diff_samples(challenger, 0);
        let sigma_sq = sample_variance(&effect_diff);
        let shrunk = if cfg.shrinkage {
            shrink_effect(raw, sigma_sq, &snapshot.history)
        } else {
            raw
        };
        (Some(raw), Some(shrunk))
    };

    let probability_b_beats_a = if n_variants == 2 {
        Some(matrix.probability_greater(1, 0))
    } else {
        None
    };

    let engagement_comparison = compare_engagement(&proxy_summaries);
    let recommendation = recommendation_text(&RecommendationInputs {
        decision: &decision,
        rope: Some(&rope_analysis),
        variants,
        leader_index: lead,
        probability_best: &probability_best,
        total_visitors: total_exposures,
        total_conversions,
        hdi_mass: cfg.hdi_mass,
        min_total_n: cfg.min_total_n,
        engagement: engagement_comparison.as_ref(),
    });

    let reports = variants
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let n = snapshot.exposures_for(v);
            let k = snapshot.conversions_for(v);
            let column = matrix.column(i);
            VariantReport {
                variant_key: v.clone(),
                visitors: n,
                conversions: k,
                conversion_rate: if n > 0 { k as f64 / n as f64 } else { 0.0 },
                posterior_alpha: posteriors[i].alpha,
                posterior_beta: posteriors[i].beta,
                posterior_mean: posteriors[i].mean(),
                credible_interval: hdi_from_samples(&column, cfg.hdi_mass),
                engagement_score: proxy_summaries.get(v).map(|p| p.mean),
                probability_best: probability_best[i],
                expected_loss: expected_loss[i],
            }
        })
        .collect();

    Ok(EngineResult {
        experiment_key: snapshot.experiment_key.clone(),
        total_visitors: total_exposures,
        variants: reports,
        probability_b_beats_a,
        decision,
        rope_analysis: Some(rope_analysis),
        suggested_allocation,
        raw_effect_size,
        shrunk_effect_size,
        prior_used,
        recommendation,
    })
}
