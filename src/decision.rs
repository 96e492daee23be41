//! Ship / keep-testing / equivalence decision rules.
//!
//! The decision layer reads the Monte-Carlo summaries (expected loss and
//! the HDI of the top-two difference) and classifies the experiment:
//!
//! - `collecting_data`: not enough exposure, or zero conversions with no
//!   proxy signal to lean on.
//! - `practically_equivalent`: the difference HDI sits inside the ROPE.
//! - `ready_to_ship`: the leader's expected loss is below epsilon, the
//!   difference HDI excludes zero, and enough real conversions exist.
//! - `keep_testing`: everything else.
//!
//! All tie-breaks are deterministic: losses within `1e-12` resolve to the
//! earlier variant in the snapshot ordering.

use crate::EngineConfig;

/// Losses closer than this are treated as ties and broken by variant order.
pub const LOSS_TIE_EPSILON: f64 = 1e-12;

/// Shipping requires at least this many conversions across all arms, no
/// matter how confident the proxy-blended posteriors look.
pub const MIN_CONVERSIONS_TO_SHIP: u64 = 3;

/// Cap on the estimated-days projection.
const MAX_ESTIMATED_DAYS: u32 = 90;

/// Experiment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DecisionStatus {
    CollectingData,
    KeepTesting,
    ReadyToShip,
    PracticallyEquivalent,
}

impl DecisionStatus {
    /// Stable string form, matching the serialized contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::CollectingData => "collecting_data",
            DecisionStatus::KeepTesting => "keep_testing",
            DecisionStatus::ReadyToShip => "ready_to_ship",
            DecisionStatus::PracticallyEquivalent => "practically_equivalent",
        }
    }
}

/// Outcome of the ROPE comparison between the top two variants.
///
/// `a` is the earlier of the pair in the snapshot's variant ordering, `b`
/// the later; the compared difference is `b - a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RopeOutcome {
    Equivalent,
    ShipA,
    ShipB,
    Undecided,
}

/// ROPE diagnostics for the top-two pair.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RopeAnalysis {
    /// The region of practical equivalence `[-half_width, +half_width]`.
    pub rope: (f64, f64),
    /// HDI of the difference (later minus earlier variant of the pair).
    pub hdi: (f64, f64),
    /// Classification of the HDI against the ROPE.
    pub decision: RopeOutcome,
}

/// The structured decision record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Decision {
    pub decision_status: DecisionStatus,
    /// Set only for `ready_to_ship`.
    pub winning_variant: Option<String>,
    /// Expected loss of the leading variant.
    pub leading_variant_loss: f64,
    /// The configured loss threshold.
    pub epsilon_threshold: f64,
    /// `min(100, epsilon / leading_loss * 100)`.
    pub confidence_pct: f64,
    /// Days until a decision looks reachable, from the historical daily
    /// visitor rate. Present only while the experiment is still running.
    pub estimated_days: Option<u32>,
}

/// Everything the decision rules need from the upstream stages.
#[derive(Debug, Clone)]
pub struct DecisionContext<'a> {
    /// Variant keys in snapshot order.
    pub variants: &'a [String],
    /// Total exposures across arms.
    pub total_exposures: u64,
    /// Total conversions across arms.
    pub total_conversions: u64,
    /// Expected loss per variant, in variant order.
    pub expected_loss: &'a [f64],
    /// HDI of the top-two difference (later minus earlier of the pair).
    pub diff_hdi: (f64, f64),
    /// True when engagement scores were blended into any posterior.
    pub proxy_informed: bool,
    /// Mean daily visitors from history, when known.
    pub daily_visitors: Option<f64>,
}

/// Indices of the leading variant (minimum expected loss) and the runner-up.
///
/// Ties within [`LOSS_TIE_EPSILON`] resolve to the earlier index.
pub fn leading_pair(expected_loss: &[f64]) -> (usize, usize) {
    debug_assert!(expected_loss.len() >= 2);
    let mut lead = 0usize;
    for (i, &l) in expected_loss.iter().enumerate().skip(1) {
        if l < expected_loss[lead] - LOSS_TIE_EPSILON {
            lead = i;
        }
    }
    let mut run = usize::MAX;
    for (i, &l) in expected_loss.iter().enumerate() {
        if i == lead {
            continue;
        }
        if run == usize::MAX || l < expected_loss[run] - LOSS_TIE_EPSILON {
            run = i;
        }
    }
    (lead, run)
}

/// Classify the difference HDI against the ROPE.
pub fn rope_outcome(hdi: (f64, f64), rope_half_width: f64) -> RopeOutcome {
    let (lo, hi) = hdi;
    let r = rope_half_width;
    if lo >= -r && hi <= r {
        RopeOutcome::Equivalent
    } else if lo > r {
        RopeOutcome::ShipB
    } else if hi < -r {
        RopeOutcome::ShipA
    } else {
        RopeOutcome::Undecided
    }
}

/// Apply the decision rules in order.
pub fn decide(ctx: &DecisionContext<'_>, cfg: &EngineConfig) -> Decision {
    let (lead, _) = leading_pair(ctx.expected_loss);
    let loss = ctx.expected_loss[lead];
    let (hdi_lo, hdi_hi) = ctx.diff_hdi;
    let r = cfg.rope_half_width;

    let status = if ctx.total_exposures < cfg.min_total_n {
        DecisionStatus::CollectingData
    } else if ctx.total_conversions == 0 && !ctx.proxy_informed {
        // No conversions and nothing to proxy them with: the posteriors are
        // still prior-shaped, so any verdict would be noise.
        DecisionStatus::CollectingData
    } else if hdi_lo >= -r && hdi_hi <= r {
        DecisionStatus::PracticallyEquivalent
    } else if loss <= cfg.loss_threshold
        && (hdi_lo > 0.0 || hdi_hi < 0.0)
        && ctx.total_conversions >= MIN_CONVERSIONS_TO_SHIP
    {
        DecisionStatus::ReadyToShip
    } else {
        DecisionStatus::KeepTesting
    };

    let winning_variant = match status {
        DecisionStatus::ReadyToShip => Some(ctx.variants[lead].clone()),
        _ => None,
    };

    let confidence_pct = if loss <= 0.0 {
        100.0
    } else {
        (cfg.loss_threshold / loss * 100.0).min(100.0)
    };

    let estimated_days = match status {
        DecisionStatus::CollectingData | DecisionStatus::KeepTesting => {
            estimate_days(ctx.total_exposures, loss, cfg, ctx.daily_visitors)
        }
        _ => None,
    };

    Decision {
        decision_status: status,
        winning_variant,
        leading_variant_loss: loss,
        epsilon_threshold: cfg.loss_threshold,
        confidence_pct,
        estimated_days,
    }
}

/// Project the days to a decision from the historical daily visitor rate.
///
/// Expected loss shrinks roughly as `1/sqrt(n)`, so reaching epsilon needs
/// about `n * (loss / epsilon)^2` total exposures (never less than the
/// minimum sample floor).
fn estimate_days(
    total_exposures: u64,
    leading_loss: f64,
    cfg: &EngineConfig,
    daily_visitors: Option<f64>,
) -> Option<u32> {
    let daily = daily_visitors.filter(|d| d.is_finite() && *d > 0.0)?;
    let n = total_exposures as f64;
    let ratio = if cfg.loss_threshold > 0.0 {
        leading_loss / cfg.loss_threshold
    } else {
        1.0
    };
    let needed = (n * ratio * ratio).max(cfg.min_total_n as f64);
    let remaining = needed - n;
    if remaining <= 0.0 {
        return Some(1);
    }
    let days = (remaining / daily).ceil();
    Some((days as u32).clamp(1, MAX_ESTIMATED_DAYS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("v{i}")).collect()
    }

    #[test]
    fn leading_pair_picks_min_loss_and_runner_up() {
        assert_eq!(leading_pair(&[0.03, 0.001, 0.02]), (1, 2));
        assert_eq!(leading_pair(&[0.001, 0.03]), (0, 1));
    }

    #[test]
    fn leading_pair_tie_breaks_to_earlier_variant() {
        assert_eq!(leading_pair(&[0.01, 0.01]), (0, 1));
        assert_eq!(leading_pair(&[0.02, 0.01, 0.01 + 1e-14]), (1, 2));
    }

    #[test]
    fn under_sample_floor_collects_data() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 10,
            total_conversions: 2,
            expected_loss: &[0.001, 0.1],
            diff_hdi: (0.01, 0.09),
            proxy_informed: false,
            daily_visitors: None,
        };
        let d = decide(&ctx, &cfg());
        assert_eq!(d.decision_status, DecisionStatus::CollectingData);
        assert!(d.winning_variant.is_none());
    }

    #[test]
    fn zero_conversions_without_proxy_collects_data() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 60,
            total_conversions: 0,
            expected_loss: &[0.004, 0.004],
            diff_hdi: (-0.05, 0.05),
            proxy_informed: false,
            daily_visitors: None,
        };
        assert_eq!(
            decide(&ctx, &cfg()).decision_status,
            DecisionStatus::CollectingData
        );
    }

    #[test]
    fn zero_conversions_with_proxy_keeps_testing() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 100,
            total_conversions: 0,
            expected_loss: &[0.02, 0.0001],
            diff_hdi: (0.04, 0.32),
            proxy_informed: true,
            daily_visitors: None,
        };
        // Proxy lets analysis proceed, but shipping still wants conversions.
        assert_eq!(
            decide(&ctx, &cfg()).decision_status,
            DecisionStatus::KeepTesting
        );
    }

    #[test]
    fn hdi_inside_rope_is_equivalent() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 10_000,
            total_conversions: 900,
            expected_loss: &[0.0004, 0.0005],
            diff_hdi: (-0.004, 0.003),
            proxy_informed: false,
            daily_visitors: None,
        };
        let d = decide(&ctx, &cfg());
        assert_eq!(d.decision_status, DecisionStatus::PracticallyEquivalent);
        assert!(d.winning_variant.is_none());
    }

    #[test]
    fn low_loss_one_sided_hdi_ships() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 2_000,
            total_conversions: 130,
            expected_loss: &[0.03, 0.0001],
            diff_hdi: (0.008, 0.051),
            proxy_informed: false,
            daily_visitors: None,
        };
        let d = decide(&ctx, &cfg());
        assert_eq!(d.decision_status, DecisionStatus::ReadyToShip);
        assert_eq!(d.winning_variant.as_deref(), Some("v1"));
        assert_eq!(d.estimated_days, None);
    }

    #[test]
    fn straddling_hdi_keeps_testing_even_at_low_loss() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 200,
            total_conversions: 1,
            expected_loss: &[0.0025, 0.01],
            diff_hdi: (-0.02, 0.036),
            proxy_informed: false,
            daily_visitors: None,
        };
        assert_eq!(
            decide(&ctx, &cfg()).decision_status,
            DecisionStatus::KeepTesting
        );
    }

    #[test]
    fn sparse_conversions_never_ship() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 100,
            total_conversions: 2,
            expected_loss: &[0.0001, 0.02],
            diff_hdi: (0.04, 0.30),
            proxy_informed: true,
            daily_visitors: None,
        };
        assert_eq!(
            decide(&ctx, &cfg()).decision_status,
            DecisionStatus::KeepTesting
        );
    }

    #[test]
    fn confidence_pct_saturates_at_100() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 2_000,
            total_conversions: 130,
            expected_loss: &[0.03, 0.0001],
            diff_hdi: (0.008, 0.051),
            proxy_informed: false,
            daily_visitors: None,
        };
        let d = decide(&ctx, &cfg());
        assert_eq!(d.confidence_pct, 100.0);

        let ctx2 = DecisionContext {
            expected_loss: &[0.03, 0.01],
            ..ctx
        };
        let d2 = decide(&ctx2, &cfg());
        assert!((d2.confidence_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn estimated_days_from_daily_rate() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 200,
            total_conversions: 10,
            expected_loss: &[0.01, 0.05],
            diff_hdi: (-0.01, 0.05),
            proxy_informed: false,
            daily_visitors: Some(50.0),
        };
        let d = decide(&ctx, &cfg());
        assert_eq!(d.decision_status, DecisionStatus::KeepTesting);
        // needed = 200 * (0.01/0.005)^2 = 800, remaining 600, 12 days at 50/day.
        assert_eq!(d.estimated_days, Some(12));
    }

    #[test]
    fn estimated_days_absent_without_history() {
        let variants = names(2);
        let ctx = DecisionContext {
            variants: &variants,
            total_exposures: 200,
            total_conversions: 10,
            expected_loss: &[0.01, 0.05],
            diff_hdi: (-0.01, 0.05),
            proxy_informed: false,
            daily_visitors: None,
        };
        assert_eq!(decide(&ctx, &cfg()).estimated_days, None);
    }

    #[test]
    fn rope_outcome_classification() {
        assert_eq!(rope_outcome((-0.004, 0.004), 0.005), RopeOutcome::Equivalent);
        assert_eq!(rope_outcome((0.006, 0.04), 0.005), RopeOutcome::ShipB);
        assert_eq!(rope_outcome((-0.04, -0.006), 0.005), RopeOutcome::ShipA);
        assert_eq!(rope_outcome((-0.01, 0.02), 0.005), RopeOutcome::Undecided);
        // Entirely positive but overlapping the ROPE stays undecided.
        assert_eq!(rope_outcome((0.002, 0.03), 0.005), RopeOutcome::Undecided);
    }
}
