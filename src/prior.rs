//! Prior resolution for the Beta-Binomial core.
//!
//! Three sources of prior information, tried in order:
//! 1. **User-specified**: an explicit `Beta(alpha, beta)` from the config,
//!    or one elicited from an expected rate plus a confidence weight.
//! 2. **Project historical**: empirical Bayes — moment matching on the
//!    control-arm conversion rates of past completed experiments.
//! 3. **Platform default**: `Beta(1, 19)`, encoding a ~5% expected
//!    conversion rate, which is where small-sample web experiments live.
//!
//! The same prior is applied to every arm; asymmetric priors are out of
//! scope.

use crate::error::EngineError;
use crate::CompletedExperiment;

/// Minimum completed experiments before the historical tier is trusted.
pub const MIN_HISTORY_FOR_PRIOR: usize = 3;

/// Bounds on moment-matched parameters to prevent over-concentration.
const FIT_PARAM_FLOOR: f64 = 0.1;
const FIT_PARAM_CAP: f64 = 1000.0;

/// A Beta prior over a conversion rate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BetaPrior {
    /// Pseudo-successes (must be > 0).
    pub alpha: f64,
    /// Pseudo-failures (must be > 0).
    pub beta: f64,
}

impl BetaPrior {
    /// The platform default `Beta(1, 19)`.
    pub const PLATFORM_DEFAULT: BetaPrior = BetaPrior {
        alpha: 1.0,
        beta: 19.0,
    };

    /// Construct a prior, rejecting non-finite or non-positive parameters.
    pub fn new(alpha: f64, beta: f64) -> Result<Self, EngineError> {
        if !(alpha.is_finite() && alpha > 0.0 && beta.is_finite() && beta > 0.0) {
            return Err(EngineError::config(
                "prior",
                format!("alpha and beta must be finite and positive, got ({alpha}, {beta})"),
            ));
        }
        Ok(Self { alpha, beta })
    }

    /// Elicit a prior from an expected conversion rate and a confidence
    /// weight in pseudo-observations: `alpha = rate * confidence`,
    /// `beta = (1 - rate) * confidence`.
    ///
    /// `rate` must lie strictly inside `(0, 1)` and `confidence` must be
    /// positive. Parameters are floored at `0.01` so an extreme rate still
    /// yields a proper Beta.
    pub fn from_rate_confidence(rate: f64, confidence: f64) -> Result<Self, EngineError> {
        if !(rate.is_finite() && rate > 0.0 && rate < 1.0) {
            return Err(EngineError::config(
                "prior",
                format!("expected rate must be in (0, 1), got {rate}"),
            ));
        }
        if !(confidence.is_finite() && confidence > 0.0) {
            return Err(EngineError::config(
                "prior",
                format!("confidence must be positive, got {confidence}"),
            ));
        }
        Ok(Self {
            alpha: (rate * confidence).max(0.01),
            beta: ((1.0 - rate) * confidence).max(0.01),
        })
    }

    /// Prior mean `alpha / (alpha + beta)`.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

impl Default for BetaPrior {
    fn default() -> Self {
        Self::PLATFORM_DEFAULT
    }
}

/// Which tier produced the prior actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PriorSource {
    UserSpecified,
    ProjectHistorical,
    PlatformDefault,
}

impl PriorSource {
    /// Stable string form, matching the serialized contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorSource::UserSpecified => "user_specified",
            PriorSource::ProjectHistorical => "project_historical",
            PriorSource::PlatformDefault => "platform_default",
        }
    }
}

/// Fit a Beta distribution to observed rates via moment matching.
///
/// Given sample mean `m` and unbiased sample variance `v`:
///
/// ```text
///   alpha = m * (m*(1-m)/v - 1)
///   beta  = (1-m) * (m*(1-m)/v - 1)
/// ```
///
/// Returns `None` when the moments are degenerate (fewer than two rates,
/// mean outside `(0, 1)`, or variance not in `(0, m*(1-m))`) — callers fall
/// back to the platform default. Fitted parameters are clamped to
/// `[0.1, 1000]` to prevent over-concentration from a handful of history
/// rows.
pub fn fit_beta_moments(rates: &[f64]) -> Option<BetaPrior> {
    if rates.len() < 2 {
        return None;
    }
    let n = rates.len() as f64;
    let m = rates.iter().sum::<f64>() / n;
    let v = rates.iter().map(|r| (r - m) * (r - m)).sum::<f64>() / (n - 1.0);

    if !(m > 0.0 && m < 1.0) {
        return None;
    }
    if !(v > 0.0 && v < m * (1.0 - m)) {
        return None;
    }

    let common = m * (1.0 - m) / v - 1.0;
    let alpha = (m * common).clamp(FIT_PARAM_FLOOR, FIT_PARAM_CAP);
    let beta = ((1.0 - m) * common).clamp(FIT_PARAM_FLOOR, FIT_PARAM_CAP);
    if !(alpha.is_finite() && beta.is_finite()) {
        return None;
    }
    Some(BetaPrior { alpha, beta })
}

/// Resolve the prior via the three-tier fallback chain.
///
/// Returns the prior plus the tier that produced it. The historical tier
/// requires at least [`MIN_HISTORY_FOR_PRIOR`] usable control rates; a
/// degenerate moment fit falls through silently to the platform default.
pub fn resolve_prior(
    user: Option<BetaPrior>,
    history: &[CompletedExperiment],
) -> (BetaPrior, PriorSource) {
    if let Some(p) = user {
        return (p, PriorSource::UserSpecified);
    }

    let rates: Vec<f64> = history
        .iter()
        .map(|h| h.control_rate)
        .filter(|r| r.is_finite() && *r > 0.0 && *r < 1.0)
        .collect();
    if rates.len() >= MIN_HISTORY_FOR_PRIOR {
        if let Some(p) = fit_beta_moments(&rates) {
            return (p, PriorSource::ProjectHistorical);
        }
    }

    (BetaPrior::PLATFORM_DEFAULT, PriorSource::PlatformDefault)
}
