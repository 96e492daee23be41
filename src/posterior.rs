//! Beta-Binomial conjugate posteriors, with optional proxy blending.
//!
//! The posterior update is closed-form: `Beta(a0 + k, b0 + n - k)`.  When
//! conversions are too sparse to move that posterior on their own, the
//! engagement proxy mean enters as a bounded pseudo-observation so the
//! engine can still rank arms at zero conversions.  Both paths are fully
//! deterministic; sampling happens downstream.

use crate::prior::BetaPrior;
use crate::proxy::ProxySummary;

/// Proxy pseudo-observations are capped at this weight, so one real
/// conversion signal quickly dominates the blend.
pub const PROXY_BLEND_MAX_WEIGHT: f64 = 30.0;

/// A variant counts as conversion-sparse while its smaller binomial cell
/// (`min(k, n - k)`) is below this.
pub const SPARSE_CELL_THRESHOLD: u64 = 5;

/// Posterior Beta distribution for one variant's conversion rate.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Posterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Posterior {
    /// The prior itself, before any data.
    pub fn from_prior(prior: BetaPrior) -> Self {
        Self {
            alpha: prior.alpha,
            beta: prior.beta,
        }
    }

    /// Conjugate update after observing `conversions` out of `exposures`.
    pub fn update(prior: BetaPrior, conversions: u64, exposures: u64) -> Self {
        debug_assert!(conversions <= exposures);
        Self {
            alpha: prior.alpha + conversions as f64,
            beta: prior.beta + (exposures - conversions) as f64,
        }
    }

    /// Blend the proxy mean in as `w` pseudo-observations with that mean:
    /// `alpha += w * mu`, `beta += w * (1 - mu)`.
    pub fn blend_proxy(self, proxy_mean: f64, weight: f64) -> Self {
        let mu = proxy_mean.clamp(0.0, 1.0);
        let w = weight.max(0.0);
        Self {
            alpha: self.alpha + w * mu,
            beta: self.beta + w * (1.0 - mu),
        }
    }

    /// Posterior mean `alpha / (alpha + beta)`.
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Posterior variance `a*b / ((a+b)^2 * (a+b+1))`.
    pub fn variance(&self) -> f64 {
        let ab = self.alpha + self.beta;
        (self.alpha * self.beta) / (ab * ab * (ab + 1.0))
    }
}

/// Build the posterior for one variant.
///
/// The pure conjugate posterior is used whenever conversions carry enough
/// signal.  When `use_proxy` is on, the variant is conversion-sparse
/// (`min(k, n-k)` below [`SPARSE_CELL_THRESHOLD`]), and engagement scores
/// exist, the proxy mean is blended in with weight
/// `min(n, PROXY_BLEND_MAX_WEIGHT)`.
pub fn posterior_for_variant(
    prior: BetaPrior,
    conversions: u64,
    exposures: u64,
    proxy: Option<ProxySummary>,
    use_proxy: bool,
) -> Posterior {
    let posterior = Posterior::update(prior, conversions, exposures);
    if !use_proxy {
        return posterior;
    }
    let sparse = conversions.min(exposures - conversions) < SPARSE_CELL_THRESHOLD;
    match proxy {
        Some(p) if sparse && p.n > 0 => {
            let weight = (exposures as f64).min(PROXY_BLEND_MAX_WEIGHT);
            posterior.blend_proxy(p.mean, weight)
        }
        _ => posterior,
    }
}
