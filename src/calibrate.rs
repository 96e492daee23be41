//! Offline calibration of engagement weights against real conversions.
//!
//! Given labelled per-visitor rows from completed experiments (the four
//! normalized engagement signals plus whether the visitor converted), fit
//! ordinary least squares `beta = (X^T X)^-1 X^T y`, clip negative
//! coefficients to zero, and normalize to sum to 1.  The result replaces
//! the default [`ProxyWeights`] for future proxy scoring.
//!
//! Calibration is pure and idempotent; the caller persists the output.

use crate::proxy::ProxyWeights;

/// Number of engagement features.
const DIM: usize = 4;

/// Ridge term added to the normal equations for numerical stability.
const RIDGE: f64 = 1e-6;

/// Fewer labelled rows than this and the fit is not worth trusting.
pub const MIN_CALIBRATION_ROWS: usize = 10;

/// One labelled visitor: normalized engagement signals plus the conversion
/// outcome.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationRow {
    /// Scroll depth, normalized to `[0, 1]`.
    pub scroll_depth: f64,
    /// Active time, normalized to `[0, 1]`.
    pub time_on_page: f64,
    /// Click count, normalized to `[0, 1]`.
    pub click_count: f64,
    /// Form engagement flag as `0.0` / `1.0`.
    pub form_engagement: f64,
    /// Did this visitor convert?
    pub converted: bool,
}

impl CalibrationRow {
    fn features(&self) -> [f64; DIM] {
        [
            self.scroll_depth,
            self.time_on_page,
            self.click_count,
            self.form_engagement,
        ]
    }
}

/// Solve `a * x = b` for a small dense system via Gaussian elimination with
/// partial pivoting.  `a` is row-major `DIM x DIM`.
fn solve_linear(mut a: [f64; DIM * DIM], mut b: [f64; DIM]) -> Option<[f64; DIM]> {
    for col in 0..DIM {
        // Pivot on the largest remaining magnitude in this column.
        let mut pivot = col;
        for row in (col + 1)..DIM {
            if a[row * DIM + col].abs() > a[pivot * DIM + col].abs() {
                pivot = row;
            }
        }
        if a[pivot * DIM + col].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..DIM {
                a.swap(col * DIM + k, pivot * DIM + k);
            }
            b.swap(col, pivot);
        }
        for row in (col + 1)..DIM {
            let factor = a[row * DIM + col] / a[col * DIM + col];
            for k in col..DIM {
                a[row * DIM + k] -= factor * a[col * DIM + k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; DIM];
    for col in (0..DIM).rev() {
        let mut acc = b[col];
        for k in (col + 1)..DIM {
            acc -= a[col * DIM + k] * x[k];
        }
        x[col] = acc / a[col * DIM + col];
    }
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(x)
}

/// Fit engagement weights from labelled history.
///
/// Returns `None` when there are fewer than [`MIN_CALIBRATION_ROWS`] rows,
/// the normal equations are singular, or every fitted coefficient clips to
/// zero.
pub fn calibrate_weights(rows: &[CalibrationRow]) -> Option<ProxyWeights> {
    if rows.len() < MIN_CALIBRATION_ROWS {
        return None;
    }
    if rows
        .iter()
        .any(|r| r.features().iter().any(|f| !f.is_finite()))
    {
        return None;
    }

    // Normal equations: X^T X (ridge-regularized) and X^T y.
    let mut xtx = [0.0f64; DIM * DIM];
    let mut xty = [0.0f64; DIM];
    for row in rows {
        let f = row.features();
        let y = if row.converted { 1.0 } else { 0.0 };
        for i in 0..DIM {
            xty[i] += f[i] * y;
            for j in 0..DIM {
                xtx[i * DIM + j] += f[i] * f[j];
            }
        }
    }
    for i in 0..DIM {
        xtx[i * DIM + i] += RIDGE;
    }

    let beta = solve_linear(xtx, xty)?;

    // Project onto the non-negative orthant, then normalize to sum 1.
    let clipped: Vec<f64> = beta.iter().map(|b| b.max(0.0)).collect();
    let total: f64 = clipped.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    Some(ProxyWeights {
        scroll: clipped[0] / total,
        time: clipped[1] / total,
        clicks: clipped[2] / total,
        form: clipped[3] / total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(scroll: f64, time: f64, clicks: f64, form: f64, converted: bool) -> CalibrationRow {
        CalibrationRow {
            scroll_depth: scroll,
            time_on_page: time,
            click_count: clicks,
            form_engagement: form,
            converted,
        }
    }

    /// Deterministic pseudo-noise in [0, 1) without pulling in an RNG.
    fn jitter(i: usize) -> f64 {
        ((i as f64 * 0.754_877_666).fract() * 0.9).fract()
    }

    #[test]
    fn too_few_rows_returns_none() {
        let rows: Vec<_> = (0..9).map(|_| row(0.5, 0.5, 0.5, 0.0, true)).collect();
        assert!(calibrate_weights(&rows).is_none());
    }

    #[test]
    fn predictive_signal_gets_the_weight() {
        // Scroll depth separates converters from non-converters; the other
        // signals are noise.
        let mut rows = Vec::new();
        for i in 0..50 {
            rows.push(row(0.8 + 0.2 * jitter(i), jitter(i + 1), jitter(i + 2), 0.0, true));
        }
        for i in 0..50 {
            rows.push(row(0.2 * jitter(i), jitter(i + 3), jitter(i + 4), 0.0, false));
        }
        let w = calibrate_weights(&rows).unwrap();
        assert!(w.scroll > w.time, "w={w:?}");
        assert!(w.scroll > w.clicks, "w={w:?}");
    }

    #[test]
    fn weights_normalize_to_one() {
        let rows: Vec<_> = (0..100)
            .map(|i| {
                row(
                    jitter(i),
                    jitter(i + 7),
                    jitter(i + 13),
                    if i % 2 == 0 { 1.0 } else { 0.0 },
                    i % 3 == 0,
                )
            })
            .collect();
        let w = calibrate_weights(&rows).unwrap();
        assert!((w.total() - 1.0).abs() < 1e-9, "total={}", w.total());
        for v in [w.scroll, w.time, w.clicks, w.form] {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn calibration_is_idempotent() {
        let rows: Vec<_> = (0..60)
            .map(|i| row(jitter(i), jitter(i + 1), jitter(i + 2), 0.0, i % 4 == 0))
            .collect();
        let a = calibrate_weights(&rows).unwrap();
        let b = calibrate_weights(&rows).unwrap();
        assert!((a.scroll - b.scroll).abs() < 1e-9);
        assert!((a.time - b.time).abs() < 1e-9);
        assert!((a.clicks - b.clicks).abs() < 1e-9);
        assert!((a.form - b.form).abs() < 1e-9);
    }

    #[test]
    fn all_zero_features_return_none() {
        let rows: Vec<_> = (0..20).map(|_| row(0.0, 0.0, 0.0, 0.0, true)).collect();
        assert!(calibrate_weights(&rows).is_none());
    }

    #[test]
    fn solve_linear_identity() {
        let mut a = [0.0; 16];
        for i in 0..4 {
            a[i * 4 + i] = 2.0;
        }
        let x = solve_linear(a, [2.0, 4.0, 6.0, 8.0]).unwrap();
        assert_eq!(x, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn solve_linear_singular_returns_none() {
        // Two identical rows: rank-deficient.
        let a = [
            1.0, 2.0, 3.0, 4.0, //
            1.0, 2.0, 3.0, 4.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        assert!(solve_linear(a, [1.0, 1.0, 1.0, 1.0]).is_none());
    }
}
