//! P-values from Wald statistics

use statrs::distribution::{ContinuousCDF, Normal};

fn upper_tail(z: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(-z),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value of a standard normal statistic, NaN when the statistic is not finite
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    2.0 * upper_tail(z.abs())
}

/// P-value for H0: |LFC| <= threshold against the "greaterAbs" alternative
///
/// Sum of both tails beyond the shifted threshold, capped at 1.
pub fn threshold_pvalue(lfc: f64, se: f64, threshold: f64) -> f64 {
    if !lfc.is_finite() || !se.is_finite() || se <= 0.0 {
        return f64::NAN;
    }
    let upper = upper_tail((lfc.abs() - threshold) / se);
    let lower = upper_tail((lfc.abs() + threshold) / se);
    (upper + lower).min(1.0)
}

/// sign(lfc) * max(0, (|lfc| - threshold) / se)
pub fn threshold_stat(lfc: f64, se: f64, threshold: f64) -> f64 {
    if !lfc.is_finite() || !se.is_finite() || se <= 0.0 {
        return f64::NAN;
    }
    lfc.signum() * ((lfc.abs() - threshold) / se).max(0.0)
}
