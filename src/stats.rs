//! Statistical utility functions shared across modules
//!
//! Quantiles, robust scale estimates, correlation and the lowess smoother
//! used by independent filtering.

use std::cmp::Ordering;

/// qnorm(0.975), the 97.5th percentile of the standard normal
pub const QNORM_0975: f64 = 1.959963984540054;

/// Consistency constant that makes the MAD estimate sigma for normal data
pub const MAD_CONSTANT: f64 = 1.4826;

fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Sort a copy of the finite values
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(cmp_f64);
    v
}

/// Median of the finite values (NaN for an empty input)
pub fn median(values: &[f64]) -> f64 {
    let v = sorted_finite(values);
    median_sorted(&v)
}

fn median_sorted(v: &[f64]) -> f64 {
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

/// Median absolute deviation scaled by 1.4826, as R's `mad()`
pub fn mad(values: &[f64]) -> f64 {
    let m = median(values);
    if m.is_nan() {
        return f64::NAN;
    }
    let deviations: Vec<f64> = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| (x - m).abs())
        .collect();
    median(&deviations) * MAD_CONSTANT
}

/// R's default quantile (type 7) on already sorted data
pub fn quantile_type7(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        1 => sorted[0],
        _ => {
            let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = (h.ceil() as usize).min(n - 1);
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Mean after removing `trim` of the observations from each end (R `mean(x, trim)`)
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let v = sorted_finite(values);
    let n = v.len();
    if n == 0 {
        return f64::NAN;
    }
    if trim >= 0.5 {
        return median_sorted(&v);
    }
    let k = (n as f64 * trim).floor() as usize;
    let kept = &v[k..n - k];
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample variance with n - 1 denominator
pub fn variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)
}

/// Trigamma function, the derivative of digamma
///
/// Uses the reflection formula below 0.5, recurrence up to 8 and the
/// asymptotic series beyond.
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }
    let mut acc = 0.0;
    let mut z = x;
    while z < 8.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }
    let z2 = z * z;
    acc + 1.0 / z + 0.5 / z2 + 1.0 / (6.0 * z2 * z) - 1.0 / (30.0 * z2 * z2 * z)
        + 1.0 / (42.0 * z2 * z2 * z2 * z)
}

/// Weighted quantile matching Hmisc `wtd.quantile(type = "quantile", normwt = TRUE)`
///
/// Weights are normalized to sum to the number of observations, duplicate
/// values are pooled, and the quantile is read off the cumulative weights
/// with a right-continuous step function.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(xi, wi)| **wi > 0.0 && xi.is_finite() && wi.is_finite())
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| cmp_f64(&a.0, &b.0));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();

    let mut values: Vec<f64> = Vec::new();
    let mut cumulative: Vec<f64> = Vec::new();
    let mut total = 0.0;
    for (xi, wi) in pairs {
        total += wi * scale;
        if values.last() == Some(&xi) {
            if let Some(last) = cumulative.last_mut() {
                *last = total;
            }
        } else {
            values.push(xi);
            cumulative.push(total);
        }
    }

    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    (1.0 - frac) * step_right(&cumulative, &values, low)
        + frac * step_right(&cumulative, &values, high)
}

/// `approx(method = "constant", f = 1, rule = 2)` on a step function
fn step_right(knots: &[f64], values: &[f64], at: f64) -> f64 {
    let idx = knots.partition_point(|&k| k < at);
    values[idx.min(values.len() - 1)]
}

/// Variance of a zero-centered normal whose weighted upper quantile of |x|
/// matches the observed one
///
/// Used to set the normal prior on log fold changes.
pub fn match_weighted_upper_quantile_for_variance(x: &[f64], weights: &[f64], upper_quantile: f64) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    log::debug!("weighted upper quantile {:.6}, prior sd {:.6}", q, sd);

    let var = sd * sd;
    if var > 0.0 && var.is_finite() {
        var
    } else {
        1e-6
    }
}

/// Pearson correlation over pairs where both values are finite
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    let n = pairs.len() as f64;
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Ranks with ties sharing their average rank (1-based)
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| cmp_f64(&values[a], &values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation over pairs where both values are finite
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let (fx, fy): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip();
    pearson(&average_ranks(&fx), &average_ranks(&fy))
}

/// Locally weighted scatterplot smoothing (Cleveland 1979) as R's `lowess()`
///
/// `x` must be sorted. Each point gets a tricube-weighted local linear fit
/// over its `f * n` nearest neighbours, followed by `iterations` rounds of
/// bisquare robustness reweighting.
pub fn lowess(x: &[f64], y: &[f64], f: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let span = ((f * n as f64 + 1e-7) as usize).clamp(2, n);
    let range = x[n - 1] - x[0];
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iter in 0..=iterations {
        let mut left = 0;
        for i in 0..n {
            while left + span < n && x[i] - x[left] > x[left + span] - x[i] {
                left += 1;
            }
            let right = left + span - 1;
            let h = (x[i] - x[left]).max(x[right] - x[i]);
            fitted[i] = local_linear(x, y, i, h, range, &robustness).unwrap_or(y[i]);
        }
        if iter == iterations {
            break;
        }

        let residuals: Vec<f64> = (0..n).map(|i| (y[i] - fitted[i]).abs()).collect();
        let cmad = 6.0 * median(&residuals);
        if cmad < 1e-7 * residuals.iter().sum::<f64>() / n as f64 || cmad == 0.0 {
            break;
        }
        for i in 0..n {
            let u = residuals[i] / cmad;
            robustness[i] = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

fn local_linear(x: &[f64], y: &[f64], i: usize, h: f64, range: f64, robustness: &[f64]) -> Option<f64> {
    let xs = x[i];
    let mut weights = vec![0.0; x.len()];
    let mut total = 0.0;
    for (j, w) in weights.iter_mut().enumerate() {
        let r = (x[j] - xs).abs();
        if r <= 0.999 * h {
            let base = if r <= 0.001 * h {
                1.0
            } else {
                let u = r / h;
                (1.0 - u * u * u).powi(3)
            };
            *w = base * robustness[j];
            total += *w;
        }
    }
    if total <= 0.0 {
        return None;
    }
    weights.iter_mut().for_each(|w| *w /= total);

    let xbar: f64 = weights.iter().zip(x).map(|(w, xj)| w * xj).sum();
    let spread: f64 = weights.iter().zip(x).map(|(w, xj)| w * (xj - xbar).powi(2)).sum();
    if h > 0.0 && spread.sqrt() > 0.001 * range {
        let slope = (xs - xbar) / spread;
        for (w, xj) in weights.iter_mut().zip(x) {
            *w *= slope * (xj - xbar) + 1.0;
        }
    }
    Some(weights.iter().zip(y).map(|(w, yj)| w * yj).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_quantile_uniform_weights() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let w = vec![1.0; 5];
        let q50 = weighted_quantile(&x, &w, 0.5);
        assert!((q50 - 3.0).abs() < 1e-10, "median of 1..5 should be 3.0, got {}", q50);
    }

    #[test]
    fn test_weighted_quantile_follows_heavy_weight() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let w = vec![1.0, 1.0, 1.0, 1.0, 100.0];
        let q50 = weighted_quantile(&x, &w, 0.5);
        assert!(q50 >= 4.0, "weighted median should be pulled to 5.0, got {}", q50);
    }

    #[test]
    fn test_weighted_quantile_pools_duplicates() {
        let x = vec![2.0, 2.0, 2.0, 10.0];
        let w = vec![1.0; 4];
        assert_eq!(weighted_quantile(&x, &w, 0.5), 2.0);
    }

    #[test]
    fn test_prior_variance_positive() {
        let x = vec![0.1, -0.2, 0.3, -0.1, 0.5, -0.3, 0.2, -0.4, 0.15, -0.25];
        let w = vec![1.0; 10];
        let var = match_weighted_upper_quantile_for_variance(&x, &w, 0.05);
        assert!(var > 0.0 && var.is_finite(), "variance should be positive, got {}", var);
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        // |x - 3| = 2,1,0,1,2 -> median 1
        let m = mad(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((m - MAD_CONSTANT).abs() < 1e-12, "mad should be 1.4826, got {}", m);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_quantile_type7_interpolates() {
        let v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_type7(&v, 0.0), 1.0);
        assert_eq!(quantile_type7(&v, 1.0), 4.0);
        assert!((quantile_type7(&v, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean_drops_tails() {
        let v = vec![1.0, 2.0, 3.0, 4.0, 100.0];
        assert!((trimmed_mean(&v, 0.2) - 3.0).abs() < 1e-12);
        assert!((trimmed_mean(&v, 0.0) - 22.0).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-8, "trigamma(1) = {}", trigamma(1.0));
        // trigamma(0.5) = pi^2 / 2
        let expected_half = std::f64::consts::PI.powi(2) / 2.0;
        assert!((trigamma(0.5) - expected_half).abs() < 1e-8);
    }

    #[test]
    fn test_correlations() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-12);
        let z = vec![1.0, 4.0, 9.0, 16.0, 100.0];
        assert!((spearman(&x, &z) - 1.0).abs() < 1e-12, "monotone data has rho 1");
        let with_nan = vec![1.0, f64::NAN, 3.0, 4.0, 5.0];
        assert!((pearson(&with_nan, &y) - 1.0).abs() < 1e-12, "NaN pairs are skipped");
    }

    #[test]
    fn test_average_ranks_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_lowess_reproduces_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let fit = lowess(&x, &y, 0.5, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-8, "lowess should reproduce a straight line: {} vs {}", f, t);
        }
    }
}
