//! Independent filtering on the mean of normalized counts
//!
//! Genes with low baseMean carry little power. Removing them before the BH
//! adjustment raises the number of rejections; the cutoff is the first
//! quantile whose rejection count comes within one RMSE of the lowess fit's
//! maximum.

use crate::io::DeResults;
use crate::stats::{lowess, quantile_type7, sorted_finite};
use crate::testing::benjamini_hochberg;

/// Number of candidate quantiles
const FILTER_NUM: usize = 50;
/// Lowess span over the rejection curve
const LOWESS_SPAN: f64 = 0.2;

/// The rejection curve and the chosen cutoff
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub thetas: Vec<f64>,
    pub cutoffs: Vec<f64>,
    pub num_rejections: Vec<usize>,
    pub selected: usize,
}

impl FilterOutcome {
    pub fn threshold(&self) -> f64 {
        self.cutoffs[self.selected]
    }
}

/// Choose a baseMean cutoff that maximizes discoveries at `alpha`, then
/// write the filtered adjusted p-values and the threshold into `results`
pub fn independent_filtering(results: &mut DeResults, alpha: f64) -> Option<FilterOutcome> {
    let n = results.n_genes();
    let sorted = sorted_finite(&results.base_means);
    if n == 0 || sorted.is_empty() {
        return None;
    }

    let lower = results.base_means.iter().filter(|&&m| m == 0.0).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..FILTER_NUM)
        .map(|i| lower + (upper - lower) * i as f64 / (FILTER_NUM - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_type7(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = results
                .pvalues
                .iter()
                .zip(&results.base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let num_rejections: Vec<usize> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&q| q < alpha).count())
        .collect();

    let selected = select_theta(&thetas, &num_rejections);
    log::debug!(
        "independent filtering: theta {:.3}, baseMean cutoff {:.3}, {} rejections (max {})",
        thetas[selected],
        cutoffs[selected],
        num_rejections[selected],
        num_rejections.iter().max().copied().unwrap_or(0)
    );

    results.padj = adjusted[selected].clone();
    results.filter_threshold = Some(cutoffs[selected]);
    Some(FilterOutcome {
        thetas,
        cutoffs,
        num_rejections,
        selected,
    })
}

/// First theta whose rejections exceed the lowess maximum less the residual RMSE
fn select_theta(thetas: &[f64], num_rejections: &[usize]) -> usize {
    let max_rej = num_rejections.iter().max().copied().unwrap_or(0);
    if max_rej <= 10 {
        return 0;
    }
    let y: Vec<f64> = num_rejections.iter().map(|&r| r as f64).collect();
    let fit = lowess(thetas, &y, LOWESS_SPAN, 3);
    let residuals: Vec<f64> = y
        .iter()
        .zip(&fit)
        .filter(|(&r, _)| r > 0.0)
        .map(|(r, f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };
    let max_fit = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let thresh = max_fit - rmse;
    y.iter().position(|&r| r > thresh).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;

    #[test]
    fn test_few_rejections_disable_filtering() {
        let mut res = DeResults::new((0..20).map(|i| format!("g{}", i)).collect(), Contrast::Coefficient("x".into()), 0.1);
        res.base_means = (1..=20).map(|i| i as f64).collect();
        res.pvalues = (0..20).map(|i| if i < 3 { 1e-6 } else { 0.8 }).collect();
        let outcome = independent_filtering(&mut res, 0.1).unwrap();
        assert_eq!(outcome.selected, 0);
        assert_eq!(res.filter_threshold, Some(1.0));
        assert_eq!(res.padj, benjamini_hochberg(&res.pvalues));
    }

    #[test]
    fn test_low_mean_noise_is_filtered() {
        let n = 400;
        let mut res = DeResults::new((0..n).map(|i| format!("g{}", i)).collect(), Contrast::Coefficient("x".into()), 0.1);
        // low-mean genes carry no signal; the signal only survives BH once they are removed
        res.base_means = (0..n).map(|i| 1.0 + i as f64).collect();
        res.pvalues = (0..n)
            .map(|i| {
                if i < n / 2 {
                    0.3 + 0.7 * (i as f64 + 0.5) / (n / 2) as f64
                } else if i % 2 == 0 {
                    0.0004 * ((i - n / 2) / 2 + 1) as f64
                } else {
                    0.9
                }
            })
            .collect();
        let outcome = independent_filtering(&mut res, 0.1).unwrap();
        assert!(outcome.selected > 0, "filtering should drop the noise half");
        assert_eq!(outcome.num_rejections[0], 0, "with all 400 tests nothing passes");
        assert!(outcome.num_rejections[outcome.selected] > 10);
        let threshold = res.filter_threshold.unwrap();
        for i in 0..n {
            if res.base_means[i] < threshold {
                assert!(res.padj[i].is_nan());
            }
        }
    }

    #[test]
    fn test_theta_is_start_of_plateau_not_argmax() {
        let thetas: Vec<f64> = (0..50).map(|i| i as f64 / 50.0).collect();
        let rejections: Vec<usize> = (0..50)
            .map(|i| if i == 45 { 104 } else { (5 * i).min(100) + if i % 3 == 0 { 3 } else { 0 } })
            .collect();
        let selected = select_theta(&thetas, &rejections);
        assert!(selected < 30, "a late spike should not win, got index {}", selected);
        assert!(rejections[selected] >= 90, "selected {} rejections", rejections[selected]);
    }

    #[test]
    fn test_zero_means_raise_lower_quantile() {
        let mut res = DeResults::new((0..10).map(|i| format!("g{}", i)).collect(), Contrast::Coefficient("x".into()), 0.1);
        res.base_means = vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        res.pvalues = vec![f64::NAN, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 0.5, 0.5, 0.5, 0.5, 0.5];
        let outcome = independent_filtering(&mut res, 0.1).unwrap();
        assert!((outcome.thetas[0] - 0.5).abs() < 1e-12);
        assert!((outcome.thetas[FILTER_NUM - 1] - 0.95).abs() < 1e-12);
    }
}
