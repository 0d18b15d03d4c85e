//! Cook's distance outlier detection
//!
//! Cook's distance measures the influence of each count on its gene's fit:
//! `cooks = PearsonResSq / p * H / (1 - H)^2`, with the Pearson residual
//! taken under a robust method-of-moments dispersion so that one outlier
//! cannot inflate its own variance.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::io::DeResults;
use crate::stats::trimmed_mean;

/// Floor on the robust moments dispersion
const MIN_ROBUST_DISP: f64 = 0.04;
/// Replicates a design cell needs before its samples are checked for outliers
pub const MIN_REPLICATES_FOR_COOKS: usize = 3;

/// Compute Cook's distances from a fitted GLM and store them on the dataset
pub fn compute_cooks(dds: &mut DeDataSet) -> Result<()> {
    let cooks = calculate_cooks_distance(dds)?;
    dds.set_cooks(cooks)
}

/// Cook's distance for every gene and sample (genes x samples)
pub fn calculate_cooks_distance(dds: &DeDataSet) -> Result<Array2<f64>> {
    let mu = dds.mu().ok_or_else(|| AnalysisError::InvalidParameter {
        reason: "the GLM must be fitted before computing Cook's distances".to_string(),
    })?;
    let hat = dds.hat_diagonals().ok_or_else(|| AnalysisError::InvalidParameter {
        reason: "hat diagonals are missing; fit the GLM first".to_string(),
    })?;
    let design = dds.design_matrix()?;
    let p = design.ncols() as f64;
    let dispersions = robust_method_of_moments_disp(dds.normalized_counts()?, design);
    let counts = dds.counts().counts();
    let n_samples = dds.n_samples();

    let rows: Vec<Vec<f64>> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            (0..n_samples)
                .map(|j| {
                    let (y, m, h) = (counts[[i, j]], mu[[i, j]], hat[[i, j]]);
                    let v = m + alpha * m * m;
                    if v <= 0.0 || !h.is_finite() || h >= 1.0 {
                        return f64::NAN;
                    }
                    (y - m).powi(2) / v / p * h / (1.0 - h).powi(2)
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((dds.n_genes(), n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            cooks[[i, j]] = v;
        }
    }
    Ok(cooks)
}

/// Group samples into cells of identical design rows, in order of first appearance
pub fn design_cells(design: &Array2<f64>) -> Vec<usize> {
    let mut seen: HashMap<Vec<u64>, usize> = HashMap::new();
    design
        .axis_iter(Axis(0))
        .map(|row| {
            let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
            let next = seen.len();
            *seen.entry(key).or_insert(next)
        })
        .collect()
}

/// Samples whose design cell holds at least `n` replicates
pub fn n_or_more_in_cell(design: &Array2<f64>, n: usize) -> Vec<bool> {
    let cells = design_cells(design);
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for &c in &cells {
        *sizes.entry(c).or_default() += 1;
    }
    cells.iter().map(|c| sizes[c] >= n).collect()
}

/// Robust method-of-moments dispersion: `(v - m) / m^2` floored at 0.04
///
/// `v` is the largest trimmed within-cell variance over cells with three or
/// more replicates, or a trimmed variance over all samples when no such cell
/// exists. `m` is the mean of the normalized counts.
pub fn robust_method_of_moments_disp(normalized: &Array2<f64>, design: &Array2<f64>) -> Vec<f64> {
    let cells = design_cells(design);
    let replicated = n_or_more_in_cell(design, MIN_REPLICATES_FOR_COOKS);

    let mut groups: Vec<Vec<usize>> = Vec::new();
    if replicated.iter().any(|r| *r) {
        let mut by_cell: HashMap<usize, usize> = HashMap::new();
        for (j, &c) in cells.iter().enumerate() {
            if !replicated[j] {
                continue;
            }
            let slot = *by_cell.entry(c).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(j);
        }
    }

    normalized
        .axis_iter(Axis(0))
        .map(|row| {
            let values = row.to_vec();
            let v = if groups.is_empty() {
                trimmed_variance(&values, 1.0 / 8.0, 1.51)
            } else {
                groups
                    .iter()
                    .map(|g| {
                        let cell: Vec<f64> = g.iter().map(|&j| values[j]).collect();
                        let (trim, scale) = trim_for_cell_size(cell.len());
                        trimmed_variance(&cell, trim, scale)
                    })
                    .fold(f64::NEG_INFINITY, f64::max)
            };
            let m = values.iter().sum::<f64>() / values.len() as f64;
            if m > 0.0 {
                ((v - m) / (m * m)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect()
}

/// Trim ratio and scaling constant by cell size
fn trim_for_cell_size(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

/// Scaled trimmed mean of squared deviations from the trimmed mean
fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim);
    let sq: Vec<f64> = values.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// Default outlier cutoff: the 0.99 quantile of F(p, m - p)
pub fn default_cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    match FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64) {
        Ok(f) => f.inverse_cdf(0.99),
        Err(_) => f64::INFINITY,
    }
}

/// Largest Cook's distance per gene among samples in replicated cells
///
/// NaN for every gene when there are no residual degrees of freedom or no
/// sample sits in a cell with three or more replicates.
pub fn max_cooks(cooks: &Array2<f64>, design: &Array2<f64>) -> Vec<(f64, usize)> {
    let (m, p) = design.dim();
    let eligible = n_or_more_in_cell(design, MIN_REPLICATES_FOR_COOKS);
    if m <= p || !eligible.iter().any(|e| *e) {
        return vec![(f64::NAN, 0); cooks.nrows()];
    }
    cooks
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = (f64::NEG_INFINITY, 0);
            for (j, &c) in row.iter().enumerate() {
                if eligible[j] && c.is_finite() && c > best.0 {
                    best = (c, j);
                }
            }
            if best.0.is_finite() {
                best
            } else {
                (f64::NAN, 0)
            }
        })
        .collect()
}

/// Set p-values of Cook's outlier genes to NA
///
/// With a single two-level factor an outlier is ignored when three or more
/// samples have a larger count than the outlying one. Returns the number of
/// genes flagged.
pub fn filter_by_cooks(
    results: &mut DeResults,
    cooks: &Array2<f64>,
    design: &Array2<f64>,
    counts: ArrayView2<f64>,
    cutoff: f64,
    two_level: bool,
) -> usize {
    let maxima = max_cooks(cooks, design);
    let mut flagged = 0;
    for (i, &(value, sample)) in maxima.iter().enumerate() {
        if value.is_nan() || value <= cutoff {
            continue;
        }
        if two_level {
            let outlier_count = counts[[i, sample]];
            let higher = counts.row(i).iter().filter(|&&c| c > outlier_count).count();
            if higher >= 3 {
                continue;
            }
        }
        results.pvalues[i] = f64::NAN;
        results.padj[i] = f64::NAN;
        flagged += 1;
    }
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;
    use ndarray::array;

    fn two_group_design(per_group: usize) -> Array2<f64> {
        let mut d = Array2::ones((2 * per_group, 2));
        for j in 0..per_group {
            d[[j, 1]] = 0.0;
        }
        d
    }

    #[test]
    fn test_cells_follow_design_rows() {
        let design = array![[1.0, 0.0], [1.0, 1.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        assert_eq!(design_cells(&design), vec![0, 1, 0, 1, 1]);
        assert_eq!(n_or_more_in_cell(&design, 3), vec![false, true, false, true, true]);
    }

    #[test]
    fn test_cutoff_is_f_quantile() {
        // qf(0.99, 2, 4) = 18.0
        let c = default_cooks_cutoff(6, 2);
        assert!((c - 18.0).abs() < 1e-4, "cutoff was {}", c);
        assert!(default_cooks_cutoff(2, 2).is_infinite());
    }

    #[test]
    fn test_robust_disp_floor() {
        let design = two_group_design(3);
        let normalized = array![[100.0, 100.0, 100.0, 200.0, 200.0, 200.0], [0.0; 6]];
        let d = robust_method_of_moments_disp(&normalized, &design);
        assert_eq!(d, vec![MIN_ROBUST_DISP, MIN_ROBUST_DISP]);
    }

    #[test]
    fn test_robust_disp_ignores_single_outlier() {
        let design = two_group_design(4);
        let clean = [100.0, 110.0, 90.0, 105.0, 100.0, 95.0, 108.0, 92.0];
        let mut spiked = clean;
        spiked[7] = 5000.0;
        let normalized = Array2::from_shape_vec((2, 8), clean.iter().chain(spiked.iter()).copied().collect()).unwrap();
        let d = robust_method_of_moments_disp(&normalized, &design);
        let plain_var = crate::stats::variance(&spiked);
        let plain_mean = spiked.iter().sum::<f64>() / 8.0;
        let naive = (plain_var - plain_mean) / plain_mean.powi(2);
        assert!(d[1] < naive / 2.0, "robust {} vs naive {}", d[1], naive);
    }

    #[test]
    fn test_two_level_heuristic_keeps_low_outliers() {
        let design = two_group_design(3);
        let counts = array![
            [0.0, 50.0, 55.0, 52.0, 49.0, 51.0],
            [1000.0, 50.0, 55.0, 52.0, 49.0, 51.0]
        ];
        let mut cooks = Array2::zeros((2, 6));
        cooks[[0, 0]] = 50.0;
        cooks[[1, 0]] = 50.0;
        let mut res = DeResults::new(vec!["low".into(), "high".into()], Contrast::Coefficient("x".into()), 0.1);
        res.pvalues = vec![0.01, 0.01];
        let flagged = filter_by_cooks(&mut res, &cooks, &design, counts.view(), 18.0, true);
        assert_eq!(flagged, 1);
        assert_eq!(res.pvalues[0], 0.01, "a low outlier with 5 larger counts is kept");
        assert!(res.pvalues[1].is_nan());

        let mut res = DeResults::new(vec!["low".into(), "high".into()], Contrast::Coefficient("x".into()), 0.1);
        res.pvalues = vec![0.01, 0.01];
        assert_eq!(filter_by_cooks(&mut res, &cooks, &design, counts.view(), 18.0, false), 2);
    }

    #[test]
    fn test_max_cooks_requires_replicated_cells() {
        let design = two_group_design(2);
        let cooks = Array2::from_elem((1, 4), 100.0);
        assert!(max_cooks(&cooks, &design)[0].0.is_nan());
    }
}
