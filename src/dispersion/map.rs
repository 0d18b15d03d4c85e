//! Maximum a posteriori dispersion estimates shrunk toward the trend

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use super::gene_wise::max_dispersion;
use super::posterior::{DispersionPosterior, LogNormalPrior};
use super::DispersionParams;
use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::{mad, trigamma};

/// Lower bound on the prior variance of log dispersions
const MIN_PRIOR_VAR: f64 = 0.25;

/// Prior variance of log dispersions and the variance of the log residuals
#[derive(Debug, Clone, Copy)]
pub struct PriorVariance {
    pub prior_var: f64,
    pub var_log_disp_ests: f64,
}

/// Prior variance from the spread of gene-wise estimates around the trend
///
/// The squared MAD of log residuals, less their expected sampling variance
/// trigamma((m - p) / 2), floored at 0.25.
pub fn estimate_prior_variance(
    gene_disps: &[f64],
    trended: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> PriorVariance {
    let residuals: Vec<f64> = gene_disps
        .iter()
        .zip(trended)
        .filter(|&(&g, &t)| g.is_finite() && t.is_finite() && t > 0.0 && g >= 100.0 * min_disp)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.is_empty() {
        log::warn!("all genes have dispersion estimates near the minimum; using the minimum prior variance");
        return PriorVariance {
            prior_var: MIN_PRIOR_VAR,
            var_log_disp_ests: MIN_PRIOR_VAR,
        };
    }

    let var_log_disp_ests = mad(&residuals).powi(2);
    if n_samples <= n_coefs {
        return PriorVariance {
            prior_var: MIN_PRIOR_VAR,
            var_log_disp_ests,
        };
    }
    let expected = trigamma((n_samples - n_coefs) as f64 / 2.0);
    PriorVariance {
        prior_var: (var_log_disp_ests - expected).max(MIN_PRIOR_VAR),
        var_log_disp_ests,
    }
}

/// Estimate MAP dispersions and flag dispersion outliers
///
/// Genes whose gene-wise estimate lies more than `outlier_sd` standard
/// deviations above the trend keep their gene-wise estimate.
pub fn estimate_map_dispersions(dds: &mut DeDataSet, params: &DispersionParams) -> Result<()> {
    let gene_disps = dds
        .gene_dispersions()
        .ok_or_else(|| AnalysisError::DispersionError {
            reason: "gene-wise dispersions are required".to_string(),
        })?
        .to_vec();
    let trended = dds
        .trended_dispersions()
        .ok_or_else(|| AnalysisError::DispersionError {
            reason: "trended dispersions are required".to_string(),
        })?
        .to_vec();
    let mu: Array2<f64> = dds
        .mu()
        .ok_or_else(|| AnalysisError::DispersionError {
            reason: "fitted means from the gene-wise step are required".to_string(),
        })?
        .clone();
    let design = dds.design_matrix()?.clone();
    let counts = dds.counts().counts().to_owned();
    let n_samples = dds.n_samples();

    let prior = estimate_prior_variance(&gene_disps, &trended, n_samples, design.ncols(), params.min_disp);
    log::info!(
        "dispersion prior variance {:.4} (variance of log residuals {:.4})",
        prior.prior_var,
        prior.var_log_disp_ests
    );

    let max_disp = max_dispersion(n_samples);
    let map: Vec<f64> = (0..gene_disps.len())
        .into_par_iter()
        .map(|i| {
            if gene_disps[i].is_nan() || !trended[i].is_finite() {
                return f64::NAN;
            }
            fit_map_dispersion(
                counts.row(i),
                mu.row(i),
                &design,
                gene_disps[i],
                trended[i],
                prior.prior_var,
                max_disp,
                params,
            )
        })
        .collect();

    let threshold = params.outlier_sd * prior.var_log_disp_ests.sqrt();
    let outliers: Vec<bool> = gene_disps
        .iter()
        .zip(&trended)
        .map(|(&g, &t)| g.is_finite() && g > 0.0 && t > 0.0 && g.ln() > t.ln() + threshold)
        .collect();
    let final_disps: Array1<f64> = map
        .iter()
        .zip(&gene_disps)
        .zip(&outliers)
        .map(|((&m, &g), &o)| if o { g } else { m })
        .collect();

    log::info!(
        "final dispersion estimates; {} dispersion outliers keep their gene-wise value",
        outliers.iter().filter(|o| **o).count()
    );
    dds.set_dispersions(final_disps, outliers, prior.prior_var)
}

/// MAP dispersion of one gene under a log-normal prior centered on the trend
#[allow(clippy::too_many_arguments)]
pub fn fit_map_dispersion<'a>(
    counts: ArrayView1<'a, f64>,
    mu: ArrayView1<'a, f64>,
    design: &'a Array2<f64>,
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    let prior = LogNormalPrior {
        mean: trend_disp.ln(),
        var: prior_var,
    };
    let posterior = DispersionPosterior::new(counts, mu, design, Some(prior));
    let init = if gene_disp > 0.1 * trend_disp { gene_disp } else { trend_disp };
    let min_log_alpha = (params.min_disp / 10.0).ln();
    let ls = posterior.line_search(init.ln(), min_log_alpha, params);

    let mut disp = ls.log_alpha.exp().clamp(params.min_disp, max_disp);
    let converged = ls.iterations < params.maxit && ls.iterations != 1;
    if !converged && disp > params.min_disp * 10.0 {
        disp = posterior.grid_search(params.min_disp.ln(), max_disp.ln()).exp();
    }
    disp.clamp(params.min_disp, max_disp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_prior_variance_floor_and_residuals() {
        let trended = vec![0.1; 6];
        let gene = vec![0.1, 0.1, 0.1, 0.1, 0.1, 1e-9];
        let pv = estimate_prior_variance(&gene, &trended, 10, 2, 1e-8);
        assert_eq!(pv.var_log_disp_ests, 0.0, "estimates below 100*minDisp are ignored");
        assert_eq!(pv.prior_var, MIN_PRIOR_VAR);
    }

    #[test]
    fn test_prior_variance_subtracts_sampling_variance() {
        let trended = vec![0.1; 9];
        let gene: Vec<f64> = (0..9).map(|i| 0.1 * ((i as f64 - 4.0) * 0.5).exp()).collect();
        let pv = estimate_prior_variance(&gene, &trended, 40, 2, 1e-8);
        let expected_var = 1.4826f64.powi(2);
        assert!((pv.var_log_disp_ests - expected_var).abs() < 1e-6, "mad^2 was {}", pv.var_log_disp_ests);
        assert!((pv.prior_var - (expected_var - trigamma(19.0))).abs() < 1e-6);
    }

    #[test]
    fn test_map_lies_between_gene_and_trend() {
        let counts = array![80.0, 120.0, 95.0, 140.0, 60.0, 105.0];
        let mu = Array1::from_elem(6, 100.0);
        let design = Array2::ones((6, 1));
        let params = DispersionParams::default();
        let gene = 0.07;
        let trend = 0.01;
        let map = fit_map_dispersion(counts.view(), mu.view(), &design, gene, trend, 0.5, 10.0, &params);
        assert!(map < gene && map > trend, "MAP {} should lie between {} and {}", map, trend, gene);
    }
}
