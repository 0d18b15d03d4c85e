//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use std::f64::consts::LN_2;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use super::negative_binomial::{nb_log_likelihood, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};
use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::linalg::{invert_spd, solve_spd, weighted_crossprod};

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub beta_tol: f64,
    /// Floor on fitted means
    pub min_mu: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
            min_mu: MIN_MU,
        }
    }
}

/// Ridge penalty applied to every coefficient of an unpenalized fit
pub fn default_lambda(n_coefs: usize) -> Vec<f64> {
    vec![1e-6 / (LN_2 * LN_2); n_coefs]
}

/// Fit of a single gene; coefficients on the natural log scale
#[derive(Debug, Clone)]
pub struct GlmFit {
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    pub covariance: Array2<f64>,
    pub hat_diagonals: Vec<f64>,
    pub mu: Vec<f64>,
    pub deviance: f64,
    pub converged: bool,
    pub iterations: usize,
}

impl GlmFit {
    fn all_zero(n_samples: usize, n_coefs: usize) -> Self {
        Self {
            coefficients: vec![f64::NAN; n_coefs],
            standard_errors: vec![f64::NAN; n_coefs],
            covariance: Array2::from_elem((n_coefs, n_coefs), f64::NAN),
            hat_diagonals: vec![0.0; n_samples],
            mu: vec![0.0; n_samples],
            deviance: 0.0,
            converged: true,
            iterations: 0,
        }
    }
}

/// Fits of many genes, gene-major
#[derive(Debug, Clone)]
pub struct GlmFits {
    pub coefficients: Array2<f64>,
    pub standard_errors: Array2<f64>,
    pub covariances: Array3<f64>,
    pub hat_diagonals: Array2<f64>,
    pub mu: Array2<f64>,
    pub converged: Vec<bool>,
    pub deviance: Array1<f64>,
}

/// Fit the NB GLM for every gene of the dataset and store the result
///
/// Requires normalization (size or normalization factors), final dispersions
/// and a design.
pub fn fit_glm(dds: &mut DeDataSet, params: &GlmFitParams) -> Result<()> {
    let design = dds.design_matrix()?.clone();
    let nf = dds.normalization_matrix()?;
    let dispersions = dds
        .dispersions()
        .ok_or_else(|| AnalysisError::DispersionError {
            reason: "dispersions must be estimated before fitting the GLM".to_string(),
        })?
        .to_vec();

    let lambda = default_lambda(design.ncols());
    let fits = fit_glm_matrix(dds.counts().counts(), &nf, &design, &dispersions, &lambda, params)?;

    let not_converged = fits.converged.iter().filter(|c| !**c).count();
    if not_converged > 0 {
        log::warn!("{} rows did not converge in beta, labelled as not converged", not_converged);
    }
    log::info!("fitted NB GLM for {} genes with {} coefficients", dds.n_genes(), design.ncols());

    dds.set_glm_fit(
        fits.coefficients,
        fits.standard_errors,
        fits.covariances,
        fits.hat_diagonals,
        fits.mu,
        fits.converged,
        fits.deviance,
    )
}

/// Fit every row of `counts` in parallel with per-gene dispersion and a shared ridge penalty
pub fn fit_glm_matrix(
    counts: ArrayView2<f64>,
    norm_factors: &Array2<f64>,
    design: &Array2<f64>,
    dispersions: &[f64],
    lambda: &[f64],
    params: &GlmFitParams,
) -> Result<GlmFits> {
    let (n_genes, n_samples) = counts.dim();
    let n_coefs = design.ncols();
    if design.nrows() != n_samples || norm_factors.dim() != counts.dim() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("design with {} rows and {} x {} factors", n_samples, n_genes, n_samples),
            actual: format!(
                "design with {} rows and {} x {} factors",
                design.nrows(),
                norm_factors.nrows(),
                norm_factors.ncols()
            ),
        });
    }
    if dispersions.len() != n_genes || lambda.len() != n_coefs {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} dispersions and {} penalties", n_genes, n_coefs),
            actual: format!("{} dispersions and {} penalties", dispersions.len(), lambda.len()),
        });
    }

    let results: Vec<GlmFit> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let y = counts.row(i);
            if y.iter().all(|&c| c == 0.0) || !dispersions[i].is_finite() {
                GlmFit::all_zero(n_samples, n_coefs)
            } else {
                fit_single_gene(y, design, norm_factors.row(i), dispersions[i], lambda, params)
            }
        })
        .collect();

    let mut fits = GlmFits {
        coefficients: Array2::zeros((n_genes, n_coefs)),
        standard_errors: Array2::zeros((n_genes, n_coefs)),
        covariances: Array3::zeros((n_genes, n_coefs, n_coefs)),
        hat_diagonals: Array2::zeros((n_genes, n_samples)),
        mu: Array2::zeros((n_genes, n_samples)),
        converged: Vec::with_capacity(n_genes),
        deviance: Array1::zeros(n_genes),
    };
    for (i, r) in results.into_iter().enumerate() {
        fits.coefficients.row_mut(i).assign(&Array1::from_vec(r.coefficients));
        fits.standard_errors.row_mut(i).assign(&Array1::from_vec(r.standard_errors));
        fits.covariances.index_axis_mut(Axis(0), i).assign(&r.covariance);
        fits.hat_diagonals.row_mut(i).assign(&Array1::from_vec(r.hat_diagonals));
        fits.mu.row_mut(i).assign(&Array1::from_vec(r.mu));
        fits.converged.push(r.converged);
        fits.deviance[i] = r.deviance;
    }
    Ok(fits)
}

fn linear_predictor(design: &Array2<f64>, beta: &[f64], i: usize) -> f64 {
    design.row(i).iter().zip(beta).map(|(x, b)| x * b).sum()
}

fn deviance(counts: ArrayView1<f64>, mu: &[f64], alpha: f64) -> f64 {
    counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| -2.0 * nb_log_likelihood(y, m, alpha))
        .sum()
}

/// Fit one gene by IRLS with log normalization factors as offsets
pub fn fit_single_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    norm_factors: ArrayView1<f64>,
    alpha: f64,
    lambda: &[f64],
    params: &GlmFitParams,
) -> GlmFit {
    let n_samples = counts.len();
    let n_coefs = design.ncols();

    // start from least squares on log normalized counts
    let log_counts: Vec<f64> = counts
        .iter()
        .zip(norm_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let xtx = weighted_crossprod(design, &vec![1.0; n_samples]);
    let xty: Vec<f64> = (0..n_coefs)
        .map(|j| design.column(j).iter().zip(&log_counts).map(|(x, y)| x * y).sum())
        .collect();
    let mut beta: Vec<f64> = match solve_spd(&xtx, &xty) {
        Some(b) if b.iter().all(|v| v.is_finite()) => b.to_vec(),
        _ => {
            let mean_log = log_counts.iter().sum::<f64>() / n_samples as f64;
            let mut b = vec![0.0; n_coefs];
            b[0] = mean_log;
            b
        }
    };

    let mut penalty = Array2::zeros((n_coefs, n_coefs));
    for (j, &l) in lambda.iter().enumerate() {
        penalty[[j, j]] = l;
    }

    let mut mu: Vec<f64> = (0..n_samples)
        .map(|i| nb_mean(linear_predictor(design, &beta, i), norm_factors[i]).max(params.min_mu))
        .collect();
    let mut dev_old = 0.0f64;
    let mut dev = deviance(counts, &mu, alpha);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..params.maxit {
        iterations = iter + 1;
        let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z: Vec<f64> = (0..n_samples)
            .map(|i| (mu[i] / norm_factors[i]).ln() + (counts[i] - mu[i]) / mu[i])
            .collect();

        let a = weighted_crossprod(design, &weights) + &penalty;
        let wz: Vec<f64> = weights.iter().zip(&z).map(|(w, z)| w * z).collect();
        let b: Vec<f64> = (0..n_coefs)
            .map(|j| design.column(j).iter().zip(&wz).map(|(x, v)| x * v).sum())
            .collect();
        let new_beta = match solve_spd(&a, &b) {
            Some(nb) => nb.to_vec(),
            None => break,
        };
        beta = new_beta;
        if beta.iter().any(|b| b.abs() > MAX_LFC_BETA || !b.is_finite()) {
            break;
        }

        for (i, m) in mu.iter_mut().enumerate() {
            *m = nb_mean(linear_predictor(design, &beta, i), norm_factors[i]).max(params.min_mu);
        }
        dev = deviance(counts, &mu, alpha);
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let (covariance, hat_diagonals) = sandwich_and_hat(design, &weights, &penalty);
    let standard_errors = covariance
        .diag()
        .iter()
        .map(|&v| if v > 0.0 { v.sqrt() } else { f64::NAN })
        .collect();

    GlmFit {
        coefficients: beta,
        standard_errors,
        covariance,
        hat_diagonals,
        mu,
        deviance: dev,
        converged,
        iterations,
    }
}

/// Sandwich covariance (X'WX + L)^-1 X'WX (X'WX + L)^-1 and hat diagonals
fn sandwich_and_hat(design: &Array2<f64>, weights: &[f64], penalty: &Array2<f64>) -> (Array2<f64>, Vec<f64>) {
    let n_coefs = design.ncols();
    let xtwx = weighted_crossprod(design, weights);
    let ridge = &xtwx + penalty;
    let inv = match invert_spd(&ridge) {
        Some(inv) => inv,
        None => {
            return (
                Array2::from_elem((n_coefs, n_coefs), f64::NAN),
                vec![f64::NAN; design.nrows()],
            )
        }
    };
    let sigma = inv.dot(&xtwx).dot(&inv);
    let hat = design
        .rows()
        .into_iter()
        .zip(weights)
        .map(|(x, &w)| w * x.dot(&inv.dot(&x)))
        .collect();
    (sigma, hat)
}

/// Number of distinct rows of the design matrix
pub fn unique_design_rows(design: &Array2<f64>) -> usize {
    let mut seen: Vec<Vec<u64>> = Vec::new();
    for row in design.rows() {
        let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    seen.len()
}

/// Fitted means from least squares on normalized counts, for group designs
///
/// Used when each coefficient corresponds to a group of identical design
/// rows; the projection then reduces to group means.
pub fn linear_model_mu(normalized: ArrayView2<f64>, norm_factors: &Array2<f64>, design: &Array2<f64>) -> Result<Array2<f64>> {
    let n_samples = design.nrows();
    let xtx = weighted_crossprod(design, &vec![1.0; n_samples]);
    let inv = invert_spd(&xtx).ok_or_else(|| AnalysisError::InvalidDesign {
        reason: "model matrix is not full rank".to_string(),
    })?;
    let hat = design.dot(&inv).dot(&design.t());
    let fitted = normalized.dot(&hat.t());
    Ok(fitted * norm_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_group_design() -> Array2<f64> {
        array![
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [1.0, 1.0],
            [1.0, 1.0]
        ]
    }

    #[test]
    fn test_two_group_fit_recovers_fold_change() {
        let design = two_group_design();
        let counts = array![100.0, 110.0, 90.0, 400.0, 420.0, 380.0];
        let nf = Array1::ones(6);
        let fit = fit_single_gene(counts.view(), &design, nf.view(), 0.01, &default_lambda(2), &GlmFitParams::default());

        assert!(fit.converged, "simple two-group fit should converge");
        assert!((fit.coefficients[0] - 100.0f64.ln()).abs() < 0.01);
        assert!((fit.coefficients[1] - 4.0f64.ln()).abs() < 0.01, "LFC was {}", fit.coefficients[1]);
        assert!(fit.standard_errors.iter().all(|s| s.is_finite() && *s > 0.0));
        let hat_sum: f64 = fit.hat_diagonals.iter().sum();
        assert!((hat_sum - 2.0).abs() < 1e-3, "trace of the hat matrix is p, got {}", hat_sum);
    }

    #[test]
    fn test_offsets_absorb_depth() {
        let design = two_group_design();
        let counts = array![100.0, 200.0, 100.0, 100.0, 200.0, 100.0];
        let nf = array![1.0, 2.0, 1.0, 1.0, 2.0, 1.0];
        let fit = fit_single_gene(counts.view(), &design, nf.view(), 0.01, &default_lambda(2), &GlmFitParams::default());
        assert!(fit.coefficients[1].abs() < 1e-3);
        assert!((fit.mu[1] - 200.0).abs() < 0.5);
    }

    #[test]
    fn test_large_penalty_shrinks_coefficient() {
        let design = two_group_design();
        let counts = array![100.0, 110.0, 90.0, 400.0, 420.0, 380.0];
        let nf = Array1::ones(6);
        let params = GlmFitParams::default();
        let free = fit_single_gene(counts.view(), &design, nf.view(), 0.05, &default_lambda(2), &params);
        let lambda = vec![1e-6, 50.0];
        let shrunk = fit_single_gene(counts.view(), &design, nf.view(), 0.05, &lambda, &params);
        assert!(shrunk.coefficients[1].abs() < free.coefficients[1].abs());
        assert!(shrunk.coefficients[1] > 0.0);
    }

    #[test]
    fn test_matrix_fit_marks_all_zero_rows() {
        let design = two_group_design();
        let counts = array![
            [100.0, 110.0, 90.0, 400.0, 420.0, 380.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        ];
        let nf = Array2::ones((2, 6));
        let fits = fit_glm_matrix(counts.view(), &nf, &design, &[0.01, f64::NAN], &default_lambda(2), &GlmFitParams::default()).unwrap();
        assert!(fits.coefficients[[0, 1]] > 1.0);
        assert!(fits.coefficients[[1, 1]].is_nan());
        assert_eq!(fits.mu[[1, 0]], 0.0);
    }

    #[test]
    fn test_linear_model_mu_is_group_mean() {
        let design = two_group_design();
        let norm = array![[1.0, 2.0, 3.0, 10.0, 20.0, 30.0]];
        let nf = Array2::from_elem((1, 6), 2.0);
        let mu = linear_model_mu(norm.view(), &nf, &design).unwrap();
        assert!((mu[[0, 0]] - 4.0).abs() < 1e-9);
        assert!((mu[[0, 5]] - 40.0).abs() < 1e-9);
        assert_eq!(unique_design_rows(&design), 2);
    }
}
