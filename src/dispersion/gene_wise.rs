//! Gene-wise dispersion estimation using Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

use super::posterior::DispersionPosterior;
use super::DispersionParams;
use crate::data::DeDataSet;
use crate::error::Result;
use crate::glm::{fit_glm_matrix, linear_model_mu, unique_design_rows, GlmFitParams};

/// Upper bound on dispersion estimates for a dataset of `n_samples`
pub fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Estimate gene-wise dispersions and store them together with the fitted means
///
/// Means come from a least squares fit on normalized counts when every
/// coefficient belongs to a group of identical design rows, and from the
/// NB GLM otherwise.
pub fn estimate_gene_dispersions(dds: &mut DeDataSet, params: &DispersionParams) -> Result<()> {
    let design = dds.design_matrix()?.clone();
    let nf = dds.normalization_matrix()?;
    let normalized = dds.normalized_counts()?.clone();
    let counts = dds.counts().counts().to_owned();
    let xim = dds.xim()?;
    let (n_genes, n_samples) = counts.dim();
    let max_disp = max_dispersion(n_samples);
    let all_zero = dds.all_zero();

    let rough = rough_disp_estimate(&normalized, &design)?;
    let alpha_init: Vec<f64> = normalized
        .axis_iter(Axis(0))
        .zip(rough.iter())
        .map(|(row, &r)| moments_disp_estimate(row, xim).min(r).clamp(params.min_disp, max_disp))
        .collect();

    let use_linear_mu = unique_design_rows(&design) == design.ncols();
    let mut mu = if use_linear_mu {
        log::debug!("using group means for the gene-wise dispersion fit");
        linear_model_mu(normalized.view(), &nf, &design)?
    } else {
        let lambda = crate::glm::default_lambda(design.ncols());
        let glm_params = GlmFitParams::default();
        fit_glm_matrix(counts.view(), &nf, &design, &alpha_init, &lambda, &glm_params)?.mu
    };
    mu.mapv_inplace(|m| m.max(params.min_mu));

    let estimates: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            if all_zero[i] {
                f64::NAN
            } else {
                fit_gene_dispersion(counts.row(i), mu.row(i), &design, alpha_init[i], max_disp, params)
            }
        })
        .collect();

    let n_refit = estimates.iter().filter(|d| d.is_finite() && **d >= max_disp).count();
    if n_refit > 0 {
        log::debug!("{} gene-wise estimates at the upper bound {}", n_refit, max_disp);
    }
    log::info!("gene-wise dispersion estimates for {} genes", n_genes - all_zero.iter().filter(|z| **z).count());

    for (i, z) in all_zero.iter().enumerate() {
        if *z {
            mu.row_mut(i).fill(0.0);
        }
    }
    dds.set_gene_dispersions(Array1::from_vec(estimates))?;
    dds.set_mu(mu)
}

/// Line search from `alpha_init`, keeping the start when the posterior does
/// not improve and falling back to a grid when the search does not converge
fn fit_gene_dispersion<'a>(
    counts: ArrayView1<'a, f64>,
    mu: ArrayView1<'a, f64>,
    design: &'a Array2<f64>,
    alpha_init: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    let posterior = DispersionPosterior::new(counts, mu, design, None);
    let min_log_alpha = (params.min_disp / 10.0).ln();
    let ls = posterior.line_search(alpha_init.ln(), min_log_alpha, params);

    let no_increase = ls.last_lp < ls.initial_lp + ls.initial_lp.abs() / 1e6;
    let mut disp = if no_increase {
        alpha_init
    } else {
        ls.log_alpha.exp().clamp(params.min_disp, max_disp)
    };

    let converged = ls.iterations < params.maxit && ls.iterations != 1;
    if !converged && disp > params.min_disp * 10.0 {
        disp = posterior.grid_search(params.min_disp.ln(), max_disp.ln()).exp();
    }
    disp.clamp(params.min_disp, max_disp)
}

/// sum(((y - mu)^2 - mu) / mu^2) / (m - p) with mu from least squares, floored at 1
fn rough_disp_estimate(normalized: &Array2<f64>, design: &Array2<f64>) -> Result<Vec<f64>> {
    let (n_genes, m) = normalized.dim();
    let p = design.ncols();
    let ones = Array2::ones((n_genes, m));
    let mu = linear_model_mu(normalized.view(), &ones, design)?;
    let df = (m.saturating_sub(p)).max(1) as f64;
    Ok(normalized
        .axis_iter(Axis(0))
        .zip(mu.axis_iter(Axis(0)))
        .map(|(y, mu)| {
            let s: f64 = y
                .iter()
                .zip(mu.iter())
                .map(|(&y, &mu)| {
                    let mu = mu.max(1.0);
                    ((y - mu).powi(2) - mu) / (mu * mu)
                })
                .sum();
            (s / df).max(0.0)
        })
        .collect())
}

/// (variance - xim * mean) / mean^2 of the normalized counts
fn moments_disp_estimate(normalized: ArrayView1<f64>, xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.sum() / n;
    if mean <= 0.0 {
        return f64::INFINITY;
    }
    let var = normalized.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (var - xim * mean) / (mean * mean)
}
