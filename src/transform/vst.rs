//! Variance stabilizing transformation
//!
//! Counts are mapped through the integral of `1 / sqrt(variance(mu))` for the
//! fitted dispersion-mean trend, which gives values on roughly the log2 scale
//! whose variance no longer depends on the mean.
//!
//! - parametric trend `a0 + a1 / mu`: closed form
//! - mean trend `a`: closed form with asinh
//! - local trend: numerical integration on an asinh-spaced grid, rescaled so
//!   the 95% and 99.9% quantiles of the means map to their log2

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::TransformedData;
use crate::data::DeDataSet;
use crate::dispersion::{estimate_gene_dispersions, fit_dispersion_trend, DispersionParams, DispersionTrend, TrendFitMethod};
use crate::error::{AnalysisError, Result};
use crate::glm::DesignFormula;
use crate::rng::MersenneTwister;
use crate::stats::quantile_type7;

/// Genes with a mean normalized count above this are eligible for the subsample
const SUBSAMPLE_MIN_MEAN: f64 = 5.0;
const LOCAL_GRID_POINTS: usize = 1000;

/// Options for `vst`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VstParams {
    /// Re-estimate the trend under `~ 1` instead of using the fitted design
    pub blind: bool,
    /// Number of genes the trend is fitted on
    pub nsub: usize,
    pub fit_type: TrendFitMethod,
    /// Seed for drawing the gene subsample
    pub seed: u32,
}

impl Default for VstParams {
    fn default() -> Self {
        Self {
            blind: true,
            nsub: 1000,
            fit_type: TrendFitMethod::Parametric,
            seed: 1,
        }
    }
}

/// Variance stabilized counts
pub fn vst(dds: &DeDataSet, params: &VstParams) -> Result<TransformedData> {
    let normalized = dds.normalized_counts()?;
    let trend = match (params.blind, dds.dispersion_trend()) {
        (false, Some(trend)) => trend.clone(),
        _ => subsample_trend(dds, params)?,
    };
    log::info!("variance stabilizing with the {} trend", trend);

    let data = match &trend {
        DispersionTrend::Parametric { asympt_disp, extra_pois } => {
            map_counts(normalized, |q| vst_parametric(q, *asympt_disp, *extra_pois))
        }
        DispersionTrend::Mean(alpha) => map_counts(normalized, |q| vst_mean(q, *alpha)),
        DispersionTrend::Local { .. } => {
            let integral = LocalIntegral::new(normalized, &trend, dds.xim()?)?;
            map_counts(normalized, |q| integral.transform(q))
        }
    };

    Ok(TransformedData {
        data,
        gene_ids: dds.gene_ids().to_vec(),
        sample_ids: dds.sample_ids().to_vec(),
        description: format!("vst ({:?} trend)", trend.method()).to_lowercase(),
    })
}

/// Fit the trend on up to `nsub` genes with mean > 5
fn subsample_trend(dds: &DeDataSet, params: &VstParams) -> Result<DispersionTrend> {
    let (means, _) = dds.base_mean_var()?;
    let eligible: Vec<usize> = (0..means.len()).filter(|&i| means[i] > SUBSAMPLE_MIN_MEAN).collect();

    let mut sub = dds.clone();
    if eligible.len() >= params.nsub {
        let keep = sample_indices(&eligible, params.nsub, params.seed);
        sub.filter_genes(&keep)?;
    } else {
        log::warn!(
            "only {} genes have a mean normalized count above {}; fitting the vst trend on all {} genes",
            eligible.len(),
            SUBSAMPLE_MIN_MEAN,
            dds.n_genes()
        );
    }
    if params.blind || sub.formula().is_none() {
        sub.set_design(DesignFormula::intercept_only(), &[])?;
    }

    let dispersion = DispersionParams::default();
    estimate_gene_dispersions(&mut sub, &dispersion)?;
    fit_dispersion_trend(&mut sub, params.fit_type, &dispersion)?;
    sub.dispersion_trend().cloned().ok_or_else(|| AnalysisError::DispersionError {
        reason: "no dispersion trend was fitted for vst".to_string(),
    })
}

/// Draw `k` of `pool` without replacement, returned in ascending order
fn sample_indices(pool: &[usize], k: usize, seed: u32) -> Vec<usize> {
    let mut rng = MersenneTwister::new(seed);
    let mut items = pool.to_vec();
    for i in 0..k.min(items.len()) {
        let j = i + ((rng.runif() * (items.len() - i) as f64) as usize).min(items.len() - i - 1);
        items.swap(i, j);
    }
    items.truncate(k);
    items.sort_unstable();
    items
}

fn map_counts<F>(normalized: &Array2<f64>, f: F) -> Array2<f64>
where
    F: Fn(f64) -> f64 + Sync,
{
    let (n, m) = normalized.dim();
    let values: Vec<f64> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let row = normalized.row(i);
            (0..m).map(|j| f(row[j].max(0.0))).collect::<Vec<_>>()
        })
        .collect();
    Array2::from_shape_vec((n, m), values).unwrap_or_else(|_| Array2::zeros((n, m)))
}

/// `log2((1 + a1 + 2 a0 q + 2 sqrt(a0 q (1 + a1 + a0 q))) / (4 a0))`
pub fn vst_parametric(q: f64, asympt_disp: f64, extra_pois: f64) -> f64 {
    let a = asympt_disp;
    let numerator = 1.0 + extra_pois + 2.0 * a * q + 2.0 * (a * q * (1.0 + extra_pois + a * q)).sqrt();
    (numerator / (4.0 * a)).log2()
}

/// `(2 asinh(sqrt(a q)) - ln(a) - ln(4)) / ln(2)`
pub fn vst_mean(q: f64, alpha: f64) -> f64 {
    (2.0 * (alpha * q).sqrt().asinh() - alpha.ln() - 4.0_f64.ln()) / std::f64::consts::LN_2
}

/// Cumulative integral of `1 / sqrt(alpha(x) x^2 + xim x)` on an asinh grid
struct LocalIntegral {
    asinh_mid: Vec<f64>,
    cumulative: Vec<f64>,
    eta: f64,
    xi: f64,
}

impl LocalIntegral {
    fn new(normalized: &Array2<f64>, trend: &DispersionTrend, xim: f64) -> Result<Self> {
        let max_count = normalized.iter().copied().fold(0.0, f64::max);
        if max_count <= 0.0 {
            return Err(AnalysisError::EmptyData {
                reason: "every normalized count is zero".to_string(),
            });
        }
        let top = max_count.asinh();
        let grid: Vec<f64> = (1..LOCAL_GRID_POINTS)
            .map(|k| (top * k as f64 / (LOCAL_GRID_POINTS - 1) as f64).sinh())
            .collect();
        let integrand: Vec<f64> = grid
            .iter()
            .map(|&x| 1.0 / (trend.evaluate(x) * x * x + xim * x).sqrt())
            .collect();

        let mut asinh_mid = Vec::with_capacity(grid.len() - 1);
        let mut cumulative = Vec::with_capacity(grid.len() - 1);
        let mut total = 0.0;
        for k in 1..grid.len() {
            total += (grid[k] - grid[k - 1]) * (integrand[k] + integrand[k - 1]) / 2.0;
            asinh_mid.push(((grid[k] + grid[k - 1]) / 2.0).asinh());
            cumulative.push(total);
        }

        let mut row_means: Vec<f64> = normalized.rows().into_iter().filter_map(|r| r.mean()).collect();
        row_means.sort_by(|a, b| a.total_cmp(b));
        let h1 = quantile_type7(&row_means, 0.95);
        let h2 = quantile_type7(&row_means, 0.999);

        let mut integral = Self {
            asinh_mid,
            cumulative,
            eta: 1.0,
            xi: 0.0,
        };
        let (s1, s2) = (integral.integral_at(h1), integral.integral_at(h2));
        if h1 > 0.0 && s2 > s1 {
            integral.eta = (h2.log2() - h1.log2()) / (s2 - s1);
            integral.xi = h1.log2() - integral.eta * s1;
        }
        Ok(integral)
    }

    fn integral_at(&self, q: f64) -> f64 {
        let x = q.asinh();
        let (xs, ys) = (&self.asinh_mid, &self.cumulative);
        if x <= xs[0] {
            return ys[0] * x / xs[0];
        }
        let last = xs.len() - 1;
        if last == 0 {
            return ys[0];
        }
        if x >= xs[last] {
            // continue the last segment past the grid
            let slope = (ys[last] - ys[last - 1]) / (xs[last] - xs[last - 1]);
            return ys[last] + slope * (x - xs[last]);
        }
        let k = xs.partition_point(|&v| v <= x);
        let t = (x - xs[k - 1]) / (xs[k] - xs[k - 1]);
        ys[k - 1] + t * (ys[k] - ys[k - 1])
    }

    fn transform(&self, q: f64) -> f64 {
        self.eta * self.integral_at(q) + self.xi
    }
}
