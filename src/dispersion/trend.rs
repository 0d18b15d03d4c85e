//! Dispersion trend fitting

use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::DispersionParams;
use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::linalg::{solve_spd, weighted_crossprod};
use crate::stats::trimmed_mean;

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendFitMethod {
    /// dispersion = a0 + a1 / mean
    #[default]
    Parametric,
    /// Local quadratic regression of log dispersion on log mean
    Local,
    /// A single trimmed mean of the gene-wise dispersions
    Mean,
}

impl FromStr for TrendFitMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parametric" => Ok(Self::Parametric),
            "local" => Ok(Self::Local),
            "mean" => Ok(Self::Mean),
            _ => Err(AnalysisError::InvalidParameter {
                reason: format!("unknown fit type '{}' (parametric, local or mean)", s),
            }),
        }
    }
}

/// Fitted dispersion-mean relationship
#[derive(Debug, Clone, PartialEq)]
pub enum DispersionTrend {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// Fitted log dispersions on a grid of log means, interpolated linearly
    Local { log_means: Vec<f64>, log_disps: Vec<f64> },
    Mean(f64),
}

impl DispersionTrend {
    /// Trended dispersion at a mean of normalized counts
    pub fn evaluate(&self, mean: f64) -> f64 {
        match self {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => asympt_disp + extra_pois / mean,
            DispersionTrend::Local { log_means, log_disps } => {
                interpolate(log_means, log_disps, mean.ln()).exp()
            }
            DispersionTrend::Mean(d) => *d,
        }
    }

    pub fn method(&self) -> TrendFitMethod {
        match self {
            DispersionTrend::Parametric { .. } => TrendFitMethod::Parametric,
            DispersionTrend::Local { .. } => TrendFitMethod::Local,
            DispersionTrend::Mean(_) => TrendFitMethod::Mean,
        }
    }
}

impl std::fmt::Display for DispersionTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => {
                write!(f, "parametric: {:.4} + {:.4} / mean", asympt_disp, extra_pois)
            }
            DispersionTrend::Local { log_means, .. } => write!(f, "local regression ({} grid points)", log_means.len()),
            DispersionTrend::Mean(d) => write!(f, "mean: {:.4}", d),
        }
    }
}

/// Linear interpolation, constant beyond the ends
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if x.is_nan() || xs.is_empty() {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    let last = xs.len() - 1;
    if x >= xs[last] {
        return ys[last];
    }
    let k = xs.partition_point(|&v| v <= x);
    let (x0, x1) = (xs[k - 1], xs[k]);
    let t = (x - x0) / (x1 - x0);
    ys[k - 1] + t * (ys[k] - ys[k - 1])
}

/// Fit a trend to the gene-wise dispersions and store the trended values
///
/// A failed parametric fit falls back to local regression.
pub fn fit_dispersion_trend(dds: &mut DeDataSet, method: TrendFitMethod, params: &DispersionParams) -> Result<()> {
    let gene_disps = dds
        .gene_dispersions()
        .ok_or_else(|| AnalysisError::DispersionError {
            reason: "gene-wise dispersions must be estimated first".to_string(),
        })?
        .to_vec();
    let (means, _) = dds.base_mean_var()?;
    let means = means.to_vec();

    let trend = fit_trend(&means, &gene_disps, method, params.min_disp)?;
    log::info!("fitted dispersion trend, {}", trend);

    let trended: Array1<f64> = means
        .iter()
        .zip(&gene_disps)
        .map(|(&m, d)| if d.is_nan() || m <= 0.0 { f64::NAN } else { trend.evaluate(m) })
        .collect();
    dds.set_trended_dispersions(trended, trend)
}

/// Fit a dispersion trend to (mean, dispersion) pairs; NaN dispersions are skipped
pub fn fit_trend(means: &[f64], disps: &[f64], method: TrendFitMethod, min_disp: f64) -> Result<DispersionTrend> {
    match method {
        TrendFitMethod::Parametric => match fit_parametric_trend(means, disps, min_disp) {
            Ok(t) => Ok(t),
            Err(e) => {
                log::warn!(
                    "the dispersion trend was not well captured by a0 + a1/mean ({}); \
                     using local regression instead",
                    e
                );
                fit_local_trend(means, disps, min_disp)
            }
        },
        TrendFitMethod::Local => fit_local_trend(means, disps, min_disp),
        TrendFitMethod::Mean => {
            let use_for_mean: Vec<f64> = disps
                .iter()
                .copied()
                .filter(|d| d.is_finite() && *d > 10.0 * min_disp)
                .collect();
            if use_for_mean.is_empty() {
                return Err(AnalysisError::DispersionError {
                    reason: "all gene-wise dispersion estimates are near the minimum value".to_string(),
                });
            }
            Ok(DispersionTrend::Mean(trimmed_mean(&use_for_mean, 0.001)))
        }
    }
}

/// Iterative Gamma-family GLM with residual filtering
fn fit_parametric_trend(means: &[f64], disps: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(disps)
        .filter(|&(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();
    if data.is_empty() {
        return Err(AnalysisError::DispersionError {
            reason: "all gene-wise dispersion estimates are within 2 orders of magnitude \
                     from the minimum value"
                .to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let residual = d / (coefs.0 + coefs.1 / m);
                residual > 1e-4 && residual < 15.0
            })
            .collect();
        if good.len() < 3 {
            return Err(AnalysisError::DispersionError {
                reason: "too few genes with usable residuals for the parametric fit".to_string(),
            });
        }

        let (new, converged) = gamma_identity_glm(&good, coefs);
        coefs = new;
        log::debug!(
            "parametric trend iteration {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );
        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(AnalysisError::DispersionError {
                reason: format!("coefficients are not positive (a0={:.4}, a1={:.4})", coefs.0, coefs.1),
            });
        }
        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && converged {
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }
    Err(AnalysisError::DispersionError {
        reason: "dispersion fit did not converge".to_string(),
    })
}

/// Gamma GLM with identity link, disp ~ 1 + 1/mean; returns coefficients and convergence
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);
    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-300 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

const LOCAL_GRID: usize = 100;
const LOCAL_SPAN: f64 = 0.7;

/// Local quadratic regression of log dispersion on log mean, weighted by mean
///
/// Fitted on a grid spanning the observed log means with a nearest-neighbour
/// tricube kernel covering 70% of the genes.
fn fit_local_trend(means: &[f64], disps: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let points: Vec<(f64, f64, f64)> = means
        .iter()
        .zip(disps)
        .filter(|&(&m, &d)| m > 0.0 && d.is_finite() && d >= 10.0 * min_disp)
        .map(|(&m, &d)| (m.ln(), d.ln(), m))
        .collect();
    if points.is_empty() {
        return Ok(DispersionTrend::Mean(min_disp));
    }
    if points.len() < 5 {
        return Err(AnalysisError::DispersionError {
            reason: format!("local trend needs at least 5 genes, got {}", points.len()),
        });
    }

    let lo = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let hi = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    if hi - lo < 1e-8 {
        let mean_log = points.iter().map(|p| p.1).sum::<f64>() / points.len() as f64;
        return Ok(DispersionTrend::Mean(mean_log.exp()));
    }

    let k = ((LOCAL_SPAN * points.len() as f64).ceil() as usize).clamp(3, points.len());
    let grid: Vec<f64> = (0..LOCAL_GRID)
        .map(|i| lo + (hi - lo) * i as f64 / (LOCAL_GRID - 1) as f64)
        .collect();
    let fitted: Vec<f64> = grid.iter().map(|&g| local_quadratic_at(&points, g, k)).collect();

    Ok(DispersionTrend::Local {
        log_means: grid,
        log_disps: fitted,
    })
}

fn local_quadratic_at(points: &[(f64, f64, f64)], x0: f64, k: usize) -> f64 {
    let mut dist: Vec<f64> = points.iter().map(|p| (p.0 - x0).abs()).collect();
    let (_, kth, _) = dist.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
    let h = (*kth).max(1e-8) * 1.0000001;

    let n = points.len();
    let mut x = Array2::zeros((n, 3));
    let mut w = vec![0.0; n];
    for (i, &(lx, _, m)) in points.iter().enumerate() {
        let u = lx - x0;
        x[[i, 0]] = 1.0;
        x[[i, 1]] = u;
        x[[i, 2]] = u * u;
        let r = u.abs() / h;
        if r < 1.0 {
            w[i] = m * (1.0 - r.powi(3)).powi(3);
        }
    }
    let xtwx = weighted_crossprod(&x, &w);
    let xtwy: Vec<f64> = (0..3)
        .map(|j| (0..n).map(|i| w[i] * x[[i, j]] * points[i].1).sum())
        .collect();
    match solve_spd(&xtwx, &xtwy) {
        Some(beta) => beta[0],
        None => {
            let sw: f64 = w.iter().sum();
            w.iter().zip(points).map(|(wi, p)| wi * p.1).sum::<f64>() / sw.max(1e-300)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(a0: f64, a1: f64) -> (Vec<f64>, Vec<f64>) {
        let means: Vec<f64> = (0..200).map(|i| 2.0 * 1.04f64.powi(i)).collect();
        // deterministic multiplicative scatter around the trend
        let disps = means
            .iter()
            .enumerate()
            .map(|(i, &m)| (a0 + a1 / m) * (((i % 7) as f64 - 3.0) * 0.1).exp())
            .collect();
        (means, disps)
    }

    #[test]
    fn test_parametric_recovers_coefficients() {
        let (means, disps) = synthetic(0.05, 2.0);
        let trend = fit_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8).unwrap();
        match trend {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => {
                assert!((asympt_disp - 0.05).abs() < 0.01, "a0 was {}", asympt_disp);
                assert!((extra_pois - 2.0).abs() < 0.4, "a1 was {}", extra_pois);
            }
            other => panic!("expected a parametric trend, got {:?}", other),
        }
    }

    #[test]
    fn test_parametric_falls_back_to_local() {
        // dispersion increasing with the mean forces a1 < 0
        let means: Vec<f64> = (1..100).map(|i| i as f64 * 10.0).collect();
        let disps: Vec<f64> = means.iter().map(|m| 0.01 + m / 1000.0).collect();
        let trend = fit_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8).unwrap();
        assert_eq!(trend.method(), TrendFitMethod::Local);
        assert!(trend.evaluate(900.0) > trend.evaluate(20.0));
    }

    #[test]
    fn test_local_follows_smooth_curve() {
        let (means, disps) = synthetic(0.1, 1.0);
        let trend = fit_trend(&means, &disps, TrendFitMethod::Local, 1e-8).unwrap();
        let got = trend.evaluate(1000.0);
        assert!((got / 0.101).ln().abs() < 0.25, "plateau was {}", got);
        assert!(trend.evaluate(5.0) > trend.evaluate(50.0));
        assert!(trend.evaluate(50.0) > trend.evaluate(1000.0));
    }

    #[test]
    fn test_mean_trend_ignores_tiny_estimates() {
        let means = vec![10.0; 5];
        let disps = vec![0.1, 0.2, 0.3, 1e-8, f64::NAN];
        let trend = fit_trend(&means, &disps, TrendFitMethod::Mean, 1e-8).unwrap();
        assert!((trend.evaluate(123.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_interpolation_clamps_at_ends() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [1.0, 3.0, 2.0];
        assert_eq!(interpolate(&xs, &ys, -1.0), 1.0);
        assert_eq!(interpolate(&xs, &ys, 0.5), 2.0);
        assert_eq!(interpolate(&xs, &ys, 5.0), 2.0);
        assert_eq!("Local".parse::<TrendFitMethod>().unwrap(), TrendFitMethod::Local);
    }
}
