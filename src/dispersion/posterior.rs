//! Cox-Reid adjusted profile likelihood of the dispersion and its optimizers
//!
//! Shared by the gene-wise (no prior) and MAP (log-normal prior) steps.

use ndarray::{Array2, ArrayView1};
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::linalg::{invert_spd, log_det_spd, weighted_crossprod};

/// Hard bounds on proposals of the line search, log scale
const MIN_LOG_ALPHA_PROPOSAL: f64 = -30.0;
const MAX_LOG_ALPHA_PROPOSAL: f64 = 10.0;
/// Sufficient-decrease constant of the Armijo rule
const ARMIJO_EPSILON: f64 = 1.0e-4;
const GRID_POINTS: usize = 20;

/// Normal prior on log(alpha)
#[derive(Debug, Clone, Copy)]
pub struct LogNormalPrior {
    pub mean: f64,
    pub var: f64,
}

/// Outcome of the Armijo line search
#[derive(Debug, Clone, Copy)]
pub struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
}

/// Log posterior of log(alpha) for one gene with mu held fixed
pub struct DispersionPosterior<'a> {
    counts: ArrayView1<'a, f64>,
    mu: ArrayView1<'a, f64>,
    design: &'a Array2<f64>,
    prior: Option<LogNormalPrior>,
}

impl<'a> DispersionPosterior<'a> {
    pub fn new(
        counts: ArrayView1<'a, f64>,
        mu: ArrayView1<'a, f64>,
        design: &'a Array2<f64>,
        prior: Option<LogNormalPrior>,
    ) -> Self {
        Self { counts, mu, design, prior }
    }

    fn cr_weights(&self, alpha: f64) -> Vec<f64> {
        self.mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
    }

    pub fn log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;

        let ll: f64 = self
            .counts
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| {
                let m = m.max(1e-10);
                ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv) - y * (m + alpha_inv).ln()
                    - alpha_inv * (1.0 + m * alpha).ln()
            })
            .sum();

        let log_det = log_det_spd(&weighted_crossprod(self.design, &self.cr_weights(alpha)));
        let cr_term = if log_det.is_finite() { -0.5 * log_det } else { 0.0 };

        let prior_term = match self.prior {
            Some(p) => -0.5 * (log_alpha - p.mean).powi(2) / p.var,
            None => 0.0,
        };
        ll + cr_term + prior_term
    }

    /// Derivative with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_sq = alpha * alpha;
        let alpha_inv = 1.0 / alpha;

        let dll: f64 = self
            .counts
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| {
                let m = m.max(1e-10);
                (digamma(alpha_inv) - digamma(y + alpha_inv)) / alpha_sq + y / (alpha_sq * (m + alpha_inv))
                    + (1.0 + m * alpha).ln() / alpha_sq
                    - m / (alpha * (1.0 + m * alpha))
            })
            .sum();

        // d/dalpha of -0.5 log|B| = -0.5 tr(B^-1 dB), dB = X' diag(-w^2) X
        let w = self.cr_weights(alpha);
        let b = weighted_crossprod(self.design, &w);
        let dw: Vec<f64> = w.iter().map(|v| -v * v).collect();
        let db = weighted_crossprod(self.design, &dw);
        let dcr = match invert_spd(&b) {
            Some(inv) => -0.5 * inv.dot(&db).diag().sum(),
            None => 0.0,
        };

        let prior_term = match self.prior {
            Some(p) => -(log_alpha - p.mean) / p.var,
            None => 0.0,
        };
        (dll + dcr) * alpha + prior_term
    }

    /// Armijo backtracking line search along the gradient
    pub fn line_search(&self, log_alpha_init: f64, min_log_alpha: f64, params: &DispersionParams) -> LineSearch {
        let mut log_alpha = log_alpha_init.clamp(MIN_LOG_ALPHA_PROPOSAL, MAX_LOG_ALPHA_PROPOSAL);
        let initial_lp = self.log_posterior(log_alpha);
        let mut lp = initial_lp;
        let mut dlp = self.d_log_posterior(log_alpha);
        let mut kappa = params.kappa_0;
        let mut accepted = 0usize;
        let mut iterations = params.maxit;

        for iter in 0..params.maxit {
            let raw = log_alpha + kappa * dlp;
            if raw < MIN_LOG_ALPHA_PROPOSAL {
                kappa = (MIN_LOG_ALPHA_PROPOSAL - log_alpha) / dlp;
            }
            if raw > MAX_LOG_ALPHA_PROPOSAL {
                kappa = (MAX_LOG_ALPHA_PROPOSAL - log_alpha) / dlp;
            }
            let proposal = log_alpha + kappa * dlp;
            let lp_proposal = self.log_posterior(proposal);

            if -lp_proposal <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
                accepted += 1;
                log_alpha = proposal;
                let change = lp_proposal - lp;
                lp = lp_proposal;
                if change < params.disp_tol || log_alpha < min_log_alpha {
                    iterations = iter + 1;
                    break;
                }
                dlp = self.d_log_posterior(log_alpha);
                kappa = (kappa * 1.1).min(params.kappa_0);
                if accepted % 5 == 0 {
                    kappa /= 2.0;
                }
            } else {
                kappa /= 2.0;
            }
        }

        LineSearch {
            log_alpha,
            initial_lp,
            last_lp: lp,
            iterations,
        }
    }

    /// Coarse then fine grid search over [min_log_alpha, max_log_alpha]
    pub fn grid_search(&self, min_log_alpha: f64, max_log_alpha: f64) -> f64 {
        let step = (max_log_alpha - min_log_alpha) / (GRID_POINTS - 1) as f64;
        let coarse: Vec<f64> = (0..GRID_POINTS).map(|i| min_log_alpha + i as f64 * step).collect();
        let best = self.argmax(&coarse);

        let fine_step = 2.0 * step / (GRID_POINTS - 1) as f64;
        let fine: Vec<f64> = (0..GRID_POINTS).map(|i| best - step + i as f64 * fine_step).collect();
        self.argmax(&fine)
    }

    fn argmax(&self, grid: &[f64]) -> f64 {
        let mut best = grid[0];
        let mut best_lp = f64::NEG_INFINITY;
        for &a in grid {
            let lp = self.log_posterior(a);
            if lp > best_lp {
                best_lp = lp;
                best = a;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn fixture() -> (Array1<f64>, Array1<f64>, Array2<f64>) {
        let counts = array![80.0, 120.0, 95.0, 140.0, 60.0, 105.0];
        let mu = Array1::from_elem(6, 100.0);
        let design = Array2::ones((6, 1));
        (counts, mu, design)
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let (counts, mu, design) = fixture();
        let prior = Some(LogNormalPrior { mean: -2.0, var: 0.5 });
        let post = DispersionPosterior::new(counts.view(), mu.view(), &design, prior);
        for &la in &[-4.0, -2.0, 0.0] {
            let h = 1e-5;
            let numeric = (post.log_posterior(la + h) - post.log_posterior(la - h)) / (2.0 * h);
            let analytic = post.d_log_posterior(la);
            assert!(
                (numeric - analytic).abs() < 1e-4 * (1.0 + numeric.abs()),
                "at {}: numeric {} vs analytic {}",
                la,
                numeric,
                analytic
            );
        }
    }

    #[test]
    fn test_line_search_and_grid_agree() {
        let (counts, mu, design) = fixture();
        let post = DispersionPosterior::new(counts.view(), mu.view(), &design, None);
        let params = DispersionParams::default();
        let ls = post.line_search((0.1f64).ln(), (1e-9f64).ln(), &params);
        assert!(ls.last_lp >= ls.initial_lp);
        let grid = post.grid_search((1e-8f64).ln(), (10.0f64).ln());
        assert!((ls.log_alpha - grid).abs() < 0.2, "line search {} vs grid {}", ls.log_alpha, grid);
        // sample variance is about 810 against a mean of 100, so alpha is near 0.07
        let alpha = ls.log_alpha.exp();
        assert!(alpha > 0.02 && alpha < 0.2, "alpha was {}", alpha);
    }

    #[test]
    fn test_prior_pulls_toward_mean() {
        let (counts, mu, design) = fixture();
        let params = DispersionParams::default();
        let free = DispersionPosterior::new(counts.view(), mu.view(), &design, None)
            .line_search(-2.0, -20.0, &params);
        let prior = LogNormalPrior { mean: -6.0, var: 0.1 };
        let shrunk = DispersionPosterior::new(counts.view(), mu.view(), &design, Some(prior))
            .line_search(-2.0, -20.0, &params);
        assert!(shrunk.log_alpha < free.log_alpha);
    }
}
