//! apeglm shrinkage: a Cauchy prior on one coefficient with a Laplace
//! approximation of the posterior
//!
//! 1. Estimate the prior variance of the target coefficient from the MLE
//!    LFCs and their SEs by a method-of-moments fixed point.
//! 2. Per gene, maximize the NB log likelihood with offsets plus a
//!    Cauchy(0, S) prior on the target and Normal(0, 15^2) priors on the
//!    other coefficients.
//! 3. The posterior SD comes from the inverse Hessian at the mode. The false
//!    sign rate is `P(N(0, sd) < -|map|)` and s-values are its running mean.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::{contrast_vector, single_coefficient};
use crate::io::DeResults;
use crate::linalg::{invert_spd, solve_spd};

/// Parameters for apeglm shrinkage
#[derive(Debug, Clone)]
pub struct ApeglmParams {
    /// Multiplier on the estimated prior scale
    pub multiplier: f64,
    /// Upper bound on the prior scale
    pub max_prior_scale: f64,
    /// SD of the normal prior on coefficients that are not shrunk
    pub no_shrink_scale: f64,
    pub max_iter: usize,
    /// Convergence tolerance on the largest Newton step
    pub tolerance: f64,
}

impl Default for ApeglmParams {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            max_prior_scale: 1.0,
            no_shrink_scale: 15.0,
            max_iter: 100,
            tolerance: 1e-8,
        }
    }
}

const MIN_PRIOR_VAR: f64 = 1e-6;
const MAX_PRIOR_VAR: f64 = 400.0;

/// Prior on the coefficients of one gene
struct Prior {
    target: usize,
    cauchy_scale_sq: f64,
    normal_var: f64,
}

/// Negative log posterior of one gene with its gradient and Hessian
struct GeneObjective<'a> {
    y: ArrayView1<'a, f64>,
    design: &'a Array2<f64>,
    offsets: Vec<f64>,
    size: f64,
    prior: &'a Prior,
}

impl GeneObjective<'_> {
    fn eta(&self, beta: &Array1<f64>) -> Array1<f64> {
        let mut eta = self.design.dot(beta);
        for (e, o) in eta.iter_mut().zip(&self.offsets) {
            *e += o;
        }
        eta
    }

    fn value(&self, beta: &Array1<f64>) -> f64 {
        let eta = self.eta(beta);
        let nll: f64 = self
            .y
            .iter()
            .zip(eta.iter())
            .map(|(&y, &e)| -(y * e - (y + self.size) * (e.exp() + self.size).ln()))
            .sum();
        nll + self.prior_value(beta)
    }

    fn prior_value(&self, beta: &Array1<f64>) -> f64 {
        beta.iter()
            .enumerate()
            .map(|(k, &b)| {
                if k == self.prior.target {
                    (1.0 + b * b / self.prior.cauchy_scale_sq).ln()
                } else {
                    b * b / (2.0 * self.prior.normal_var)
                }
            })
            .sum()
    }

    fn gradient_hessian(&self, beta: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
        let p = beta.len();
        let eta = self.eta(beta);
        let mut grad = Array1::zeros(p);
        let mut hess = Array2::zeros((p, p));
        for (j, (&y, &e)) in self.y.iter().zip(eta.iter()).enumerate() {
            let mu = e.exp();
            let denom = mu + self.size;
            let resid = y - (y + self.size) * mu / denom;
            let w = (y + self.size) * mu * self.size / (denom * denom);
            let x = self.design.row(j);
            for a in 0..p {
                grad[a] -= x[a] * resid;
                for b in 0..p {
                    hess[[a, b]] += w * x[a] * x[b];
                }
            }
        }
        for k in 0..p {
            let b = beta[k];
            if k == self.prior.target {
                let s2 = self.prior.cauchy_scale_sq;
                grad[k] += 2.0 * b / (s2 + b * b);
                hess[[k, k]] += 2.0 * (s2 - b * b) / (s2 + b * b).powi(2);
            } else {
                grad[k] += b / self.prior.normal_var;
                hess[[k, k]] += 1.0 / self.prior.normal_var;
            }
        }
        (grad, hess)
    }
}

/// Outcome for one gene on the natural log scale
struct GeneFit {
    map: f64,
    sd: f64,
    fsr: f64,
}

impl GeneFit {
    fn missing() -> Self {
        Self {
            map: f64::NAN,
            sd: f64::NAN,
            fsr: f64::NAN,
        }
    }
}

/// Damped Newton from the MLE; steps that do not decrease the objective
/// are halved, and gradient steps replace Newton steps where the Hessian
/// is not positive definite
fn fit_gene(obj: &GeneObjective, start: Array1<f64>, params: &ApeglmParams) -> GeneFit {
    let mut beta = start;
    let mut value = obj.value(&beta);
    if !value.is_finite() {
        beta.fill(0.0);
        value = obj.value(&beta);
    }

    for _ in 0..params.max_iter {
        let (grad, hess) = obj.gradient_hessian(&beta);
        let direction = match solve_spd(&hess, &grad.to_vec()) {
            Some(step) => step,
            None => grad.clone(),
        };
        let mut step = 1.0;
        let mut improved = false;
        while step > 1e-10 {
            let candidate = &beta - &(&direction * step);
            let v = obj.value(&candidate);
            if v.is_finite() && v <= value {
                let moved = direction.iter().map(|d| (d * step).abs()).fold(0.0, f64::max);
                beta = candidate;
                value = v;
                improved = moved > params.tolerance;
                break;
            }
            step /= 2.0;
        }
        if !improved {
            break;
        }
    }

    let (_, hess) = obj.gradient_hessian(&beta);
    let target = obj.prior.target;
    let sd = match invert_spd(&hess) {
        Some(cov) if cov[[target, target]] > 0.0 => cov[[target, target]].sqrt(),
        _ => f64::NAN,
    };
    let map = beta[target];
    let fsr = match Normal::new(0.0, sd) {
        Ok(n) if sd.is_finite() => n.cdf(-map.abs()),
        _ => f64::NAN,
    };
    GeneFit { map, sd, fsr }
}

/// Method-of-moments prior variance of the target coefficient
///
/// Solves `A = sum((x^2 - d) w(A)) / sum(w(A))` with `w(A) = 1 / (2 (A + d)^2)`
/// by bisection on [1e-6, 400], where `x` is the MLE and `d` its squared SE
/// (natural log scale).
pub fn prior_var(mle: &[f64], se: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = mle
        .iter()
        .zip(se)
        .filter(|(x, s)| x.is_finite() && s.is_finite())
        .map(|(&x, &s)| (x * x, s * s))
        .collect();
    if pairs.is_empty() {
        return MIN_PRIOR_VAR;
    }
    let objective = |a: f64| {
        let (num, den) = pairs.iter().fold((0.0, 0.0), |(num, den), &(sq, d)| {
            let w = 1.0 / (2.0 * (a + d).powi(2));
            (num + (sq - d) * w, den + w)
        });
        num / den - a
    };

    if objective(MIN_PRIOR_VAR) < 0.0 {
        return MIN_PRIOR_VAR;
    }
    let (mut lo, mut hi) = (MIN_PRIOR_VAR, MAX_PRIOR_VAR);
    if objective(hi) > 0.0 {
        return hi;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if objective(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Running mean of the sorted false sign rates, NaN kept
pub fn svalues(fsr: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..fsr.len()).filter(|&i| !fsr[i].is_nan()).collect();
    order.sort_by(|&a, &b| fsr[a].partial_cmp(&fsr[b]).unwrap_or(Ordering::Equal));
    let mut out = vec![f64::NAN; fsr.len()];
    let mut total = 0.0;
    for (rank, &i) in order.iter().enumerate() {
        total += fsr[i];
        out[i] = total / (rank + 1) as f64;
    }
    out
}

/// Shrink the LFC of a single-coefficient contrast and add s-values
pub fn shrink_lfc_apeglm(dds: &DeDataSet, results: &mut DeResults, params: &ApeglmParams) -> Result<f64> {
    let info = dds.design_info()?;
    let (vector, label) = contrast_vector(info, &results.contrast)?;
    let target = single_coefficient(&vector).ok_or_else(|| AnalysisError::InvalidContrast {
        reason: format!(
            "apeglm shrinks a single coefficient; '{}' combines several. Use one of: {}",
            results.contrast,
            info.coef_names.join(", ")
        ),
    })?;
    let coefficients = dds.coefficients().ok_or_else(|| AnalysisError::InvalidParameter {
        reason: "the GLM must be fitted before shrinkage".to_string(),
    })?;
    let dispersions = dds.dispersions().ok_or_else(|| AnalysisError::DispersionError {
        reason: "dispersions must be estimated before shrinkage".to_string(),
    })?;
    let design = dds.design_matrix()?;
    let nf = dds.normalization_matrix()?;
    let counts = dds.counts().counts();
    let all_zero = dds.all_zero();

    let ln2 = std::f64::consts::LN_2;
    let mle: Vec<f64> = results.log2_fold_changes.iter().map(|l| l * ln2).collect();
    let mle_se: Vec<f64> = results.lfc_se.iter().map(|s| s * ln2).collect();
    let var = prior_var(&mle, &mle_se);
    let scale = (params.multiplier * var.sqrt()).min(params.max_prior_scale);
    log::info!("apeglm prior scale {:.4} (prior variance {:.4})", scale, var);

    let prior = Prior {
        target,
        cauchy_scale_sq: scale * scale,
        normal_var: params.no_shrink_scale * params.no_shrink_scale,
    };

    let fits: Vec<GeneFit> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            if all_zero[i] || !dispersions[i].is_finite() || dispersions[i] <= 0.0 {
                return GeneFit::missing();
            }
            let obj = GeneObjective {
                y: counts.row(i),
                design,
                offsets: nf.row(i).iter().map(|v| v.ln()).collect(),
                size: 1.0 / dispersions[i],
                prior: &prior,
            };
            let start: Array1<f64> = coefficients.row(i).mapv(|b| if b.is_finite() { b } else { 0.0 });
            fit_gene(&obj, start, params)
        })
        .collect();

    let fsr: Vec<f64> = fits.iter().map(|f| f.fsr).collect();
    for (i, fit) in fits.iter().enumerate() {
        results.log2_fold_changes[i] = fit.map / ln2;
        results.lfc_se[i] = fit.sd / ln2;
    }
    results.svalues = Some(svalues(&fsr));
    results.description = format!("log2 fold change (MAP): {}", label);
    Ok(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;
    use crate::simulate::{make_example_dataset, ExampleParams};
    use crate::testing::{results, ResultsParams};
    use crate::{run_pipeline, PipelineParams};
    use ndarray::array;

    #[test]
    fn test_prior_var_recovers_spread() {
        // x ~ spread 1 around zero with tiny SEs: prior variance near mean(x^2)
        let mle: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let se = vec![0.01; 200];
        let v = prior_var(&mle, &se);
        assert!((v - 1.0).abs() < 1e-3, "prior variance {}", v);

        let noise_only = vec![0.0; 50];
        assert_eq!(prior_var(&noise_only, &vec![1.0; 50]), MIN_PRIOR_VAR);
    }

    #[test]
    fn test_svalues_running_mean() {
        let s = svalues(&[0.3, f64::NAN, 0.1, 0.2]);
        assert!((s[2] - 0.1).abs() < 1e-12);
        assert!((s[3] - 0.15).abs() < 1e-12);
        assert!((s[0] - 0.2).abs() < 1e-12);
        assert!(s[1].is_nan());
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let y = array![10.0, 14.0, 30.0, 41.0];
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let prior = Prior {
            target: 1,
            cauchy_scale_sq: 0.25,
            normal_var: 225.0,
        };
        let obj = GeneObjective {
            y: y.view(),
            design: &design,
            offsets: vec![0.0, 0.1, -0.1, 0.0],
            size: 5.0,
            prior: &prior,
        };
        let beta = array![2.5, 0.7];
        let (grad, hess) = obj.gradient_hessian(&beta);
        let h = 1e-6;
        for k in 0..2 {
            let mut up = beta.clone();
            let mut down = beta.clone();
            up[k] += h;
            down[k] -= h;
            let numeric = (obj.value(&up) - obj.value(&down)) / (2.0 * h);
            assert!((numeric - grad[k]).abs() < 1e-4, "coef {}: {} vs {}", k, numeric, grad[k]);
            let (gu, _) = obj.gradient_hessian(&up);
            let (gd, _) = obj.gradient_hessian(&down);
            for a in 0..2 {
                let numeric_h = (gu[a] - gd[a]) / (2.0 * h);
                assert!((numeric_h - hess[[a, k]]).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_apeglm_shrinks_and_requires_single_coefficient() {
        let mut dds = make_example_dataset(&ExampleParams {
            n_genes: 200,
            n_samples: 6,
            beta_sd: 0.5,
            seed: 11,
            ..Default::default()
        })
        .unwrap()
        .dds;
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();
        let mle = results(&dds, &Contrast::Coefficient("condition_B_vs_A".into()), &ResultsParams::default()).unwrap();

        let mut shrunk = mle.clone();
        shrink_lfc_apeglm(&dds, &mut shrunk, &ApeglmParams::default()).unwrap();
        let sv = shrunk.svalues.as_ref().unwrap();
        assert!(sv.iter().filter(|s| s.is_finite()).all(|&s| (0.0..=0.5).contains(&s)));
        let sum_abs = |v: &[f64]| v.iter().filter(|x| x.is_finite()).map(|x| x.abs()).sum::<f64>();
        assert!(sum_abs(&shrunk.log2_fold_changes) < sum_abs(&mle.log2_fold_changes));

        let mut reversed = mle.clone();
        reversed.contrast = Contrast::factor("condition", "A", "B");
        assert!(shrink_lfc_apeglm(&dds, &mut reversed, &ApeglmParams::default()).is_err());
    }
}
