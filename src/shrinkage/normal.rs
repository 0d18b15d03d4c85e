//! Normal prior LFC shrinkage
//!
//! 1. Estimate a prior variance per coefficient by matching a weighted
//!    upper quantile of the MLE log2 fold changes.
//! 2. Refit the GLM with ridge penalty `1 / prior_var` on those coefficients.
//! 3. Report the contrast of the shrunken coefficients. The Wald statistic
//!    and p-values stay those of the MLE.

use ndarray::Axis;

use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::{contrast_vector, fit_glm_matrix, GlmFitParams};
use crate::io::DeResults;
use crate::stats::match_weighted_upper_quantile_for_variance;

/// Upper quantile of |LFC| matched by the prior
pub const BETA_PRIOR_UPPER_QUANTILE: f64 = 0.05;
/// Prior variance that leaves a coefficient effectively unpenalized
const WIDE_PRIOR_VAR: f64 = 1e6;

/// Prior variance of each coefficient on the log2 scale
///
/// Genes with zero baseMean and |beta| >= 10 are ignored. Each remaining
/// gene is weighted by `1 / (1 / baseMean + trended dispersion)`. The
/// intercept gets a wide prior.
pub fn estimate_beta_prior_var(dds: &DeDataSet) -> Result<Vec<f64>> {
    let coefficients = dds.coefficients().ok_or_else(|| AnalysisError::InvalidParameter {
        reason: "the GLM must be fitted before shrinkage".to_string(),
    })?;
    let trended = dds.trended_dispersions().ok_or_else(|| AnalysisError::DispersionError {
        reason: "trended dispersions are required for normal shrinkage".to_string(),
    })?;
    let info = dds.design_info()?;
    let (base_means, _) = dds.base_mean_var()?;
    let log2_e = std::f64::consts::LOG2_E;

    let nonzero: Vec<usize> = (0..dds.n_genes()).filter(|&i| base_means[i] > 0.0).collect();
    if nonzero.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: "every gene has zero counts".to_string(),
        });
    }

    let prior_var = info
        .coef_names
        .iter()
        .enumerate()
        .map(|(k, name)| {
            if name == "Intercept" {
                return WIDE_PRIOR_VAR;
            }
            let (betas, weights): (Vec<f64>, Vec<f64>) = nonzero
                .iter()
                .map(|&i| (coefficients[[i, k]] * log2_e, 1.0 / (1.0 / base_means[i] + trended[i])))
                .filter(|(b, w)| b.is_finite() && b.abs() < 10.0 && w.is_finite())
                .unzip();
            if betas.is_empty() {
                WIDE_PRIOR_VAR
            } else {
                match_weighted_upper_quantile_for_variance(&betas, &weights, BETA_PRIOR_UPPER_QUANTILE)
            }
        })
        .collect();
    Ok(prior_var)
}

/// Replace the LFC and its SE with the contrast of a refit under a normal prior
pub fn shrink_lfc_normal(dds: &DeDataSet, results: &mut DeResults) -> Result<Vec<f64>> {
    let prior_var = estimate_beta_prior_var(dds)?;
    let ln2_sq = std::f64::consts::LN_2.powi(2);
    let lambda: Vec<f64> = prior_var.iter().map(|v| 1.0 / v / ln2_sq).collect();
    log::info!(
        "normal prior variances: {}",
        prior_var.iter().map(|v| format!("{:.4}", v)).collect::<Vec<_>>().join(", ")
    );

    let dispersions = dds
        .dispersions()
        .ok_or_else(|| AnalysisError::DispersionError {
            reason: "dispersions must be estimated before shrinkage".to_string(),
        })?
        .to_vec();
    let design = dds.design_matrix()?;
    let nf = dds.normalization_matrix()?;
    let fits = fit_glm_matrix(
        dds.counts().counts(),
        &nf,
        design,
        &dispersions,
        &lambda,
        &GlmFitParams::default(),
    )?;

    let (contrast, label) = contrast_vector(dds.design_info()?, &results.contrast)?;
    let ln2 = std::f64::consts::LN_2;
    for i in 0..results.n_genes() {
        let beta = fits.coefficients.row(i);
        let sigma = fits.covariances.index_axis(Axis(0), i);
        let estimate: f64 = beta.iter().zip(&contrast).map(|(b, c)| b * c).sum();
        let mut var = 0.0;
        for (a, &ca) in contrast.iter().enumerate() {
            for (b, &cb) in contrast.iter().enumerate() {
                var += ca * sigma[[a, b]] * cb;
            }
        }
        results.log2_fold_changes[i] = estimate / ln2;
        results.lfc_se[i] = if var >= 0.0 { var.sqrt() / ln2 } else { f64::NAN };
    }
    results.description = format!("log2 fold change (MAP): {}", label);
    Ok(prior_var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;
    use crate::simulate::{make_example_dataset, ExampleParams};
    use crate::testing::{results, ResultsParams};
    use crate::{run_pipeline, PipelineParams};

    #[test]
    fn test_normal_shrinkage_pulls_toward_zero() {
        let mut dds = make_example_dataset(&ExampleParams {
            n_genes: 300,
            n_samples: 6,
            beta_sd: 0.5,
            seed: 3,
            ..Default::default()
        })
        .unwrap()
        .dds;
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();
        let mle = results(&dds, &Contrast::factor("condition", "B", "A"), &ResultsParams::default()).unwrap();
        let mut shrunk = mle.clone();
        let prior_var = shrink_lfc_normal(&dds, &mut shrunk).unwrap();

        assert_eq!(prior_var[0], WIDE_PRIOR_VAR);
        assert!(prior_var[1] > 0.0 && prior_var[1] < 100.0);
        assert!(shrunk.description.starts_with("log2 fold change (MAP)"));

        let sum_abs = |v: &[f64]| v.iter().filter(|x| x.is_finite()).map(|x| x.abs()).sum::<f64>();
        assert!(sum_abs(&shrunk.log2_fold_changes) < sum_abs(&mle.log2_fold_changes));
        assert_eq!(shrunk.pvalues.len(), mle.pvalues.len());
        for i in 0..mle.n_genes() {
            assert!(shrunk.pvalues[i] == mle.pvalues[i] || mle.pvalues[i].is_nan());
        }
    }
}
