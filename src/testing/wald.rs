//! Wald test for a contrast of GLM coefficients

use ndarray::Axis;

use super::pvalue::{calculate_pvalue, threshold_pvalue, threshold_stat};
use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};

/// Per-gene Wald statistics on the log2 scale
#[derive(Debug, Clone)]
pub struct WaldTest {
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
}

/// Test c'beta = 0 for every gene
///
/// The estimate is c'beta and its standard error sqrt(c' Sigma c), both
/// divided by ln 2. With `lfc_threshold > 0` the null becomes
/// |LFC| <= threshold ("greaterAbs").
pub fn wald_test(dds: &DeDataSet, contrast: &[f64], lfc_threshold: f64) -> Result<WaldTest> {
    let coefficients = dds.coefficients().ok_or_else(|| AnalysisError::InvalidContrast {
        reason: "the GLM must be fitted before testing".to_string(),
    })?;
    let covariances = dds.covariances().ok_or_else(|| AnalysisError::InvalidContrast {
        reason: "coefficient covariances are not available".to_string(),
    })?;
    if contrast.len() != coefficients.ncols() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("contrast over {} coefficients", coefficients.ncols()),
            actual: format!("{} values", contrast.len()),
        });
    }
    if lfc_threshold < 0.0 {
        return Err(AnalysisError::InvalidParameter {
            reason: format!("lfc_threshold must be non-negative, got {}", lfc_threshold),
        });
    }

    let ln2 = std::f64::consts::LN_2;
    let n = dds.n_genes();
    let mut out = WaldTest {
        log2_fold_changes: Vec::with_capacity(n),
        lfc_se: Vec::with_capacity(n),
        stat: Vec::with_capacity(n),
        pvalues: Vec::with_capacity(n),
    };

    for (beta, sigma) in coefficients.axis_iter(Axis(0)).zip(covariances.axis_iter(Axis(0))) {
        let estimate: f64 = beta.iter().zip(contrast).map(|(b, c)| b * c).sum::<f64>() / ln2;
        let mut var = 0.0;
        for (a, &ca) in contrast.iter().enumerate() {
            for (b, &cb) in contrast.iter().enumerate() {
                var += ca * sigma[[a, b]] * cb;
            }
        }
        let se = if var >= 0.0 { var.sqrt() / ln2 } else { f64::NAN };

        let (stat, pvalue) = if lfc_threshold > 0.0 {
            (
                threshold_stat(estimate, se, lfc_threshold),
                threshold_pvalue(estimate, se, lfc_threshold),
            )
        } else {
            let stat = estimate / se;
            (stat, calculate_pvalue(stat))
        };
        out.log2_fold_changes.push(estimate);
        out.lfc_se.push(se);
        out.stat.push(stat);
        out.pvalues.push(pvalue);
    }
    Ok(out)
}
