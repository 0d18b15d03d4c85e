//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::{calculate_pvalue, threshold_pvalue, threshold_stat};
pub use wald::{wald_test, WaldTest};

use serde::{Deserialize, Serialize};

use crate::data::DeDataSet;
use crate::error::Result;
use crate::filter::{default_cooks_cutoff, filter_by_cooks, independent_filtering};
use crate::glm::contrast_vector;
use crate::io::{Contrast, DeResults};

/// Options for building a results table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsParams {
    /// Target FDR for independent filtering and the summary
    pub alpha: f64,
    pub independent_filtering: bool,
    /// Flag genes with a Cook's outlier among replicated samples
    pub cooks_filter: bool,
    /// Cook's distance cutoff; the 0.99 quantile of F(p, m - p) when unset
    pub cooks_cutoff: Option<f64>,
    /// Test |LFC| > threshold instead of LFC != 0 (log2 scale)
    pub lfc_threshold: f64,
}

impl Default for ResultsParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            independent_filtering: true,
            cooks_filter: true,
            cooks_cutoff: None,
            lfc_threshold: 0.0,
        }
    }
}

/// Wald test results for one contrast with outlier and low-count filtering
pub fn results(dds: &DeDataSet, contrast: &Contrast, params: &ResultsParams) -> Result<DeResults> {
    let info = dds.design_info()?;
    let (vector, label) = contrast_vector(info, contrast)?;
    let wald = wald_test(dds, &vector, params.lfc_threshold)?;
    let (base_means, _) = dds.base_mean_var()?;

    let mut res = DeResults::new(dds.gene_ids().to_vec(), contrast.clone(), params.alpha);
    res.description = format!("log2 fold change (MLE): {}", label);
    res.base_means = base_means.to_vec();
    res.log2_fold_changes = wald.log2_fold_changes;
    res.lfc_se = wald.lfc_se;
    res.stat = wald.stat;
    res.pvalues = wald.pvalues;
    if let Some(d) = dds.dispersions() {
        res.dispersions = d.to_vec();
    }

    for (i, zero) in dds.all_zero().into_iter().enumerate() {
        if zero {
            res.log2_fold_changes[i] = f64::NAN;
            res.lfc_se[i] = f64::NAN;
            res.stat[i] = f64::NAN;
            res.pvalues[i] = f64::NAN;
        }
    }

    if params.cooks_filter {
        if let Some(cooks) = dds.cooks() {
            let design = dds.design_matrix()?;
            let cutoff = params
                .cooks_cutoff
                .unwrap_or_else(|| default_cooks_cutoff(design.nrows(), design.ncols()));
            let flagged = filter_by_cooks(
                &mut res,
                cooks,
                design,
                dds.counts().counts(),
                cutoff,
                info.is_two_level_single_factor(),
            );
            log::info!("{} genes flagged by Cook's distance (cutoff {:.3})", flagged, cutoff);
        }
    }

    if params.independent_filtering {
        if independent_filtering(&mut res, params.alpha).is_none() {
            res.padj = benjamini_hochberg(&res.pvalues);
        }
    } else {
        res.padj = benjamini_hochberg(&res.pvalues);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{make_example_dataset, ExampleParams};
    use crate::{run_pipeline, PipelineParams};

    fn fitted(beta_sd: f64) -> (DeDataSet, Vec<f64>) {
        let ex = make_example_dataset(&ExampleParams {
            n_genes: 300,
            n_samples: 8,
            beta_sd,
            seed: 7,
            ..Default::default()
        })
        .unwrap();
        let mut dds = ex.dds;
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();
        (dds, ex.true_log2_fold_changes)
    }

    #[test]
    fn test_results_recover_direction() {
        let (dds, truth) = fitted(2.0);
        let res = results(&dds, &Contrast::factor("condition", "B", "A"), &ResultsParams::default()).unwrap();
        assert!(res.description.ends_with("condition B vs A"));
        let sig = res.significant(0.1);
        assert!(sig.len() > 20, "only {} significant genes", sig.len());
        let agree = sig
            .iter()
            .filter(|&&i| res.log2_fold_changes[i].signum() == truth[i].signum())
            .count();
        assert!(agree as f64 >= 0.95 * sig.len() as f64, "{} of {} agree", agree, sig.len());
    }

    #[test]
    fn test_reversed_contrast_flips_sign() {
        let (dds, _) = fitted(1.0);
        let params = ResultsParams::default();
        let fwd = results(&dds, &Contrast::factor("condition", "B", "A"), &params).unwrap();
        let rev = results(&dds, &Contrast::factor("condition", "A", "B"), &params).unwrap();
        for i in 0..fwd.n_genes() {
            if fwd.log2_fold_changes[i].is_finite() {
                assert!((fwd.log2_fold_changes[i] + rev.log2_fold_changes[i]).abs() < 1e-12);
                assert!((fwd.pvalues[i] - rev.pvalues[i]).abs() < 1e-12 || fwd.pvalues[i].is_nan());
            }
        }
    }

    #[test]
    fn test_threshold_and_filter_options() {
        let (dds, _) = fitted(1.0);
        let contrast = Contrast::Coefficient("condition_B_vs_A".into());
        let plain = results(
            &dds,
            &contrast,
            &ResultsParams {
                independent_filtering: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(plain.filter_threshold.is_none());
        assert_eq!(plain.padj.iter().filter(|p| p.is_nan()).count(), plain.pvalues.iter().filter(|p| p.is_nan()).count());

        let shifted = results(
            &dds,
            &contrast,
            &ResultsParams {
                independent_filtering: false,
                lfc_threshold: 1.0,
                ..Default::default()
            },
        )
        .unwrap();
        for i in 0..plain.n_genes() {
            if plain.pvalues[i].is_finite() && shifted.pvalues[i].is_finite() {
                assert!(shifted.pvalues[i] >= plain.pvalues[i] - 1e-12);
            }
        }
    }
}
