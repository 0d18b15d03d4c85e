//! rnaseq_de: RNA-seq differential expression from transcript quantifications
//!
//! Imports per-sample transcript abundances (Salmon, kallisto, RSEM),
//! summarizes them to genes, and tests for differential expression with a
//! negative binomial GLM: median-of-ratios normalization, empirical Bayes
//! dispersion shrinkage, Wald tests with Cook's outlier and independent
//! filtering, fold change shrinkage, variance stabilization and PCA.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_de::prelude::*;
//!
//! let samples = read_sample_table("samples.tsv", Some("run"))?;
//! let counts = read_count_matrix("counts.tsv")?;
//! let mut dds = DeDataSet::new(counts, samples)?;
//! dds.set_design(DesignFormula::parse("~ treatment")?, &[])?;
//!
//! run_pipeline(&mut dds, &PipelineParams::default())?;
//! let res = results(&dds, &Contrast::factor("treatment", "drug", "vehicle"), &ResultsParams::default())?;
//! println!("{}", res.summary(0.1));
//! ```

pub mod cli;
pub mod compare;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod linalg;
pub mod normalization;
pub mod pca;
pub mod plots;
pub mod rng;
pub mod session;
pub mod shrinkage;
pub mod simulate;
pub mod stats;
pub mod testing;
pub mod transform;
pub mod tximport;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{CountMatrix, DeDataSet, SampleTable};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::glm::{fit_glm, DesignFormula, DesignInfo, GlmFitParams};
    pub use crate::io::{read_count_matrix, read_sample_table, write_results, Contrast, DeResults};
    pub use crate::normalization::{estimate_size_factors, fpm, SizeFactorMethod};
    pub use crate::pca::{pca, PcaParams, PcaResult};
    pub use crate::shrinkage::{lfc_shrink, ShrinkageType};
    pub use crate::testing::{results, ResultsParams};
    pub use crate::transform::{norm_transform, vst, VstParams};
    pub use crate::tximport::{import_quantifications, TxImport, TximportOptions};
    pub use crate::{run_pipeline, PipelineParams};
}

use prelude::*;

/// Settings for the size factor, dispersion and GLM steps
#[derive(Debug, Clone, Default)]
pub struct PipelineParams {
    pub size_factor_method: SizeFactorMethod,
    pub fit_type: TrendFitMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

/// Estimate size factors (unless already present), dispersions, the GLM and
/// Cook's distances
pub fn run_pipeline(dds: &mut DeDataSet, params: &PipelineParams) -> Result<()> {
    if dds.counts().n_genes() == 0 {
        return Err(AnalysisError::EmptyData {
            reason: "no genes left to analyse".to_string(),
        });
    }
    if !dds.has_normalization() {
        estimate_size_factors(dds, params.size_factor_method)?;
    } else {
        log::info!("using pre-existing normalization factors");
    }

    log::info!("estimating dispersions");
    estimate_dispersions(dds, params.fit_type, &params.dispersion)?;

    log::info!("fitting model and testing");
    fit_glm(dds, &params.glm)?;
    filter::compute_cooks(dds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{make_example_dataset, ExampleParams};

    #[test]
    fn test_pipeline_stores_every_stage() {
        let mut dds = make_example_dataset(&ExampleParams {
            n_genes: 200,
            n_samples: 6,
            ..Default::default()
        })
        .unwrap()
        .dds;
        run_pipeline(&mut dds, &PipelineParams::default()).unwrap();
        assert!(dds.size_factors().is_some());
        assert!(dds.dispersions().is_some());
        assert!(dds.has_glm_fit());
        assert_eq!(dds.cooks().unwrap().dim(), (200, 6));
    }

    #[test]
    fn test_pipeline_requires_design() {
        let ex = make_example_dataset(&ExampleParams {
            n_genes: 20,
            ..Default::default()
        })
        .unwrap();
        let counts = ex.dds.counts().clone();
        let samples = ex.dds.samples().clone();
        let mut bare = DeDataSet::new(counts, samples).unwrap();
        assert!(run_pipeline(&mut bare, &PipelineParams::default()).is_err());
    }
}
