//! Simulated negative binomial count data
//!
//! Genes get a log2 intercept drawn from N(intercept_mean, intercept_sd) and
//! a condition effect from N(0, beta_sd). Dispersion follows the mean as
//! `4 / mean + 0.1`. Samples are split into conditions A and B, and the
//! dataset carries the design `~ condition`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::{CountMatrix, DeDataSet, SampleTable};
use crate::error::{AnalysisError, Result};
use crate::glm::DesignFormula;
use crate::rng::MersenneTwister;

/// Settings for a simulated dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExampleParams {
    pub n_genes: usize,
    pub n_samples: usize,
    /// Standard deviation of the log2 fold change between conditions
    pub beta_sd: f64,
    pub intercept_mean: f64,
    pub intercept_sd: f64,
    /// Per-sample scaling; all ones when absent
    pub size_factors: Option<Vec<f64>>,
    pub seed: u32,
}

impl Default for ExampleParams {
    fn default() -> Self {
        Self {
            n_genes: 1000,
            n_samples: 12,
            beta_sd: 0.0,
            intercept_mean: 4.0,
            intercept_sd: 2.0,
            size_factors: None,
            seed: 1,
        }
    }
}

/// A simulated dataset and the parameters it was drawn from
pub struct ExampleDataSet {
    pub dds: DeDataSet,
    /// True log2 fold change of B over A per gene
    pub true_log2_fold_changes: Vec<f64>,
    pub true_dispersions: Vec<f64>,
}

/// Mean-dispersion relation used for simulation
pub fn example_dispersion(mean: f64) -> f64 {
    4.0 / mean + 0.1
}

/// Draw a dataset with a two-level `condition` factor
pub fn make_example_dataset(params: &ExampleParams) -> Result<ExampleDataSet> {
    let (n, m) = (params.n_genes, params.n_samples);
    if n == 0 || m < 2 {
        return Err(AnalysisError::InvalidParameter {
            reason: format!("need at least one gene and two samples, got {} x {}", n, m),
        });
    }
    let size_factors = match &params.size_factors {
        Some(sf) if sf.len() != m => {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} size factors", m),
                actual: sf.len().to_string(),
            })
        }
        Some(sf) => sf.clone(),
        None => vec![1.0; m],
    };

    let n_a = m.div_ceil(2);
    let conditions: Vec<String> = (0..m).map(|j| if j < n_a { "A" } else { "B" }.to_string()).collect();

    let mut rng = MersenneTwister::new(params.seed);
    let intercepts: Vec<f64> = (0..n)
        .map(|_| params.intercept_mean + params.intercept_sd * rng.rnorm())
        .collect();
    let betas: Vec<f64> = (0..n).map(|_| params.beta_sd * rng.rnorm()).collect();
    let dispersions: Vec<f64> = intercepts.iter().map(|&b0| example_dispersion(b0.exp2())).collect();

    let mut counts = Array2::zeros((n, m));
    for i in 0..n {
        for j in 0..m {
            let effect = if j < n_a { 0.0 } else { betas[i] };
            let mu = (intercepts[i] + effect).exp2() * size_factors[j];
            counts[[i, j]] = rng.rnbinom(mu, dispersions[i]);
        }
    }

    let gene_ids: Vec<String> = (1..=n).map(|i| format!("gene{}", i)).collect();
    let sample_ids: Vec<String> = (1..=m).map(|j| format!("sample{}", j)).collect();
    let mut samples = SampleTable::new(sample_ids.clone())?;
    samples.add_column("condition", conditions)?;

    let mut dds = DeDataSet::new(CountMatrix::new(counts, gene_ids, sample_ids)?, samples)?;
    dds.set_design(DesignFormula::parse("~ condition")?, &[])?;
    log::debug!("simulated {} genes x {} samples (seed {})", n, m, params.seed);

    Ok(ExampleDataSet {
        dds,
        true_log2_fold_changes: betas,
        true_dispersions: dispersions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_design() {
        let ex = make_example_dataset(&ExampleParams {
            n_genes: 50,
            n_samples: 7,
            ..Default::default()
        })
        .unwrap();
        assert_eq!((ex.dds.n_genes(), ex.dds.n_samples()), (50, 7));
        assert_eq!(ex.dds.results_names(), vec!["Intercept".to_string(), "condition_B_vs_A".into()]);
        let a = ex.dds.samples().samples_with_level("condition", "A");
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_seed_reproducible() {
        let params = ExampleParams {
            n_genes: 20,
            beta_sd: 1.0,
            ..Default::default()
        };
        let a = make_example_dataset(&params).unwrap();
        let b = make_example_dataset(&params).unwrap();
        assert_eq!(a.dds.counts().counts(), b.dds.counts().counts());
        assert_eq!(a.true_log2_fold_changes, b.true_log2_fold_changes);
    }

    #[test]
    fn test_rejects_bad_size_factors() {
        let params = ExampleParams {
            size_factors: Some(vec![1.0, 2.0]),
            ..Default::default()
        };
        assert!(make_example_dataset(&params).is_err());
    }
}
