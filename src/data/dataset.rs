//! DeDataSet - counts, sample table, design and every fitted quantity

use ndarray::{Array1, Array2, Array3, Axis};

use super::{truncate_gene_ids, CountMatrix, SampleTable};
use crate::dispersion::DispersionTrend;
use crate::error::{AnalysisError, Result};
use crate::glm::{create_design_matrix, DesignFormula, DesignInfo};
use crate::tximport::{CountsFromAbundance, TxImport};

/// Main data structure for the analysis
///
/// Sample order is shared by the count matrix, the sample table, the
/// optional average transcript length matrix and every per-sample fit.
#[derive(Debug, Clone)]
pub struct DeDataSet {
    counts: CountMatrix,
    samples: SampleTable,

    /// Average transcript length per gene and sample (from tximport)
    avg_tx_length: Option<Array2<f64>>,

    // Design
    formula: Option<DesignFormula>,
    numeric_variables: Vec<String>,
    design_matrix: Option<Array2<f64>>,
    design_info: Option<DesignInfo>,

    // Normalization
    size_factors: Option<Array1<f64>>,
    /// Gene x sample factors; used instead of size factors when present
    normalization_factors: Option<Array2<f64>>,
    normalized_counts: Option<Array2<f64>>,

    // Dispersion
    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    /// Final (MAP) dispersions
    dispersions: Option<Array1<f64>>,
    dispersion_trend: Option<DispersionTrend>,
    dispersion_prior_var: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,

    // GLM
    /// Fitted means (genes x samples)
    mu: Option<Array2<f64>>,
    /// Coefficients on the natural log scale (genes x coefs)
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    covariances: Option<Array3<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
    deviance: Option<Array1<f64>>,
    cooks: Option<Array2<f64>>,
}

impl DeDataSet {
    /// Create a dataset from counts and sample metadata
    ///
    /// The sample table is reordered to the count matrix columns when the
    /// two list the same samples in a different order.
    pub fn new(counts: CountMatrix, samples: SampleTable) -> Result<Self> {
        let samples = align_samples(counts.sample_ids(), samples)?;
        Ok(Self {
            counts,
            samples,
            avg_tx_length: None,
            formula: None,
            numeric_variables: Vec::new(),
            design_matrix: None,
            design_info: None,
            size_factors: None,
            normalization_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            dispersions: None,
            dispersion_trend: None,
            dispersion_prior_var: None,
            dispersion_outliers: None,
            mu: None,
            coefficients: None,
            standard_errors: None,
            covariances: None,
            hat_diagonals: None,
            converged: None,
            deviance: None,
            cooks: None,
        })
    }

    /// Build a dataset from a gene-level tximport result
    ///
    /// Counts are rounded. Average transcript lengths are attached as
    /// offsets only when counts were not regenerated from abundance.
    pub fn from_tximport(txi: &TxImport, samples: SampleTable) -> Result<Self> {
        let counts = CountMatrix::new(
            txi.counts.mapv(f64::round),
            txi.feature_ids.clone(),
            txi.sample_ids.clone(),
        )?;
        let mut dds = Self::new(counts, samples)?;

        if txi.counts_from_abundance == CountsFromAbundance::No {
            if txi.length.iter().any(|&l| !(l > 0.0) || !l.is_finite()) {
                return Err(AnalysisError::InvalidQuantification {
                    path: "tximport lengths".to_string(),
                    reason: "all average transcript lengths must be positive".to_string(),
                });
            }
            log::info!("using counts and average transcript lengths from tximport");
            dds.avg_tx_length = Some(txi.length.clone());
        } else {
            log::info!(
                "using counts regenerated from abundance ({:?}); lengths are not used as offsets",
                txi.counts_from_abundance
            );
        }
        Ok(dds)
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    /// Mutable sample table, for releveling; clears the design
    pub fn samples_mut(&mut self) -> &mut SampleTable {
        self.clear_design();
        &mut self.samples
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn gene_ids(&self) -> &[String] {
        self.counts.gene_ids()
    }

    pub fn sample_ids(&self) -> &[String] {
        self.counts.sample_ids()
    }

    pub fn avg_tx_length(&self) -> Option<&Array2<f64>> {
        self.avg_tx_length.as_ref()
    }

    // ----- design -----

    /// Attach a design formula and build its model matrix
    pub fn set_design(&mut self, formula: DesignFormula, numeric_variables: &[String]) -> Result<()> {
        let (matrix, info) = create_design_matrix(&self.samples, &formula, numeric_variables)?;
        log::info!("design {} with coefficients: {}", formula, info.coef_names.join(", "));
        self.clear_fit();
        self.formula = Some(formula);
        self.numeric_variables = numeric_variables.to_vec();
        self.design_matrix = Some(matrix);
        self.design_info = Some(info);
        Ok(())
    }

    fn clear_design(&mut self) {
        self.formula = None;
        self.design_matrix = None;
        self.design_info = None;
        self.clear_fit();
    }

    pub fn formula(&self) -> Option<&DesignFormula> {
        self.formula.as_ref()
    }

    pub fn numeric_variables(&self) -> &[String] {
        &self.numeric_variables
    }

    pub fn design_matrix(&self) -> Result<&Array2<f64>> {
        self.design_matrix.as_ref().ok_or_else(|| AnalysisError::InvalidDesign {
            reason: "no design has been set".to_string(),
        })
    }

    pub fn design_info(&self) -> Result<&DesignInfo> {
        self.design_info.as_ref().ok_or_else(|| AnalysisError::InvalidDesign {
            reason: "no design has been set".to_string(),
        })
    }

    /// Coefficient names of the current design (R `resultsNames`)
    pub fn results_names(&self) -> Vec<String> {
        self.design_info
            .as_ref()
            .map(|i| i.coef_names.clone())
            .unwrap_or_default()
    }

    // ----- gene and sample subsetting -----

    /// Strip versions from gene IDs and disambiguate collisions
    pub fn truncate_gene_versions(&mut self) -> Result<()> {
        let ids = truncate_gene_ids(self.counts.gene_ids());
        self.counts.set_gene_ids(ids)
    }

    /// Keep the given genes; fitted quantities are discarded
    pub fn filter_genes(&mut self, keep: &[usize]) -> Result<()> {
        self.counts = self.counts.subset_genes(keep)?;
        self.avg_tx_length = self.avg_tx_length.as_ref().map(|m| m.select(Axis(0), keep));
        self.normalization_factors = self.normalization_factors.as_ref().map(|m| m.select(Axis(0), keep));
        self.clear_fit();
        self.refresh_normalized_counts();
        Ok(())
    }

    /// Keep genes with a total count of at least `min_total`
    pub fn filter_min_total(&mut self, min_total: f64) -> Result<usize> {
        let keep = self.counts.genes_with_min_total(min_total);
        let removed = self.n_genes() - keep.len();
        self.filter_genes(&keep)?;
        log::info!("pre-filter: kept {} genes with total count >= {} ({} removed)", keep.len(), min_total, removed);
        Ok(removed)
    }

    /// A new dataset restricted to (and ordered by) the given samples
    ///
    /// Normalization and fits are not carried over; unused factor levels are dropped.
    pub fn select_samples(&self, ids: &[String]) -> Result<Self> {
        let counts = self.counts.select_samples(ids)?;
        let samples = self.samples.select_samples(ids)?;
        let idx: Vec<usize> = ids
            .iter()
            .filter_map(|id| self.sample_ids().iter().position(|s| s == id))
            .collect();
        let mut out = Self::new(counts, samples)?;
        out.avg_tx_length = self.avg_tx_length.as_ref().map(|m| m.select(Axis(1), &idx));
        Ok(out)
    }

    fn clear_fit(&mut self) {
        self.gene_dispersions = None;
        self.trended_dispersions = None;
        self.dispersions = None;
        self.dispersion_trend = None;
        self.dispersion_prior_var = None;
        self.dispersion_outliers = None;
        self.mu = None;
        self.coefficients = None;
        self.standard_errors = None;
        self.covariances = None;
        self.hat_diagonals = None;
        self.converged = None;
        self.deviance = None;
        self.cooks = None;
    }

    // ----- normalization -----

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalization_factors(&self) -> Option<&Array2<f64>> {
        self.normalization_factors.as_ref()
    }

    pub fn has_normalization(&self) -> bool {
        self.size_factors.is_some() || self.normalization_factors.is_some()
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                actual: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(AnalysisError::SizeFactorError {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        self.refresh_normalized_counts();
        Ok(())
    }

    /// Set gene x sample normalization factors, centered to a row geometric mean of 1
    pub fn set_normalization_factors(&mut self, mut nf: Array2<f64>) -> Result<()> {
        if nf.dim() != (self.n_genes(), self.n_samples()) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} x {} normalization factors", self.n_genes(), self.n_samples()),
                actual: format!("{} x {}", nf.nrows(), nf.ncols()),
            });
        }
        if nf.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(AnalysisError::SizeFactorError {
                reason: "normalization factors must be positive finite values".to_string(),
            });
        }
        for mut row in nf.rows_mut() {
            let center = (row.iter().map(|x| x.ln()).sum::<f64>() / row.len() as f64).exp();
            row.mapv_inplace(|x| x / center);
        }
        self.normalization_factors = Some(nf);
        self.refresh_normalized_counts();
        Ok(())
    }

    fn refresh_normalized_counts(&mut self) {
        let raw = self.counts.counts();
        self.normalized_counts = if let Some(nf) = &self.normalization_factors {
            Some(&raw / nf)
        } else {
            self.size_factors.as_ref().map(|sf| {
                let mut n = raw.to_owned();
                for (mut col, &s) in n.columns_mut().into_iter().zip(sf.iter()) {
                    col.mapv_inplace(|v| v / s);
                }
                n
            })
        };
    }

    /// Counts divided by normalization factors (or size factors)
    pub fn normalized_counts(&self) -> Result<&Array2<f64>> {
        self.normalized_counts.as_ref().ok_or_else(|| AnalysisError::SizeFactorError {
            reason: "size factors have not been estimated".to_string(),
        })
    }

    /// Per gene and sample normalization offset (nf, or sf broadcast over genes)
    pub fn normalization_matrix(&self) -> Result<Array2<f64>> {
        if let Some(nf) = &self.normalization_factors {
            return Ok(nf.clone());
        }
        let sf = self.size_factors.as_ref().ok_or_else(|| AnalysisError::SizeFactorError {
            reason: "size factors have not been estimated".to_string(),
        })?;
        let mut m = Array2::zeros((self.n_genes(), self.n_samples()));
        for mut row in m.rows_mut() {
            row.assign(sf);
        }
        Ok(m)
    }

    /// Mean of 1/s over samples, where s is the per-sample normalization scale
    pub fn xim(&self) -> Result<f64> {
        let scales: Vec<f64> = match (&self.normalization_factors, &self.size_factors) {
            (Some(nf), _) => nf.axis_iter(Axis(1)).map(|c| c.mean().unwrap_or(1.0)).collect(),
            (None, Some(sf)) => sf.to_vec(),
            (None, None) => {
                return Err(AnalysisError::SizeFactorError {
                    reason: "size factors have not been estimated".to_string(),
                })
            }
        };
        Ok(scales.iter().map(|s| 1.0 / s).sum::<f64>() / scales.len() as f64)
    }

    /// Mean and variance of normalized counts per gene
    pub fn base_mean_var(&self) -> Result<(Array1<f64>, Array1<f64>)> {
        let norm = self.normalized_counts()?;
        let means = norm.map_axis(Axis(1), |r| r.mean().unwrap_or(0.0));
        let vars = norm.map_axis(Axis(1), |r| {
            let n = r.len() as f64;
            let m = r.mean().unwrap_or(0.0);
            if n > 1.0 {
                r.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.0)
            } else {
                0.0
            }
        });
        Ok((means, vars))
    }

    /// Genes with zero counts in every sample
    pub fn all_zero(&self) -> Vec<bool> {
        self.counts.row_sums().iter().map(|&s| s == 0.0).collect()
    }

    // ----- dispersion -----

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    /// Final dispersions used by the GLM
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.dispersions.as_ref()
    }

    pub fn dispersion_trend(&self) -> Option<&DispersionTrend> {
        self.dispersion_trend.as_ref()
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    fn check_gene_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                actual: format!("{}", len),
            });
        }
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, d: Array1<f64>) -> Result<()> {
        self.check_gene_len(d.len(), "gene-wise dispersions")?;
        self.gene_dispersions = Some(d);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, d: Array1<f64>, trend: DispersionTrend) -> Result<()> {
        self.check_gene_len(d.len(), "trended dispersions")?;
        self.trended_dispersions = Some(d);
        self.dispersion_trend = Some(trend);
        Ok(())
    }

    pub fn set_dispersions(&mut self, d: Array1<f64>, outliers: Vec<bool>, prior_var: f64) -> Result<()> {
        self.check_gene_len(d.len(), "dispersions")?;
        self.check_gene_len(outliers.len(), "outlier flags")?;
        self.dispersions = Some(d);
        self.dispersion_outliers = Some(outliers);
        self.dispersion_prior_var = Some(prior_var);
        Ok(())
    }

    // ----- GLM -----

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        if mu.dim() != (self.n_genes(), self.n_samples()) {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} x {} fitted means", self.n_genes(), self.n_samples()),
                actual: format!("{} x {}", mu.nrows(), mu.ncols()),
            });
        }
        self.mu = Some(mu);
        Ok(())
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn covariances(&self) -> Option<&Array3<f64>> {
        self.covariances.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    pub fn deviance(&self) -> Option<&Array1<f64>> {
        self.deviance.as_ref()
    }

    pub fn has_glm_fit(&self) -> bool {
        self.coefficients.is_some()
    }

    /// Store a GLM fit; all matrices are gene-major
    #[allow(clippy::too_many_arguments)]
    pub fn set_glm_fit(
        &mut self,
        coefficients: Array2<f64>,
        standard_errors: Array2<f64>,
        covariances: Array3<f64>,
        hat_diagonals: Array2<f64>,
        mu: Array2<f64>,
        converged: Vec<bool>,
        deviance: Array1<f64>,
    ) -> Result<()> {
        self.check_gene_len(coefficients.nrows(), "coefficient rows")?;
        self.check_gene_len(converged.len(), "convergence flags")?;
        self.set_mu(mu)?;
        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        self.covariances = Some(covariances);
        self.hat_diagonals = Some(hat_diagonals);
        self.converged = Some(converged);
        self.deviance = Some(deviance);
        Ok(())
    }

    pub fn cooks(&self) -> Option<&Array2<f64>> {
        self.cooks.as_ref()
    }

    pub fn set_cooks(&mut self, cooks: Array2<f64>) -> Result<()> {
        self.check_gene_len(cooks.nrows(), "Cook's distance rows")?;
        self.cooks = Some(cooks);
        Ok(())
    }
}

/// Reorder the sample table to `ids`, which must name the same samples
fn align_samples(ids: &[String], samples: SampleTable) -> Result<SampleTable> {
    if samples.sample_ids() == ids {
        return Ok(samples);
    }
    let mut a: Vec<&String> = ids.iter().collect();
    let mut b: Vec<&String> = samples.sample_ids().iter().collect();
    a.sort();
    b.sort();
    if a != b {
        let missing: Vec<&str> = ids
            .iter()
            .filter(|id| !samples.sample_ids().contains(id))
            .map(|s| s.as_str())
            .collect();
        let extra: Vec<&str> = samples
            .sample_ids()
            .iter()
            .filter(|id| !ids.contains(id))
            .map(|s| s.as_str())
            .collect();
        return Err(AnalysisError::InvalidMetadata {
            reason: format!(
                "sample IDs of the counts and the sample table differ (missing from table: [{}]; \
                 not in counts: [{}])",
                missing.join(", "),
                extra.join(", ")
            ),
        });
    }
    log::info!("reordering the sample table to match the count matrix columns");
    samples.select_samples(ids)
}
