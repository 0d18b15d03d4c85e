//! Gene x sample count matrix

use ndarray::{Array2, ArrayView2, Axis};

use super::gene_ids::make_unique;
use crate::error::{AnalysisError, Result};

/// Read counts with rows as genes and columns as samples
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a count matrix, validating dimensions and values
    ///
    /// Duplicate gene IDs are disambiguated with R `make.unique` suffixes.
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                actual: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                actual: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: "counts must be non-negative finite values".to_string(),
            });
        }
        if counts.iter().any(|&x| x != x.round()) {
            log::warn!("some counts are not integers; the negative binomial model expects integer counts");
        }

        let unique = make_unique(&gene_ids);
        let renamed = gene_ids.iter().zip(&unique).filter(|(a, b)| a != b).count();
        if renamed > 0 {
            log::warn!("{} duplicate gene IDs were suffixed to make them unique", renamed);
        }

        Ok(Self {
            counts,
            gene_ids: unique,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Replace gene IDs, e.g. after version truncation
    pub fn set_gene_ids(&mut self, gene_ids: Vec<String>) -> Result<()> {
        if gene_ids.len() != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} gene IDs", self.n_genes()),
                actual: format!("{} gene IDs", gene_ids.len()),
            });
        }
        self.gene_ids = make_unique(&gene_ids);
        Ok(())
    }

    /// Total count per gene
    pub fn row_sums(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    /// Library size per sample
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Genes whose total count across samples reaches `min_total`
    pub fn genes_with_min_total(&self, min_total: f64) -> Vec<usize> {
        self.row_sums()
            .iter()
            .enumerate()
            .filter(|(_, &s)| s >= min_total)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        if gene_indices.is_empty() {
            return Err(AnalysisError::EmptyData {
                reason: "no genes left after subsetting".to_string(),
            });
        }
        Ok(Self {
            counts: self.counts.select(Axis(0), gene_indices),
            gene_ids: gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
        })
    }

    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        if sample_indices.is_empty() {
            return Err(AnalysisError::EmptyData {
                reason: "no samples left after subsetting".to_string(),
            });
        }
        Ok(Self {
            counts: self.counts.select(Axis(1), sample_indices),
            gene_ids: self.gene_ids.clone(),
            sample_ids: sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect(),
        })
    }

    /// Reorder or subset columns to the given sample IDs
    pub fn select_samples(&self, ids: &[String]) -> Result<Self> {
        let indices = ids
            .iter()
            .map(|id| {
                self.sample_ids.iter().position(|s| s == id).ok_or_else(|| {
                    AnalysisError::InvalidMetadata {
                        reason: format!("sample '{}' is not a column of the count matrix", id),
                    }
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        self.subset_samples(&indices)
    }
}
