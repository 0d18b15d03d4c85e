//! Count transformations for visualization and PCA

mod vst;

pub use vst::{vst, vst_mean, vst_parametric, VstParams};

use std::path::Path;

use ndarray::Array2;

use crate::data::DeDataSet;
use crate::error::Result;
use crate::io::write_matrix;

/// Transformed gene x sample values with their labels
#[derive(Debug, Clone)]
pub struct TransformedData {
    pub data: Array2<f64>,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Transformation that produced the values
    pub description: String,
}

impl TransformedData {
    pub fn n_genes(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_matrix(path, "gene_id", &self.gene_ids, &self.sample_ids, &self.data)
    }
}

/// log2(normalized count + 1)
pub fn norm_transform(dds: &DeDataSet) -> Result<TransformedData> {
    let data = dds.normalized_counts()?.mapv(|v| (v + 1.0).log2());
    Ok(TransformedData {
        data,
        gene_ids: dds.gene_ids().to_vec(),
        sample_ids: dds.sample_ids().to_vec(),
        description: "log2(normalized + 1)".to_string(),
    })
}
