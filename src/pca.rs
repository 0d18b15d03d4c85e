//! Principal component analysis of transformed counts

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::SampleTable;
use crate::error::{AnalysisError, Result};
use crate::linalg::symmetric_eigen;
use crate::transform::TransformedData;

/// Options for `pca`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaParams {
    /// Number of most variable genes to keep
    pub ntop: usize,
    /// Sample table columns that define the groups
    pub intgroup: Vec<String>,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            ntop: 500,
            intgroup: vec!["condition".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Samples x components
    pub scores: Array2<f64>,
    /// Fraction of the total variance per component
    pub percent_var: Vec<f64>,
    pub sample_ids: Vec<String>,
    /// Group label per sample
    pub groups: Vec<String>,
    /// Groups in legend order
    pub group_order: Vec<String>,
    pub n_genes_used: usize,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }

    pub fn component(&self, k: usize) -> Vec<f64> {
        self.scores.column(k).to_vec()
    }
}

/// Row variances of a gene x sample matrix
fn row_variances(data: &Array2<f64>) -> Array1<f64> {
    data.map_axis(Axis(1), |row| {
        let n = row.len() as f64;
        let mean = row.mean().unwrap_or(0.0);
        row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0)
    })
}

/// PCA on the `ntop` genes with the largest variance
pub fn pca(transformed: &TransformedData, samples: &SampleTable, params: &PcaParams) -> Result<PcaResult> {
    let m = transformed.n_samples();
    if m < 2 {
        return Err(AnalysisError::InvalidParameter {
            reason: "PCA needs at least two samples".to_string(),
        });
    }
    if transformed.sample_ids != samples.sample_ids() {
        return Err(AnalysisError::DimensionMismatch {
            expected: "sample table in the order of the transformed matrix".to_string(),
            actual: samples.sample_ids().join(","),
        });
    }
    let groups = samples.group_labels(&params.intgroup)?;
    let group_order = samples.group_order(&params.intgroup)?;

    let vars = row_variances(&transformed.data);
    let mut order: Vec<usize> = (0..vars.len()).filter(|&i| vars[i].is_finite()).collect();
    order.sort_by(|&a, &b| vars[b].total_cmp(&vars[a]));
    order.truncate(params.ntop);
    if order.is_empty() {
        return Err(AnalysisError::EmptyData {
            reason: "no genes with finite variance for PCA".to_string(),
        });
    }

    // samples x genes, centered per gene
    let mut x = transformed.data.select(Axis(0), &order).reversed_axes();
    for mut col in x.columns_mut() {
        let mean = col.mean().unwrap_or(0.0);
        col.mapv_inplace(|v| v - mean);
    }

    let gram = x.dot(&x.t());
    let (values, vectors) = symmetric_eigen(&gram);
    let values: Vec<f64> = values.iter().map(|&v| v.max(0.0)).collect();
    let total: f64 = values.iter().sum();
    let percent_var = values.iter().map(|&v| if total > 0.0 { v / total } else { 0.0 }).collect();

    let mut scores = Array2::zeros((m, m));
    for k in 0..m {
        let mut col = vectors.column(k).mapv(|u| u * values[k].sqrt());
        let largest = col.iter().copied().fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if largest < 0.0 {
            col.mapv_inplace(|v| -v);
        }
        scores.column_mut(k).assign(&col);
    }
    log::debug!("PCA on {} genes", order.len());

    Ok(PcaResult {
        scores,
        percent_var,
        sample_ids: transformed.sample_ids.clone(),
        groups,
        group_order,
        n_genes_used: order.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fixture() -> (TransformedData, SampleTable) {
        // two groups separated along genes 1 and 2, gene 3 is noise
        let data = array![
            [1.0, 1.2, 0.8, 5.0, 5.1, 4.9],
            [9.0, 9.1, 8.9, 2.0, 2.2, 1.8],
            [3.0, 3.1, 2.9, 3.0, 3.05, 2.95],
        ];
        let ids: Vec<String> = (1..=6).map(|i| format!("s{}", i)).collect();
        let mut samples = SampleTable::new(ids.clone()).unwrap();
        samples
            .add_column("condition", vec!["A", "A", "A", "B", "B", "B"].into_iter().map(String::from).collect())
            .unwrap();
        let t = TransformedData {
            data,
            gene_ids: vec!["g1".into(), "g2".into(), "g3".into()],
            sample_ids: ids,
            description: "test".into(),
        };
        (t, samples)
    }

    #[test]
    fn test_pc1_separates_groups() {
        let (t, samples) = fixture();
        let res = pca(&t, &samples, &PcaParams::default()).unwrap();
        assert_eq!(res.n_components(), 6);
        assert!(res.percent_var[0] > 0.95, "PC1 explains {}", res.percent_var[0]);
        assert!((res.percent_var.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let pc1 = res.component(0);
        assert!(pc1[..3].iter().all(|&v| v.signum() == pc1[0].signum()));
        assert!(pc1[3..].iter().all(|&v| v.signum() == -pc1[0].signum()));
        assert_eq!(res.group_order, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_ntop_limits_genes() {
        let (t, samples) = fixture();
        let res = pca(
            &t,
            &samples,
            &PcaParams {
                ntop: 1,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(res.n_genes_used, 1);
        assert!((res.percent_var[0] - 1.0).abs() < 1e-9);
    }
}
