//! Size factor estimation using the median of ratios method

use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::DeDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Standard median of ratios over genes with no zero count
    #[default]
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

impl FromStr for SizeFactorMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ratio" => Ok(Self::Ratio),
            "poscounts" => Ok(Self::PosCounts),
            _ => Err(AnalysisError::InvalidParameter {
                reason: format!("unknown size factor method '{}' (ratio or poscounts)", s),
            }),
        }
    }
}

/// Estimate size factors, or normalization factors when transcript lengths are attached
pub fn estimate_size_factors(dds: &mut DeDataSet, method: SizeFactorMethod) -> Result<()> {
    if let Some(lengths) = dds.avg_tx_length() {
        let nf = estimate_normalization_factors(dds.counts().counts(), lengths.view(), method)?;
        log::info!("using 'avgTxLength' from tximport to compute normalization factors");
        return dds.set_normalization_factors(nf);
    }

    let sf = size_factors(dds.counts().counts(), method)?;
    log::info!(
        "size factors: {}",
        sf.iter().map(|s| format!("{:.3}", s)).collect::<Vec<_>>().join(" ")
    );
    dds.set_size_factors(sf)
}

/// Median-of-ratios size factors of a gene x sample matrix
pub fn size_factors(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(AnalysisError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let log_geo_means: Vec<f64> = counts
        .axis_iter(Axis(0))
        .map(|row| match method {
            SizeFactorMethod::Ratio => row.iter().map(|x| x.ln()).sum::<f64>() / n_samples as f64,
            // divides by the total sample count, not the number of positive counts
            SizeFactorMethod::PosCounts => {
                let positive: Vec<f64> = row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).collect();
                if positive.is_empty() {
                    f64::NEG_INFINITY
                } else {
                    positive.iter().sum::<f64>() / n_samples as f64
                }
            }
        })
        .collect();

    if log_geo_means.iter().all(|g| g.is_infinite()) {
        return Err(AnalysisError::SizeFactorError {
            reason: "every gene contains at least one zero, cannot compute log geometric means \
                     (try the poscounts method)"
                .to_string(),
        });
    }

    let mut sf = Array1::zeros(n_samples);
    for (j, col) in counts.axis_iter(Axis(1)).enumerate() {
        let ratios: Vec<f64> = col
            .iter()
            .zip(&log_geo_means)
            .filter(|&(&c, g)| g.is_finite() && c > 0.0)
            .map(|(&c, g)| c.ln() - g)
            .collect();
        sf[j] = if ratios.is_empty() { f64::NAN } else { median(&ratios).exp() };
    }

    if method == SizeFactorMethod::PosCounts {
        // centered to a geometric mean of 1
        let finite: Vec<f64> = sf.iter().copied().filter(|s: &f64| s.is_finite()).collect();
        let center = (finite.iter().map(|s| s.ln()).sum::<f64>() / finite.len().max(1) as f64).exp();
        sf.mapv_inplace(|s| s / center);
    }

    if sf.iter().any(|&x| !x.is_finite() || x <= 0.0) {
        return Err(AnalysisError::SizeFactorError {
            reason: "a sample has no usable ratios; check for empty libraries".to_string(),
        });
    }
    Ok(sf)
}

/// Gene x sample normalization factors from average transcript lengths
///
/// Lengths are scaled to a row geometric mean of 1, size factors are taken
/// from the length-corrected counts and the product is re-centered per gene.
pub fn estimate_normalization_factors(
    counts: ArrayView2<f64>,
    avg_tx_length: ArrayView2<f64>,
    method: SizeFactorMethod,
) -> Result<Array2<f64>> {
    if counts.dim() != avg_tx_length.dim() {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("{} x {} lengths", counts.nrows(), counts.ncols()),
            actual: format!("{} x {}", avg_tx_length.nrows(), avg_tx_length.ncols()),
        });
    }

    let mut norm = avg_tx_length.to_owned();
    for mut row in norm.rows_mut() {
        let center = (row.iter().map(|x| x.ln()).sum::<f64>() / row.len() as f64).exp();
        row.mapv_inplace(|x| x / center);
    }

    let corrected = &counts / &norm;
    let sf = size_factors(corrected.view(), method)?;

    let mut nf = norm;
    for (mut col, &s) in nf.columns_mut().into_iter().zip(sf.iter()) {
        col.mapv_inplace(|x| x * s);
    }
    for mut row in nf.rows_mut() {
        let center = (row.iter().map(|x| x.ln()).sum::<f64>() / row.len() as f64).exp();
        row.mapv_inplace(|x| x / center);
    }
    Ok(nf)
}
