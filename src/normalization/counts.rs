//! Depth-normalized counts on the per-million scale

use ndarray::{Array2, Axis};

use crate::data::DeDataSet;
use crate::error::Result;

/// Fragments per million mapped fragments
///
/// With `robust`, library sizes are the size factors scaled by the geometric
/// mean of the column sums; otherwise they are the raw column sums.
pub fn fpm(dds: &DeDataSet, robust: bool) -> Result<Array2<f64>> {
    let counts = dds.counts().counts();
    let col_sums: Vec<f64> = counts.axis_iter(Axis(1)).map(|c| c.sum()).collect();

    let library_sizes: Vec<f64> = match (robust, dds.size_factors()) {
        (true, Some(sf)) => {
            let positive: Vec<f64> = col_sums.iter().filter(|&&s| s > 0.0).map(|s| s.ln()).collect();
            let geo = (positive.iter().sum::<f64>() / positive.len().max(1) as f64).exp();
            sf.iter().map(|s| s * geo).collect()
        }
        _ => col_sums,
    };

    let mut out = counts.to_owned();
    for (mut col, lib) in out.columns_mut().into_iter().zip(library_sizes) {
        let lib = lib.max(1.0);
        col.mapv_inplace(|v| v * 1e6 / lib);
    }
    Ok(out)
}
