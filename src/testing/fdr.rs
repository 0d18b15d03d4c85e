//! Multiple testing correction

use std::cmp::Ordering;

/// Benjamini-Hochberg adjusted p-values
///
/// NaN p-values are excluded from the number of tests and stay NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut order: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; n];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].partial_cmp(&pvalues[b]).unwrap_or(Ordering::Equal));

    let mut cummin = f64::INFINITY;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_matches_p_adjust() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.2), "BH") = 0.04 0.0533 0.0533 0.2
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.2]);
        let expected = [0.04, 0.16 / 3.0, 0.16 / 3.0, 0.2];
        for (a, b) in padj.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_bh_keeps_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.02]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.02).abs() < 1e-12, "two tests, not three");
        assert!((padj[2] - 0.02).abs() < 1e-12);
        assert!(benjamini_hochberg(&[f64::NAN]).iter().all(|p| p.is_nan()));
    }

    #[test]
    fn test_bh_monotone_and_capped() {
        let p = [0.9, 0.5, 0.001, 0.7, 0.95];
        let padj = benjamini_hochberg(&p);
        assert!(padj.iter().all(|&q| q <= 1.0));
        assert!(padj[2] <= padj[1] && padj[1] <= padj[3] && padj[3] <= padj[0]);
    }
}
