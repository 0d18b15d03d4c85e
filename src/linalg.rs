//! Small dense linear algebra used by the per-gene fits
//!
//! The systems solved here are p x p with p the number of model
//! coefficients, so plain Cholesky and Jacobi routines on `ndarray`
//! matrices are sufficient.

use ndarray::{Array1, Array2};

/// X' diag(w) X
pub fn weighted_crossprod(x: &Array2<f64>, w: &[f64]) -> Array2<f64> {
    let p = x.ncols();
    let mut out = Array2::zeros((p, p));
    for (i, row) in x.rows().into_iter().enumerate() {
        let wi = w[i];
        for j in 0..p {
            let a = wi * row[j];
            if a == 0.0 {
                continue;
            }
            for k in j..p {
                out[[j, k]] += a * row[k];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            out[[j, k]] = out[[k, j]];
        }
    }
    out
}

/// Lower-triangular Cholesky factor, `None` if the matrix is not positive definite
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

fn cholesky_solve(l: &Array2<f64>, b: &[f64]) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve A x = b for symmetric positive definite A
pub fn solve_spd(a: &Array2<f64>, b: &[f64]) -> Option<Array1<f64>> {
    cholesky(a).map(|l| cholesky_solve(&l, b))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_spd(a: &Array2<f64>) -> Option<Array2<f64>> {
    let l = cholesky(a)?;
    let n = a.nrows();
    let mut inv = Array2::zeros((n, n));
    let mut e = vec![0.0; n];
    for j in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[j] = 1.0;
        let col = cholesky_solve(&l, &e);
        inv.column_mut(j).assign(&col);
    }
    Some(inv)
}

/// log det of a symmetric positive definite matrix; -inf when singular
pub fn log_det_spd(a: &Array2<f64>) -> f64 {
    match cholesky(a) {
        Some(l) => 2.0 * l.diag().iter().map(|v| v.ln()).sum::<f64>(),
        None => f64::NEG_INFINITY,
    }
}

/// Numerical rank by Householder QR with column pivoting
///
/// Returns the rank and the pivoted column order; columns past the rank in
/// that order are linearly dependent on the earlier ones.
pub fn qr_rank(x: &Array2<f64>, tol: f64) -> (usize, Vec<usize>) {
    let (m, n) = x.dim();
    let mut a = x.clone();
    let mut perm: Vec<usize> = (0..n).collect();
    let mut norms: Vec<f64> = (0..n).map(|j| a.column(j).iter().map(|v| v * v).sum()).collect();
    let steps = m.min(n);
    let mut rank = 0;
    let mut first_diag = 0.0;

    for k in 0..steps {
        let (best, best_norm) = norms
            .iter()
            .enumerate()
            .skip(k)
            .fold((k, -1.0), |acc, (j, &v)| if v > acc.1 { (j, v) } else { acc });
        if best_norm <= 0.0 {
            break;
        }
        if best != k {
            for i in 0..m {
                a.swap([i, k], [i, best]);
            }
            norms.swap(k, best);
            perm.swap(k, best);
        }

        let sigma: f64 = (k..m).map(|i| a[[i, k]] * a[[i, k]]).sum::<f64>().sqrt();
        let diag = sigma;
        if k == 0 {
            first_diag = diag;
        }
        if diag <= tol * first_diag.max(f64::MIN_POSITIVE) {
            break;
        }
        rank += 1;

        let alpha = if a[[k, k]] > 0.0 { -sigma } else { sigma };
        let mut v: Vec<f64> = (k..m).map(|i| a[[i, k]]).collect();
        v[0] -= alpha;
        let vnorm: f64 = v.iter().map(|x| x * x).sum();
        if vnorm > 0.0 {
            for j in k..n {
                let dot: f64 = (k..m).map(|i| v[i - k] * a[[i, j]]).sum();
                let f = 2.0 * dot / vnorm;
                for i in k..m {
                    a[[i, j]] -= f * v[i - k];
                }
            }
        }
        for j in (k + 1)..n {
            norms[j] = ((k + 1)..m).map(|i| a[[i, j]] * a[[i, j]]).sum();
        }
    }
    (rank, perm)
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations
///
/// Eigenvalues are returned in decreasing order with eigenvectors as the
/// matching columns.
pub fn symmetric_eigen(a: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut m = a.clone();
    let mut v = Array2::<f64>::eye(n);

    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| m[[i, j]] * m[[i, j]])
            .sum();
        if off < 1e-22 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if m[[p, q]].abs() < 1e-300 {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * m[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| m[[j, j]].partial_cmp(&m[[i, i]]).unwrap_or(std::cmp::Ordering::Equal));
    let values = Array1::from_iter(order.iter().map(|&i| m[[i, i]]));
    let mut vectors = Array2::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        vectors.column_mut(dst).assign(&v.column(src));
    }
    (values, vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve_and_invert_spd() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let x = solve_spd(&a, &[2.0, 1.0]).unwrap();
        // 4x + 2y = 2, 2x + 3y = 1 -> x = 0.5, y = 0
        assert!((x[0] - 0.5).abs() < 1e-12 && x[1].abs() < 1e-12, "solution {:?}", x);

        let inv = invert_spd(&a).unwrap();
        let id = a.dot(&inv);
        assert!((id[[0, 0]] - 1.0).abs() < 1e-12 && id[[0, 1]].abs() < 1e-12);
        assert!((log_det_spd(&a) - 8.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(&a).is_none());
        assert_eq!(log_det_spd(&a), f64::NEG_INFINITY);
    }

    #[test]
    fn test_weighted_crossprod() {
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let xtwx = weighted_crossprod(&x, &[1.0, 2.0, 3.0]);
        assert_eq!(xtwx, array![[6.0, 5.0], [5.0, 5.0]]);
    }

    #[test]
    fn test_qr_rank_detects_dependence() {
        let full = array![[1.0, 0.0], [1.0, 1.0], [1.0, 0.0]];
        assert_eq!(qr_rank(&full, 1e-7).0, 2);

        let dependent = array![[1.0, 1.0, 0.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0], [1.0, 0.0, 1.0]];
        let (rank, _) = qr_rank(&dependent, 1e-7);
        assert_eq!(rank, 2, "intercept equals the sum of the two indicator columns");
    }

    #[test]
    fn test_symmetric_eigen() {
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let (values, vectors) = symmetric_eigen(&a);
        assert!((values[0] - 3.0).abs() < 1e-10 && (values[1] - 1.0).abs() < 1e-10);
        let v0 = vectors.column(0);
        assert!((v0[0].abs() - v0[1].abs()).abs() < 1e-10, "leading eigenvector is (1,1)/sqrt(2)");
    }
}
