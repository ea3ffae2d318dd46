//! Least squares solver.
//!
//! Every fit in this crate reduces to a small linear regression:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - SVD solves the problem robustly even when the design matrix is tall
//!   (more rows than columns). Nalgebra's `QR::solve` is intended for square
//!   systems and will panic for non-square matrices.
//! - The numerical rank is reported alongside the solution so callers can flag
//!   rank-deficient designs as non-converged instead of trusting them.
//! - Parameter covariance (up to the residual variance factor) comes from the
//!   same decomposition: `(XᵀX)⁻¹ = V Σ⁻² Vᵀ`.

use nalgebra::{DMatrix, DVector};

/// Singular values below `RANK_RCOND * s_max` count as zero.
const RANK_RCOND: f64 = 1e-10;

/// Least squares solution plus the diagnostics the fitters need.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub beta: DVector<f64>,
    /// Numerical rank of the design matrix.
    pub rank: usize,
    /// Residual sum of squares `Σ (y - Xβ)^2`.
    pub sse: f64,
    /// `(XᵀX)⁻¹`; `None` when the design is rank deficient.
    pub unscaled_covariance: Option<DMatrix<f64>>,
}

impl LeastSquares {
    pub fn full_rank(&self) -> bool {
        self.rank == self.beta.len()
    }
}

/// Solve a least squares problem using SVD and report rank and covariance.
///
/// Returns `None` when the inputs are non-finite or no finite solution exists.
/// A rank-deficient design still yields the minimum-norm solution; check
/// `LeastSquares::full_rank` before relying on it.
pub fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<LeastSquares> {
    if x.nrows() != y.len() || x.ncols() == 0 || x.nrows() == 0 {
        return None;
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return None;
    }

    let p = x.ncols();
    let svd = x.clone().svd(true, true);
    let s_max = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    if !(s_max.is_finite() && s_max > 0.0) {
        return None;
    }
    let cutoff = RANK_RCOND * s_max;
    let rank = svd.singular_values.iter().filter(|&&s| s > cutoff).count();

    let beta = svd.solve(y, cutoff).ok()?;
    if !beta.iter().all(|v| v.is_finite()) {
        return None;
    }

    let resid = y - x * &beta;
    let sse = resid.norm_squared();
    if !sse.is_finite() {
        return None;
    }

    let unscaled_covariance = if rank == p {
        svd.v_t.as_ref().map(|v_t| {
            let mut cov = DMatrix::<f64>::zeros(p, p);
            for i in 0..p {
                for j in 0..p {
                    let mut acc = 0.0;
                    for k in 0..svd.singular_values.len() {
                        let s = svd.singular_values[k];
                        acc += v_t[(k, i)] * v_t[(k, j)] / (s * s);
                    }
                    cov[(i, j)] = acc;
                }
            }
            cov
        })
    } else {
        None
    };

    Some(LeastSquares {
        beta,
        rank,
        sse,
        unscaled_covariance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = least_squares(&x, &y).unwrap().beta;
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn covariance_matches_normal_equations() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_row_slice(&[1.0, 2.9, 5.1, 7.0]);
        let ls = least_squares(&x, &y).unwrap();
        assert!(ls.full_rank());

        let xtx_inv = (x.transpose() * &x).try_inverse().unwrap();
        let cov = ls.unscaled_covariance.unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert!((cov[(i, j)] - xtx_inv[(i, j)]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn duplicated_column_is_rank_deficient() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let ls = least_squares(&x, &y).unwrap();
        assert_eq!(ls.rank, 1);
        assert!(!ls.full_rank());
        assert!(ls.unscaled_covariance.is_none());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let x = DMatrix::from_row_slice(2, 1, &[1.0, f64::NAN]);
        let y = DVector::from_row_slice(&[1.0, 2.0]);
        assert!(least_squares(&x, &y).is_none());
    }
}
