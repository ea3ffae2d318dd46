//! Model evaluation for the polynomial and B-spline fits.
//!
//! The fitter relies on two primitive operations:
//! - build a design matrix for a set of abscissae (for OLS)
//! - residual SSE of `y ≈ design · coeffs`

use nalgebra::{DMatrix, DVector};

use crate::math::{fill_bspline_row, fill_monomial_row};

/// Linear basis a fit is expressed in.
#[derive(Debug, Clone, Copy)]
pub enum Basis<'a> {
    /// `[1, x/s, (x/s)^2, ...]`.
    Monomial { degree: usize, scale: f64 },
    /// Clamped B-spline basis on `knots`.
    BSpline { degree: usize, knots: &'a [f64] },
}

impl Basis<'_> {
    /// Number of coefficients.
    pub fn len(&self) -> usize {
        match self {
            Basis::Monomial { degree, .. } => degree + 1,
            Basis::BSpline { degree, knots } => knots.len().saturating_sub(degree + 1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill a design row for `x`.
    ///
    /// # Panics
    /// Panics if `out` does not have length `self.len()`.
    pub fn fill_design_row(&self, x: f64, out: &mut [f64]) {
        match *self {
            Basis::Monomial { scale, .. } => fill_monomial_row(x, scale, out),
            Basis::BSpline { degree, knots } => fill_bspline_row(knots, degree, x, out),
        }
    }

    /// Design matrix with one row per abscissa.
    pub fn design_matrix(&self, xs: &[f64]) -> DMatrix<f64> {
        let p = self.len();
        let mut m = DMatrix::<f64>::zeros(xs.len(), p);
        let mut row = vec![0.0; p];
        for (i, &x) in xs.iter().enumerate() {
            self.fill_design_row(x, &mut row);
            for (j, v) in row.iter().enumerate() {
                m[(i, j)] = *v;
            }
        }
        m
    }
}

/// Residual sum of squares of `y ≈ design · coeffs`.
pub fn residual_sse(design: &DMatrix<f64>, y: &[f64], coeffs: &DVector<f64>) -> f64 {
    let fitted = design * coeffs;
    y.iter()
        .zip(fitted.iter())
        .map(|(obs, fit)| (obs - fit).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{clamped_uniform_knots, SPLINE_DEGREE};

    #[test]
    fn monomial_design_uses_scaled_powers() {
        let basis = Basis::Monomial {
            degree: 2,
            scale: 10.0,
        };
        let design = basis.design_matrix(&[5.0, 10.0]);
        assert_eq!(design.ncols(), 3);
        // 1, x/10, (x/10)^2
        assert!((design[(0, 2)] - 0.25).abs() < 1e-12);
        assert!((design[(1, 1)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spline_design_rows_sum_to_one() {
        let knots = clamped_uniform_knots(0.0, 1.0, 2, SPLINE_DEGREE);
        let basis = Basis::BSpline {
            degree: SPLINE_DEGREE,
            knots: &knots,
        };
        assert_eq!(basis.len(), 6);
        let m = basis.design_matrix(&[0.0, 0.25, 0.5, 1.0]);
        for i in 0..m.nrows() {
            let sum: f64 = m.row(i).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }
}
