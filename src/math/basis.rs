//! Basis functions for the fitters: scaled monomials and cubic B-splines.
//!
//! B-splines use a clamped knot vector (end knots repeated `degree + 1` times)
//! so the curve interpolates the end coefficients and is defined on exactly
//! `[t_degree, t_{n_coef}]`.
//!
//! Numerical notes:
//! - Monomial columns are built on `x / scale` to keep the design matrix
//!   well conditioned for fields in the thousands of Oe.
//! - Basis evaluation follows the Cox–de Boor triangular scheme; it never
//!   divides by a zero-width knot span.

use serde::{Deserialize, Serialize};

/// Cubic.
pub const SPLINE_DEGREE: usize = 3;

/// Fill a design row `[1, u, u^2, ..., u^degree]` with `u = x / scale`.
pub fn fill_monomial_row(x: f64, scale: f64, out: &mut [f64]) {
    let u = x / scale;
    let mut pow = 1.0;
    for v in out.iter_mut() {
        *v = pow;
        pow *= u;
    }
}

/// Clamped knot vector with `interior` uniformly spaced interior knots on `[lo, hi]`.
pub fn clamped_uniform_knots(lo: f64, hi: f64, interior: usize, degree: usize) -> Vec<f64> {
    let mut knots = Vec::with_capacity(interior + 2 * (degree + 1));
    knots.extend(std::iter::repeat(lo).take(degree + 1));
    let step = (hi - lo) / (interior as f64 + 1.0);
    for i in 1..=interior {
        knots.push(lo + step * i as f64);
    }
    knots.extend(std::iter::repeat(hi).take(degree + 1));
    knots
}

/// Index `i` of the knot span with `knots[i] <= x < knots[i + 1]`.
///
/// `x` at or beyond the right end maps to the last non-empty span.
fn find_span(knots: &[f64], degree: usize, n_coef: usize, x: f64) -> usize {
    let n = n_coef - 1;
    if x >= knots[n + 1] {
        return n;
    }
    if x <= knots[degree] {
        return degree;
    }
    let mut low = degree;
    let mut high = n + 1;
    let mut mid = (low + high) / 2;
    while x < knots[mid] || x >= knots[mid + 1] {
        if x < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
        mid = (low + high) / 2;
    }
    mid
}

/// Non-zero basis values `N_{span-degree..=span}(x)`.
fn basis_funs(knots: &[f64], degree: usize, span: usize, x: f64) -> Vec<f64> {
    let mut n = vec![0.0; degree + 1];
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    n[0] = 1.0;
    for j in 1..=degree {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom != 0.0 { n[r] / denom } else { 0.0 };
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}

/// Fill a full design row (length `n_coef`) of B-spline basis values at `x`.
pub fn fill_bspline_row(knots: &[f64], degree: usize, x: f64, out: &mut [f64]) {
    out.iter_mut().for_each(|v| *v = 0.0);
    let n_coef = out.len();
    let lo = knots[degree];
    let hi = knots[n_coef];
    let x = x.clamp(lo, hi);
    let span = find_span(knots, degree, n_coef, x);
    let vals = basis_funs(knots, degree, span, x);
    for (j, v) in vals.into_iter().enumerate() {
        out[span - degree + j] = v;
    }
}

/// A B-spline curve `s(x) = Σ c_i N_i(x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BSpline {
    pub degree: usize,
    pub knots: Vec<f64>,
    pub coefficients: Vec<f64>,
}

impl BSpline {
    /// Domain `[lo, hi]`; evaluation outside it is clamped to the ends.
    pub fn domain(&self) -> (f64, f64) {
        (
            self.knots[self.degree],
            self.knots[self.coefficients.len()],
        )
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n_coef = self.coefficients.len();
        if n_coef == 0 {
            return f64::NAN;
        }
        let (lo, hi) = self.domain();
        let x = x.clamp(lo, hi);
        let span = find_span(&self.knots, self.degree, n_coef, x);
        let vals = basis_funs(&self.knots, self.degree, span, x);
        vals.iter()
            .enumerate()
            .map(|(j, v)| v * self.coefficients[span - self.degree + j])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monomial_row_is_scaled() {
        let mut row = [0.0; 3];
        fill_monomial_row(4.0, 2.0, &mut row);
        assert_eq!(row, [1.0, 2.0, 4.0]);
    }

    #[test]
    fn basis_is_a_partition_of_unity() {
        let knots = clamped_uniform_knots(-2.0, 3.0, 4, SPLINE_DEGREE);
        let n_coef = knots.len() - SPLINE_DEGREE - 1;
        let mut row = vec![0.0; n_coef];
        for i in 0..=50 {
            let x = -2.0 + 5.0 * i as f64 / 50.0;
            fill_bspline_row(&knots, SPLINE_DEGREE, x, &mut row);
            let total: f64 = row.iter().sum();
            assert!((total - 1.0).abs() < 1e-12, "x={x} sum={total}");
            assert!(row.iter().all(|v| *v >= -1e-15));
        }
    }

    #[test]
    fn spline_with_linear_coefficients_reproduces_a_line() {
        // Greville abscissae of a clamped cubic are the averages of 3 consecutive
        // interior knots; coefficients equal to a line at those points give the line.
        let knots = clamped_uniform_knots(0.0, 10.0, 3, SPLINE_DEGREE);
        let n_coef = knots.len() - SPLINE_DEGREE - 1;
        let coefficients: Vec<f64> = (0..n_coef)
            .map(|i| {
                let g = (knots[i + 1] + knots[i + 2] + knots[i + 3]) / 3.0;
                1.0 + 0.5 * g
            })
            .collect();
        let s = BSpline {
            degree: SPLINE_DEGREE,
            knots,
            coefficients,
        };
        for &x in &[0.0, 1.3, 5.0, 7.7, 10.0] {
            assert!((s.eval(x) - (1.0 + 0.5 * x)).abs() < 1e-12);
        }
    }

    #[test]
    fn evaluation_clamps_outside_domain() {
        let knots = clamped_uniform_knots(0.0, 1.0, 1, SPLINE_DEGREE);
        let s = BSpline {
            degree: SPLINE_DEGREE,
            knots,
            coefficients: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        };
        assert!((s.eval(-5.0) - 1.0).abs() < 1e-12);
        assert!((s.eval(5.0) - 5.0).abs() < 1e-12);
    }
}
