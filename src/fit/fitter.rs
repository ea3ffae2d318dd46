//! Low-level fitting routines for a single model kind.
//!
//! Given samples `(x_i, y_i)` from a resolved region we solve:
//! - a polynomial OLS problem on a scaled X axis, or
//! - a (penalized) least-squares cubic B-spline problem,
//!
//! and return a `FitResult` with quality diagnostics.
//!
//! Numerical trouble (rank deficiency, non-finite values, a smoothing search
//! that runs out of iterations) is reported through `converged = false` and a
//! diagnostic. Only "not enough samples" is an error.

use nalgebra::{DMatrix, DVector};

use crate::domain::{
    Branch, FitParams, FitQuality, FitResult, LoopDataset, ModelKind, ModelSpec, PolynomialParams,
    Region, SplineOptions,
};
use crate::error::LoopError;
use crate::fit::selection::{bic, fit_and_select};
use crate::math::{clamped_uniform_knots, least_squares, BSpline, LeastSquares, SPLINE_DEGREE};
use crate::models::{residual_sse, Basis};

/// Search interval for `log10(λ)` of the spline smoothing penalty.
const LOG_LAMBDA_MIN: f64 = -10.0;
const LOG_LAMBDA_MAX: f64 = 10.0;

/// Resolve `region` against `dataset` and fit `spec` to it.
///
/// `spline` supplies smoothing options for B-spline fits; the knot count of a
/// `ModelSpec::CubicBSpline` overrides `spline.knots`.
pub fn fit_region(
    dataset: &LoopDataset,
    region: &Region,
    spec: ModelSpec,
    spline: &SplineOptions,
) -> Result<FitResult, LoopError> {
    let (x, y) = region.samples(dataset, spec.min_samples())?;
    let fit = match spec {
        ModelSpec::Polynomial { degree } => fit_polynomial(region.branch, &x, &y, degree)?,
        ModelSpec::AutoPolynomial { max_degree } => {
            let selection = fit_and_select(region.branch, &x, &y, max_degree)?;
            for (kind, reason) in &selection.skipped {
                log::debug!("{region}: skipped {}: {reason}", kind.display_name());
            }
            selection.best
        }
        ModelSpec::CubicBSpline { knots } => {
            let opts = SplineOptions { knots, ..*spline };
            fit_spline(region.branch, &x, &y, &opts)?
        }
    };
    log::debug!(
        "{region}: {} n={} sse={:.4e} converged={}",
        fit.model.display_name(),
        fit.quality.n,
        fit.quality.sse,
        fit.converged
    );
    Ok(fit)
}

/// Ordinary least squares of `y` on `1, x, ..., x^degree`.
///
/// The X axis is divided by `max|x|` before solving and the coefficients are
/// mapped back, so the constant term is always the value at `x = 0`.
pub fn fit_polynomial(
    branch: Branch,
    x: &[f64],
    y: &[f64],
    degree: usize,
) -> Result<FitResult, LoopError> {
    let model = ModelKind::Polynomial { degree };
    let p = degree + 1;
    let n = x.len().min(y.len());
    if n < p {
        return Err(LoopError::InsufficientSamples {
            branch,
            found: n,
            required: p,
        });
    }
    let (x, y) = (&x[..n], &y[..n]);

    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Ok(failed_polynomial(model, n, "non-finite sample in fit region"));
    }

    let x_max = x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let scale = if x_max > 0.0 { x_max } else { 1.0 };
    let basis = Basis::Monomial { degree, scale };
    let design = basis.design_matrix(x);
    let y_vec = DVector::from_column_slice(y);

    let Some(ls) = least_squares(&design, &y_vec) else {
        return Ok(failed_polynomial(model, n, "least squares produced no finite solution"));
    };

    let quality = quality_for(n, p, ls.sse);
    let params = unscale_polynomial(&ls, scale, quality.s2);
    if !params_finite(&params) {
        return Ok(failed_polynomial(model, n, "non-finite coefficients"));
    }

    let diagnostic = (!ls.full_rank())
        .then(|| format!("rank-deficient design (rank {} < {p})", ls.rank));
    Ok(FitResult {
        model,
        params: FitParams::Polynomial(params),
        converged: diagnostic.is_none(),
        quality,
        diagnostic,
    })
}

/// Least-squares cubic B-spline with `opts.knots` uniform interior knots.
///
/// With `opts.smoothing > 0` a second-difference penalty `λ‖Dc‖²` is added
/// and `λ` is bisected in log space until `SSE ≈ smoothing`.
pub fn fit_spline(
    branch: Branch,
    x: &[f64],
    y: &[f64],
    opts: &SplineOptions,
) -> Result<FitResult, LoopError> {
    let model = ModelKind::CubicBSpline { knots: opts.knots };
    let m = model.param_count();
    let n = x.len().min(y.len());
    if n < m {
        return Err(LoopError::InsufficientSamples {
            branch,
            found: n,
            required: m,
        });
    }

    let mut pairs: Vec<(f64, f64)> = x[..n].iter().copied().zip(y[..n].iter().copied()).collect();
    if pairs.iter().any(|(a, b)| !(a.is_finite() && b.is_finite())) {
        return Ok(failed_spline(model, n, 0.0, opts.knots, "non-finite sample in fit region"));
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let lo = pairs[0].0;
    let hi = pairs[n - 1].0;
    if !(hi > lo) {
        return Ok(failed_spline(model, n, lo, opts.knots, "zero X span"));
    }
    if !(opts.smoothing.is_finite() && opts.smoothing >= 0.0) {
        return Err(LoopError::invalid("smoothing", "must be finite and >= 0"));
    }

    let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    let knots = clamped_uniform_knots(lo, hi, opts.knots, SPLINE_DEGREE);
    let basis = Basis::BSpline {
        degree: SPLINE_DEGREE,
        knots: &knots,
    };
    let design = basis.design_matrix(&xs);
    let penalty = second_difference(m);
    // Put λ on the same footing as the data term.
    let penalty_norm = design.norm() / penalty.norm().max(f64::MIN_POSITIVE);
    let y_vec = DVector::from_column_slice(&ys);

    let solve = |lambda: f64| -> Option<(DVector<f64>, f64)> {
        if lambda == 0.0 {
            let ls = least_squares(&design, &y_vec)?;
            return ls.full_rank().then_some((ls.beta, ls.sse));
        }
        let w = lambda.sqrt() * penalty_norm;
        let rows = n + penalty.nrows();
        let mut aug = DMatrix::<f64>::zeros(rows, m);
        aug.view_mut((0, 0), (n, m)).copy_from(&design);
        aug.view_mut((n, 0), (penalty.nrows(), m)).copy_from(&(&penalty * w));
        let mut rhs = DVector::<f64>::zeros(rows);
        rhs.rows_mut(0, n).copy_from(&y_vec);
        let beta = least_squares(&aug, &rhs)?.beta;
        let sse = residual_sse(&design, &ys, &beta);
        sse.is_finite().then_some((beta, sse))
    };

    let build = |coeffs: DVector<f64>, sse: f64, converged: bool, diagnostic: Option<String>| {
        FitResult {
            model,
            params: FitParams::Spline(BSpline {
                degree: SPLINE_DEGREE,
                knots: knots.clone(),
                coefficients: coeffs.iter().copied().collect(),
            }),
            converged,
            quality: quality_for(n, m, sse),
            diagnostic,
        }
    };

    let Some((beta0, sse0)) = solve(0.0) else {
        return Ok(failed_spline(
            model,
            n,
            lo,
            opts.knots,
            "singular spline system (a knot span holds too few samples)",
        ));
    };

    let target = opts.smoothing;
    if target == 0.0 || sse0 >= target {
        return Ok(build(beta0, sse0, true, None));
    }

    let Some((beta_max, sse_max)) = solve(10f64.powf(LOG_LAMBDA_MAX)) else {
        return Ok(failed_spline(model, n, lo, opts.knots, "penalized spline solve failed"));
    };
    if sse_max <= target {
        return Ok(build(beta_max, sse_max, true, None));
    }

    let (mut e_lo, mut e_hi) = (LOG_LAMBDA_MIN, LOG_LAMBDA_MAX);
    let mut last = (beta0, sse0);
    for _ in 0..opts.max_iter {
        let mid = 0.5 * (e_lo + e_hi);
        let Some((beta, sse)) = solve(10f64.powf(mid)) else {
            return Ok(failed_spline(model, n, lo, opts.knots, "penalized spline solve failed"));
        };
        if (sse - target).abs() <= opts.tol * target {
            return Ok(build(beta, sse, true, None));
        }
        if sse < target {
            e_lo = mid;
        } else {
            e_hi = mid;
        }
        last = (beta, sse);
    }

    let diagnostic = format!(
        "smoothing search stopped after {} iterations (sse={:.4e}, target={:.4e})",
        opts.max_iter, last.1, target
    );
    Ok(build(last.0, last.1, false, Some(diagnostic)))
}

/// `(m-2) × m` second-difference operator.
fn second_difference(m: usize) -> DMatrix<f64> {
    let rows = m.saturating_sub(2);
    let mut d = DMatrix::<f64>::zeros(rows, m);
    for i in 0..rows {
        d[(i, i)] = 1.0;
        d[(i, i + 1)] = -2.0;
        d[(i, i + 2)] = 1.0;
    }
    d
}

fn quality_for(n: usize, p: usize, sse: f64) -> FitQuality {
    FitQuality {
        sse,
        rmse: (sse / n as f64).sqrt(),
        s2: sse / n.saturating_sub(p).max(1) as f64,
        bic: bic(n, sse, p),
        n,
    }
}

/// Map scaled-axis coefficients back to the original X axis.
fn unscale_polynomial(ls: &LeastSquares, scale: f64, s2: f64) -> PolynomialParams {
    let p = ls.beta.len();
    let factors: Vec<f64> = (0..p).map(|k| scale.powi(k as i32)).collect();
    let coeffs: Vec<f64> = ls.beta.iter().zip(&factors).map(|(b, f)| b / f).collect();

    let covariance: Vec<Vec<f64>> = match &ls.unscaled_covariance {
        Some(c) => (0..p)
            .map(|i| (0..p).map(|j| s2 * c[(i, j)] / (factors[i] * factors[j])).collect())
            .collect(),
        None => vec![vec![f64::NAN; p]; p],
    };
    let sigmas = (0..p).map(|i| covariance[i][i].max(0.0).sqrt()).collect();

    PolynomialParams {
        constant: coeffs[0],
        terms: coeffs[1..].to_vec(),
        sigmas,
        covariance,
    }
}

fn params_finite(p: &PolynomialParams) -> bool {
    p.constant.is_finite() && p.terms.iter().all(|v| v.is_finite())
}

fn failed_polynomial(model: ModelKind, n: usize, reason: &str) -> FitResult {
    let p = model.param_count();
    FitResult {
        model,
        params: FitParams::Polynomial(PolynomialParams {
            constant: 0.0,
            terms: vec![0.0; p - 1],
            sigmas: vec![f64::NAN; p],
            covariance: vec![vec![f64::NAN; p]; p],
        }),
        converged: false,
        quality: failed_quality(n),
        diagnostic: Some(reason.to_string()),
    }
}

fn failed_spline(model: ModelKind, n: usize, at: f64, knots: usize, reason: &str) -> FitResult {
    let at = if at.is_finite() { at } else { 0.0 };
    FitResult {
        model,
        params: FitParams::Spline(BSpline {
            degree: SPLINE_DEGREE,
            knots: clamped_uniform_knots(at, at, knots, SPLINE_DEGREE),
            coefficients: vec![0.0; model.param_count()],
        }),
        converged: false,
        quality: failed_quality(n),
        diagnostic: Some(reason.to_string()),
    }
}

fn failed_quality(n: usize) -> FitQuality {
    FitQuality {
        sse: f64::NAN,
        rmse: f64::NAN,
        s2: f64::NAN,
        bic: f64::INFINITY,
        n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_on_positive_tail_recovers_slope_and_constant() {
        let x: Vec<f64> = (5..=10).map(|v| v as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.1 * v + 2.0).collect();
        let fit = fit_polynomial(Branch::Up, &x, &y, 1).unwrap();
        let p = fit.polynomial().unwrap();
        assert!(fit.converged);
        assert!((p.terms[0] - 0.1).abs() < 1e-10);
        assert!((p.constant - 2.0).abs() < 1e-10);
        assert!(fit.quality.sse < 1e-20);
    }

    #[test]
    fn uncertainties_match_textbook_line_fit() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [0.1, 0.9, 2.1, 2.9, 4.2];
        let fit = fit_polynomial(Branch::Up, &x, &y, 1).unwrap();
        let p = fit.polynomial().unwrap();

        // sigma_slope^2 = s2 / Σ(x - x̄)^2
        let s2 = fit.quality.s2;
        let sxx = 10.0;
        assert!((p.sigmas[1] - (s2 / sxx).sqrt()).abs() < 1e-10);
        // sigma_const^2 = s2 (1/n + x̄^2 / Sxx)
        let expected = (s2 * (1.0 / 5.0 + 4.0 / sxx)).sqrt();
        assert!((p.sigmas[0] - expected).abs() < 1e-10);
    }

    #[test]
    fn large_field_values_stay_well_conditioned() {
        let x: Vec<f64> = (0..40).map(|i| 8000.0 + 50.0 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 2e-4 * v - 1e-9 * v * v).collect();
        let fit = fit_polynomial(Branch::Down, &x, &y, 2).unwrap();
        let p = fit.polynomial().unwrap();
        assert!(fit.converged);
        assert!((p.terms[0] - 2e-4).abs() < 1e-9);
        assert!((p.terms[1] + 1e-9).abs() < 1e-13);
    }

    #[test]
    fn too_few_samples_is_an_error() {
        let err = fit_polynomial(Branch::Up, &[1.0, 2.0], &[1.0, 2.0], 2).unwrap_err();
        assert_eq!(
            err,
            LoopError::InsufficientSamples {
                branch: Branch::Up,
                found: 2,
                required: 3
            }
        );
    }

    #[test]
    fn repeated_x_is_rank_deficient_not_an_error() {
        let fit = fit_polynomial(Branch::Up, &[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0], 1).unwrap();
        assert!(!fit.converged);
        assert!(fit.diagnostic.unwrap().contains("rank"));
    }

    #[test]
    fn nan_sample_does_not_converge() {
        let fit = fit_polynomial(Branch::Up, &[1.0, 2.0, 3.0], &[1.0, f64::NAN, 3.0], 1).unwrap();
        assert!(!fit.converged);
    }

    #[test]
    fn spline_interpolates_smooth_curve() {
        let x: Vec<f64> = (0..200).map(|i| -2.0 + 4.0 * i as f64 / 199.0).collect();
        let y: Vec<f64> = x.iter().map(|v: &f64| v.tanh()).collect();
        let opts = SplineOptions {
            knots: 10,
            ..SplineOptions::default()
        };
        let fit = fit_spline(Branch::Up, &x, &y, &opts).unwrap();
        assert!(fit.converged);
        let s = fit.spline().unwrap();
        for &v in &[-1.5, -0.3, 0.0, 0.7, 1.9] {
            assert!((s.eval(v) - v.tanh()).abs() < 1e-3, "x={v}");
        }
    }

    #[test]
    fn spline_accepts_unsorted_input() {
        let x: Vec<f64> = (0..60).rev().map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let fit = fit_spline(Branch::Down, &x, &y, &SplineOptions { knots: 4, ..Default::default() })
            .unwrap();
        assert!(fit.converged);
        assert!((fit.predict(3.0) - 9.0).abs() < 1e-6);
    }

    #[test]
    fn smoothing_search_hits_target_sse() {
        let x: Vec<f64> = (0..120).map(|i| i as f64 / 20.0).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| v.sin() + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();
        let opts = SplineOptions {
            knots: 12,
            smoothing: 0.5,
            max_iter: 100,
            tol: 1e-3,
        };
        let fit = fit_spline(Branch::Up, &x, &y, &opts).unwrap();
        assert!(fit.converged, "{:?}", fit.diagnostic);
        assert!((fit.quality.sse - 0.5).abs() <= 0.5e-3 + 1e-12);
    }

    #[test]
    fn degenerate_spline_subset_reports_non_convergence() {
        let x = vec![1.0; 20];
        let y: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let fit = fit_spline(Branch::Up, &x, &y, &SplineOptions { knots: 3, ..Default::default() })
            .unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.diagnostic.as_deref(), Some("zero X span"));
    }

    #[test]
    fn spline_needs_knots_plus_four_samples() {
        let x: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let err = fit_spline(Branch::Up, &x, &x, &SplineOptions { knots: 2, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, LoopError::InsufficientSamples { required: 6, .. }));
    }

    #[test]
    fn region_fit_dispatches_on_model_spec() {
        let x: Vec<f64> = (-10..=10).map(|v| v as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v + 1.0).collect();
        let ds = LoopDataset::new(x.clone(), y.clone(), x, y).unwrap();
        let region = Region::new(Branch::Up, 2.0, 10.0);
        let fit = fit_region(
            &ds,
            &region,
            ModelSpec::AutoPolynomial { max_degree: 3 },
            &SplineOptions::default(),
        )
        .unwrap();
        assert_eq!(fit.model, ModelKind::Polynomial { degree: 1 });
        assert!((fit.polynomial().unwrap().constant - 1.0).abs() < 1e-9);
    }

    #[test]
    fn auto_degree_region_reports_the_selection_minimum() {
        let x = vec![1.0, 2.0, 3.0, 8.0];
        let ds = LoopDataset::new(x.clone(), x.clone(), x.clone(), x).unwrap();
        let region = Region::new(Branch::Up, 0.0, 5.0);
        let err = fit_region(
            &ds,
            &region,
            ModelSpec::AutoPolynomial { max_degree: 2 },
            &SplineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LoopError::InsufficientSamples {
                branch: Branch::Up,
                found: 3,
                required: 4
            }
        );
    }
}
