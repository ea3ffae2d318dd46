//! Polynomial degree selection using BIC with guardrails.
//!
//! Each candidate degree is fitted and scored with:
//! - SSE / RMSE
//! - BIC = n * ln(SSE/n) + k * ln(n)
//!
//! Selection rules:
//! 1. Exclude underdetermined degrees: require `n >= k + 2`
//! 2. Choose the converged fit with minimum BIC
//! 3. If a lower degree is within 2 BIC points of the best, pick the lower degree

use rayon::prelude::*;

use crate::domain::{Branch, FitResult, ModelKind, MIN_N_BUFFER};
use crate::error::LoopError;
use crate::fit::fitter::fit_polynomial;

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct DegreeSelection {
    pub best: FitResult,
    /// Fits for all attempted degrees (after guardrails), lowest degree first.
    pub fits: Vec<FitResult>,
    /// Degrees that were skipped and why.
    pub skipped: Vec<(ModelKind, String)>,
}

/// Fit degrees `1..=max_degree` and select the best one.
pub fn fit_and_select(
    branch: Branch,
    x: &[f64],
    y: &[f64],
    max_degree: usize,
) -> Result<DegreeSelection, LoopError> {
    if max_degree == 0 {
        return Err(LoopError::invalid("max_degree", "must be at least 1"));
    }
    let n = x.len().min(y.len());

    let mut degrees = Vec::new();
    let mut skipped = Vec::new();
    for degree in 1..=max_degree {
        let kind = ModelKind::Polynomial { degree };
        let k = kind.param_count();
        if n < k + MIN_N_BUFFER {
            skipped.push((
                kind,
                format!("Underdetermined: n={n} < k+{MIN_N_BUFFER}={}", k + MIN_N_BUFFER),
            ));
            continue;
        }
        degrees.push(degree);
    }

    if degrees.is_empty() {
        return Err(LoopError::InsufficientSamples {
            branch,
            found: n,
            required: 2 + MIN_N_BUFFER,
        });
    }

    // Candidates are independent; fit them in parallel and keep degree order.
    let fits: Vec<FitResult> = degrees
        .par_iter()
        .map(|&degree| fit_polynomial(branch, x, y, degree))
        .collect::<Result<_, _>>()?;

    let best = select_by_bic(&fits);
    Ok(DegreeSelection {
        best,
        fits,
        skipped,
    })
}

pub(crate) fn bic(n: usize, sse: f64, k: usize) -> f64 {
    let n_f = n as f64;
    let sse_per = (sse / n_f).max(1e-12);
    n_f * sse_per.ln() + (k as f64) * n_f.ln()
}

/// `fits` must be non-empty and ordered by increasing degree.
fn select_by_bic(fits: &[FitResult]) -> FitResult {
    let converged: Vec<&FitResult> = fits.iter().filter(|f| f.converged).collect();
    let Some(&first) = converged.first() else {
        return fits[0].clone();
    };

    let mut best = first;
    for &f in &converged[1..] {
        if f.quality.bic < best.quality.bic {
            best = f;
        }
    }

    // Prefer simplicity if within 2 BIC points.
    let best_bic = best.quality.bic;
    converged
        .iter()
        .find(|f| f.quality.bic <= best_bic + 2.0)
        .map(|f| (*f).clone())
        .unwrap_or_else(|| best.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitParams, FitQuality, PolynomialParams};

    fn stub(degree: usize, bic: f64, converged: bool) -> FitResult {
        FitResult {
            model: ModelKind::Polynomial { degree },
            params: FitParams::Polynomial(PolynomialParams {
                constant: 0.0,
                terms: vec![0.0; degree],
                sigmas: vec![],
                covariance: vec![],
            }),
            converged,
            quality: FitQuality {
                sse: 1.0,
                rmse: 0.0,
                s2: 0.0,
                bic,
                n: 100,
            },
            diagnostic: None,
        }
    }

    #[test]
    fn bic_prefers_simpler_when_close() {
        let fits = vec![stub(1, 10.0, true), stub(2, 8.5, true), stub(3, 20.0, true)];
        assert_eq!(select_by_bic(&fits).model, ModelKind::Polynomial { degree: 1 });

        let fits = vec![stub(1, 10.0, true), stub(2, 5.0, true)];
        assert_eq!(select_by_bic(&fits).model, ModelKind::Polynomial { degree: 2 });
    }

    #[test]
    fn non_converged_fits_are_never_selected() {
        let fits = vec![stub(1, 10.0, true), stub(2, -100.0, false)];
        assert_eq!(select_by_bic(&fits).model, ModelKind::Polynomial { degree: 1 });
    }

    #[test]
    fn selects_quadratic_on_curved_tail() {
        let x: Vec<f64> = (0..30).map(|i| 5.0 + i as f64 * 0.2).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 1.0 + 0.3 * v - 0.05 * v * v + if i % 2 == 0 { 1e-4 } else { -1e-4 })
            .collect();
        let sel = fit_and_select(Branch::Up, &x, &y, 3).unwrap();
        assert_eq!(sel.fits.len(), 3);
        assert_eq!(sel.best.model, ModelKind::Polynomial { degree: 2 });
    }

    #[test]
    fn skips_underdetermined_degrees() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sel = fit_and_select(Branch::Down, &x, &y, 4).unwrap();
        assert_eq!(sel.fits.len(), 2);
        assert_eq!(sel.skipped.len(), 2);

        let err = fit_and_select(Branch::Down, &x[..3], &y[..3], 2).unwrap_err();
        assert!(matches!(err, LoopError::InsufficientSamples { found: 3, .. }));
    }
}
