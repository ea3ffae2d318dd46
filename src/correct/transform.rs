//! Dataset transforms: drift subtraction, normalization and field shift/scale.
//!
//! Every function here is pure: it takes a dataset by reference and returns a
//! new one.
//!
//! Ordering rules:
//! - axis inversion and loop closure act on the data as measured
//! - the subtract-correction runs next, on the whole branch
//! - `TransformSpec` applies `v' = (v - shift) * scale`, shift first, so shift
//!   amounts are always given in the unscaled coordinates
//! - a dependent shift and symmetrization run last and only when every fit
//!   they depend on converged

use serde::{Deserialize, Serialize};

use crate::domain::{
    Axis, Branch, BranchData, FieldFrame, FitResult, LoopDataset, PolynomialParams, RegionFit,
    SkippedOp, Slot,
};
use crate::error::LoopError;

/// One elementary field operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldOp {
    /// `v - a`
    Shift(f64),
    /// `v * k`
    Scale(f64),
}

/// Apply `ops` in order to every slot in `targets`.
///
/// Scaling a Y slot scales its uncertainty series by `|k|`.
pub fn apply_field_ops(dataset: &LoopDataset, ops: &[FieldOp], targets: &[Slot]) -> LoopDataset {
    let mut out = dataset.clone();
    for branch in Branch::ALL {
        let mut data = out.branch(branch).clone();
        for axis in [Axis::X, Axis::Y] {
            if !targets.contains(&Slot::new(branch, axis)) {
                continue;
            }
            for op in ops {
                let values = match axis {
                    Axis::X => &mut data.x,
                    Axis::Y => &mut data.y,
                };
                match *op {
                    FieldOp::Shift(a) => values.iter_mut().for_each(|v| *v -= a),
                    FieldOp::Scale(k) => {
                        values.iter_mut().for_each(|v| *v *= k);
                        if axis == Axis::Y {
                            if let Some(sigma) = data.sigma.as_mut() {
                                sigma.iter_mut().for_each(|s| *s *= k.abs());
                            }
                        }
                    }
                }
            }
        }
        out = out.with_branch(branch, data);
    }
    out
}

/// `frame` after `ops` were applied to `targets`. Only X slots move the frame.
pub fn frame_after(frame: FieldFrame, ops: &[FieldOp], targets: &[Slot]) -> FieldFrame {
    let mut out = frame;
    for branch in Branch::ALL {
        if !targets.contains(&Slot::new(branch, Axis::X)) {
            continue;
        }
        let map = ops.iter().fold(out.axis(branch), |map, op| match *op {
            FieldOp::Shift(a) => map.shifted(a),
            FieldOp::Scale(k) => map.scaled(k),
        });
        out = out.with_axis(branch, map);
    }
    out
}

/// Negate every slot in `targets`.
pub fn invert_axes(dataset: &LoopDataset, targets: &[Slot]) -> LoopDataset {
    apply_field_ops(dataset, &[FieldOp::Scale(-1.0)], targets)
}

fn default_targets() -> Vec<Slot> {
    Slot::field_slots()
}

fn default_scale() -> f64 {
    1.0
}

/// Shift/scale applied after the subtract-correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Subtracted before scaling, in unscaled coordinates.
    #[serde(default)]
    pub shift: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_targets")]
    pub targets: Vec<Slot>,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            shift: 0.0,
            scale: 1.0,
            targets: default_targets(),
        }
    }
}

impl TransformSpec {
    pub fn is_identity(&self) -> bool {
        self.shift == 0.0 && self.scale == 1.0
    }

    pub fn validate(&self) -> Result<(), LoopError> {
        if !self.shift.is_finite() {
            return Err(LoopError::invalid("shift", "must be finite"));
        }
        if !(self.scale.is_finite() && self.scale != 0.0) {
            return Err(LoopError::invalid("scale", "must be finite and non-zero"));
        }
        Ok(())
    }

    /// The elementary operations, shift first and scale last.
    pub fn ops(&self) -> Vec<FieldOp> {
        let mut ops = Vec::with_capacity(2);
        if self.shift != 0.0 {
            ops.push(FieldOp::Shift(self.shift));
        }
        if self.scale != 1.0 {
            ops.push(FieldOp::Scale(self.scale));
        }
        ops
    }

    pub fn apply(&self, dataset: &LoopDataset) -> Result<LoopDataset, LoopError> {
        self.validate()?;
        Ok(apply_field_ops(dataset, &self.ops(), &self.targets))
    }
}

/// A dataset plus the operations that were requested but not applied.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub dataset: LoopDataset,
    pub skipped: Vec<SkippedOp>,
    /// Field shift that was actually applied, if any.
    pub shifted_by: Option<f64>,
}

impl TransformOutcome {
    pub fn applied(dataset: LoopDataset) -> Self {
        Self {
            dataset,
            skipped: Vec::new(),
            shifted_by: None,
        }
    }

    /// `dataset` unchanged, with the reason `operation` was not applied.
    pub fn skipped(dataset: LoopDataset, operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            dataset,
            skipped: vec![SkippedOp {
                operation: operation.into(),
                reason: reason.into(),
            }],
            shifted_by: None,
        }
    }
}

fn first_unconverged(upstream: &[&FitResult]) -> Option<String> {
    upstream.iter().find(|f| !f.converged).map(|failed| {
        format!(
            "upstream {} fit did not converge: {}",
            failed.model.display_name(),
            failed.diagnostic.as_deref().unwrap_or("no diagnostic")
        )
    })
}

/// Shift `targets` by `amount`, but only if every fit in `upstream` converged.
///
/// Otherwise the dataset passes through unchanged and the skip is recorded.
pub fn apply_dependent_shift(
    dataset: LoopDataset,
    amount: f64,
    targets: &[Slot],
    upstream: &[&FitResult],
) -> TransformOutcome {
    let operation = format!("dependent shift by {amount}");
    if let Some(reason) = first_unconverged(upstream) {
        return TransformOutcome::skipped(dataset, operation, reason);
    }
    if !amount.is_finite() {
        return TransformOutcome::skipped(dataset, operation, "shift amount is not finite");
    }
    TransformOutcome {
        dataset: apply_field_ops(&dataset, &[FieldOp::Shift(amount)], targets),
        skipped: Vec::new(),
        shifted_by: Some(amount),
    }
}

/// Replace both branches by the antisymmetric average of their splines.
///
/// With `u`, `d` the up and down splines, `s(x) = (u(x) - d(-x))/2`; the up
/// branch becomes `s(x)` and the down branch `-s(-x)` at the measured fields.
/// Skipped unless both splines converged.
pub fn symmetrize(dataset: LoopDataset, up: &FitResult, down: &FitResult) -> TransformOutcome {
    let operation = "symmetrize";
    if let Some(reason) = first_unconverged(&[up, down]) {
        return TransformOutcome::skipped(dataset, operation, reason);
    }
    let (Some(su), Some(sd)) = (up.spline(), down.spline()) else {
        return TransformOutcome::skipped(dataset, operation, "needs B-spline fits of both branches");
    };
    let s = |x: f64| 0.5 * (su.eval(x) - sd.eval(-x));

    let mut out = dataset;
    out.up.y = out.up.x.iter().map(|&x| s(x)).collect();
    out.down.y = out.down.x.iter().map(|&x| -s(-x)).collect();
    TransformOutcome::applied(out)
}

/// Close the end-point gap between the branches with a linear drift ramp.
///
/// Samples are paired by field order. The larger of the two end gaps is
/// removed: each branch moves by half the gap at that end, tapering linearly
/// to zero at the other end.
pub fn close_loop(dataset: &LoopDataset) -> Result<LoopDataset, LoopError> {
    let n = dataset.up.len();
    if dataset.down.len() != n {
        return Err(LoopError::invalid(
            "loop closure",
            format!("branches need equal length, got {n} and {}", dataset.down.len()),
        ));
    }
    if n < 2 {
        return Err(LoopError::Degenerate {
            branch: Branch::Up,
            reason: "loop closure needs at least 2 samples per branch".to_string(),
        });
    }

    let mut up = field_ordered(&dataset.up.y, &dataset.up.x);
    let mut down = field_ordered(&dataset.down.y, &dataset.down.x);
    let last = n - 1;
    let gap_start = (up[0] - down[0]).abs();
    let gap_stop = (up[last] - down[last]).abs();
    if !(gap_start.is_finite() && gap_stop.is_finite()) {
        return Err(LoopError::Degenerate {
            branch: Branch::Up,
            reason: "loop end points are not finite".to_string(),
        });
    }

    // The ramp is full at the end with the larger gap and zero at the other.
    let (gap, anchor) = if gap_start > gap_stop {
        (gap_start, 0)
    } else if gap_stop > gap_start {
        (gap_stop, last)
    } else {
        return Ok(dataset.clone());
    };
    let sign = if up[anchor] > down[anchor] { -1.0 } else { 1.0 };
    for i in 0..n {
        let ramp = 0.5 * gap * (last - i.abs_diff(anchor)) as f64 / last as f64;
        up[i] += sign * ramp;
        down[i] -= sign * ramp;
    }

    let mut out = dataset.clone();
    out.up.y = field_ordered(&up, &dataset.up.x);
    out.down.y = field_ordered(&down, &dataset.down.x);
    Ok(out)
}

/// `values` in ascending-field order (reversed when the sweep descends).
/// Applying it twice restores the original order.
fn field_ordered(values: &[f64], x: &[f64]) -> Vec<f64> {
    let descending = match (x.iter().find(|v| v.is_finite()), x.iter().rev().find(|v| v.is_finite())) {
        (Some(first), Some(last)) => first > last,
        _ => false,
    };
    if descending {
        values.iter().rev().copied().collect()
    } else {
        values.to_vec()
    }
}

/// Samples averaged at each end of a branch by `normalize_endpoints`.
pub const ENDPOINT_WINDOW: usize = 5;

/// Centre the loop and scale it to unit amplitude from its end-point averages.
///
/// The saturation level at each field end is the mean of both branches'
/// `ENDPOINT_WINDOW` outermost samples there; `y' = (y - mid) / half` with
/// `mid`, `half` the centre and half-distance of the two levels.
pub fn normalize_endpoints(dataset: &LoopDataset) -> Result<LoopDataset, LoopError> {
    let mut low = Vec::with_capacity(2);
    let mut high = Vec::with_capacity(2);
    for branch in Branch::ALL {
        let data = dataset.branch(branch);
        if data.is_empty() {
            return Err(LoopError::Degenerate {
                branch,
                reason: "cannot normalize an empty branch".to_string(),
            });
        }
        let ordered = field_ordered(&data.y, &data.x);
        let w = ENDPOINT_WINDOW.min(ordered.len());
        low.push(mean(&ordered[..w]));
        high.push(mean(&ordered[ordered.len() - w..]));
    }
    let (low, high) = (mean(&low), mean(&high));
    let mid = 0.5 * (low + high);
    let half = 0.5 * (high - low).abs();
    if !(half > 0.0 && half.is_finite() && mid.is_finite()) {
        return Err(LoopError::Degenerate {
            branch: Branch::Up,
            reason: format!("end-point levels {low} and {high} give no amplitude"),
        });
    }

    let mut out = dataset.clone();
    for branch in Branch::ALL {
        let mut data = out.branch(branch).clone();
        data.y.iter_mut().for_each(|y| *y = (*y - mid) / half);
        if let Some(sigma) = data.sigma.as_mut() {
            sigma.iter_mut().for_each(|s| *s /= half);
        }
        out = out.with_branch(branch, data);
    }
    Ok(out)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// The polynomial parameters of a fit that may be used to modify data.
pub fn require_polynomial<'a>(
    fit: &'a FitResult,
    branch: Branch,
    operation: &str,
) -> Result<&'a PolynomialParams, LoopError> {
    let Some(params) = fit.polynomial() else {
        return Err(LoopError::UnsupportedModel {
            operation: operation.to_string(),
            model: fit.model.display_name(),
        });
    };
    if !fit.converged {
        return Err(LoopError::FitNotConverged {
            branch,
            reason: fit
                .diagnostic
                .clone()
                .unwrap_or_else(|| "fit did not converge".to_string()),
        });
    }
    Ok(params)
}

/// `y' = y - (p(x) - c)` on every sample of `branch`, with `c` the constant term.
pub fn subtract_fit(
    dataset: &LoopDataset,
    branch: Branch,
    fit: &FitResult,
) -> Result<LoopDataset, LoopError> {
    let params = require_polynomial(fit, branch, "drift subtraction")?;
    let s2 = fit.quality.s2;
    let data = correct_branch(dataset.branch(branch), |_| (params, s2));
    Ok(dataset.with_branch(branch, data))
}

/// Two-sided correction: samples below the midpoint between the two regions
/// use `lower`, the others use `upper`.
pub fn subtract_tail_fits(
    dataset: &LoopDataset,
    branch: Branch,
    lower: &RegionFit,
    upper: &RegionFit,
) -> Result<LoopDataset, LoopError> {
    let (lower, upper) = ordered_tails(lower, upper);
    let lo_params = require_polynomial(&lower.fit, branch, "tail subtraction")?;
    let up_params = require_polynomial(&upper.fit, branch, "tail subtraction")?;
    let split = tail_split(lower, upper);
    let (lo_s2, up_s2) = (lower.fit.quality.s2, upper.fit.quality.s2);

    let data = correct_branch(dataset.branch(branch), |x| {
        if x < split {
            (lo_params, lo_s2)
        } else {
            (up_params, up_s2)
        }
    });
    Ok(dataset.with_branch(branch, data))
}

/// Map the saturation constants of a tail pair to `-1`/`+1`:
/// `y' = (y - q1) · 2/(|q1| + |q2|) + sign(q1)`.
pub fn normalize(
    dataset: &LoopDataset,
    branch: Branch,
    lower_constant: f64,
    upper_constant: f64,
) -> Result<LoopDataset, LoopError> {
    let q1 = lower_constant;
    let denom = q1.abs() + upper_constant.abs();
    let factor = 2.0 / denom;
    if !(denom > 0.0 && factor.is_finite()) {
        return Err(LoopError::Degenerate {
            branch,
            reason: format!(
                "cannot normalize with saturation constants {q1} and {upper_constant}"
            ),
        });
    }
    let sign = if q1 > 0.0 {
        1.0
    } else if q1 < 0.0 {
        -1.0
    } else {
        0.0
    };

    let mut data = dataset.branch(branch).clone();
    data.y.iter_mut().for_each(|y| *y = (*y - q1) * factor + sign);
    if let Some(sigma) = data.sigma.as_mut() {
        sigma.iter_mut().for_each(|s| *s *= factor);
    }
    Ok(dataset.with_branch(branch, data))
}

/// Order a tail pair by region position.
pub fn ordered_tails<'a>(a: &'a RegionFit, b: &'a RegionFit) -> (&'a RegionFit, &'a RegionFit) {
    if a.region.lo <= b.region.lo { (a, b) } else { (b, a) }
}

/// Split point between two tail regions.
pub fn tail_split(lower: &RegionFit, upper: &RegionFit) -> f64 {
    0.5 * (lower.region.hi + upper.region.lo)
}

fn correct_branch<'a, F>(data: &BranchData, pick: F) -> BranchData
where
    F: Fn(f64) -> (&'a PolynomialParams, f64),
{
    let mut y = Vec::with_capacity(data.len());
    let mut sigma = Vec::with_capacity(data.len());
    for (i, (&x, &yi)) in data.x.iter().zip(&data.y).enumerate() {
        let (params, s2) = pick(x);
        y.push(yi - params.functional(x));
        let si = data.sigma_at(i);
        sigma.push((si * si + s2 + params.functional_sigma(x).powi(2)).sqrt());
    }
    BranchData {
        x: data.x.clone(),
        y,
        sigma: Some(sigma),
    }
}
