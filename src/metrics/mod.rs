//! Derived loop metrics: coercive field, remanence and anisotropy field.
//!
//! Everything here is read-only over a dataset. Each value is tagged with the
//! `DatasetVersion` it was computed from.
//!
//! - Coercive field: X where a branch's Y crosses zero
//! - Remanence: Y where a branch's X crosses zero
//! - Anisotropy field: where the two branch splines close (or saturate)
//!
//! Crossings use linear interpolation between bracketing samples; a sample
//! sitting exactly on the level counts once.

use serde::{Deserialize, Serialize};

use crate::domain::{
    Branch, DatasetVersion, FitResult, LoopDataset, LoopVersion, Measurement, ModelSpec, Region,
    SplineOptions,
};
use crate::error::LoopError;
use crate::fit::{fit_polynomial, fit_spline};
use crate::math::{lerp_root, linspace, median};

/// Evaluation grid used for the anisotropy criteria.
pub const ANISOTROPY_GRID: usize = 5000;

/// Values of `a` at every point where `b` crosses `level`, in sample order.
pub fn crossings(a: &[f64], b: &[f64], level: f64) -> Vec<f64> {
    let n = a.len().min(b.len());
    let mut out = Vec::new();
    for i in 0..n {
        if !(a[i].is_finite() && b[i].is_finite()) {
            continue;
        }
        if b[i] == level {
            out.push(a[i]);
            continue;
        }
        let j = i + 1;
        if j >= n || !(a[j].is_finite() && b[j].is_finite()) || b[j] == level {
            continue;
        }
        if (b[i] - level) * (b[j] - level) < 0.0 {
            if let Some(v) = lerp_root(a[i], b[i], a[j], b[j], level) {
                out.push(v);
            }
        }
    }
    out
}

/// Crossings of one branch and their median.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCrossings {
    pub crossings: Vec<f64>,
    pub primary: Option<f64>,
}

impl BranchCrossings {
    fn from_values(crossings: Vec<f64>) -> Self {
        let primary = median(&crossings);
        Self { crossings, primary }
    }
}

/// A loop quantity combined from both branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopMetric {
    pub up: BranchCrossings,
    pub down: BranchCrossings,
    /// Half-width of the loop (`Hc` or `Mr`).
    pub value: Option<f64>,
    /// Loop centre along the same axis (exchange bias for `Hc`).
    pub offset: Option<f64>,
}

/// `Hc = (up - down)/2`, bias `(up + down)/2`.
pub fn coercive_field(dataset: &LoopDataset) -> LoopMetric {
    let up = BranchCrossings::from_values(crossings(&dataset.up.x, &dataset.up.y, 0.0));
    let down = BranchCrossings::from_values(crossings(&dataset.down.x, &dataset.down.y, 0.0));
    combine(up, down, |u, d| (u - d) / 2.0)
}

/// `Mr = (down - up)/2`, offset `(up + down)/2`.
pub fn remanence(dataset: &LoopDataset) -> LoopMetric {
    let up = BranchCrossings::from_values(crossings(&dataset.up.y, &dataset.up.x, 0.0));
    let down = BranchCrossings::from_values(crossings(&dataset.down.y, &dataset.down.x, 0.0));
    combine(up, down, |u, d| (d - u) / 2.0)
}

fn combine(up: BranchCrossings, down: BranchCrossings, width: fn(f64, f64) -> f64) -> LoopMetric {
    let (value, offset) = match (up.primary, down.primary) {
        (Some(u), Some(d)) => (Some(width(u, d)), Some((u + d) / 2.0)),
        _ => (None, None),
    };
    LoopMetric {
        up,
        down,
        value,
        offset,
    }
}

/// Rule that decides where a loop is closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AnisotropyCriterion {
    /// Relative branch difference `|(u - d)/u|` falls below `threshold`.
    BranchClosure { threshold: f64 },
    /// Both branches are within `fraction` of their end-point saturation.
    SaturationFraction { fraction: f64 },
}

impl Default for AnisotropyCriterion {
    fn default() -> Self {
        AnisotropyCriterion::BranchClosure { threshold: 0.02 }
    }
}

impl AnisotropyCriterion {
    pub fn validate(&self) -> Result<(), LoopError> {
        match *self {
            AnisotropyCriterion::BranchClosure { threshold } => {
                if !(threshold.is_finite() && threshold > 0.0) {
                    return Err(LoopError::invalid("closure threshold", "must be > 0"));
                }
            }
            AnisotropyCriterion::SaturationFraction { fraction } => {
                if !(fraction > 0.0 && fraction < 1.0) {
                    return Err(LoopError::invalid("saturation fraction", "must be in (0, 1)"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AnisotropyField {
    Available {
        negative: f64,
        positive: f64,
        /// `(positive - negative)/2`
        mean: f64,
        /// `|positive + negative|/2`
        uncertainty: f64,
    },
    Unavailable {
        reason: String,
    },
}

impl AnisotropyField {
    fn unavailable(reason: impl Into<String>) -> Self {
        AnisotropyField::Unavailable {
            reason: reason.into(),
        }
    }

    fn from_fields(negative: f64, positive: f64) -> Self {
        AnisotropyField::Available {
            negative,
            positive,
            mean: 0.5 * (positive - negative),
            uncertainty: (0.5 * (positive + negative)).abs(),
        }
    }

    /// Loop centre `(negative + positive)/2`, if available.
    pub fn center(&self) -> Option<f64> {
        match *self {
            AnisotropyField::Available {
                negative, positive, ..
            } => Some(0.5 * (negative + positive)),
            AnisotropyField::Unavailable { .. } => None,
        }
    }
}

/// Cubic B-spline over the full finite X range of `branch`.
pub fn branch_spline(
    dataset: &LoopDataset,
    branch: Branch,
    opts: &SplineOptions,
) -> Result<FitResult, LoopError> {
    let data = dataset.branch(branch);
    let (lo, hi) = data
        .x
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return Err(LoopError::EmptyRegion { branch, lo, hi });
    }
    let region = Region::new(branch, lo, hi);
    let spec = ModelSpec::CubicBSpline { knots: opts.knots };
    let (x, y) = region.samples(dataset, spec.min_samples())?;
    fit_spline(branch, &x, &y, opts)
}

/// Anisotropy field from the spline fits of both branches.
pub fn anisotropy_field(
    up: &FitResult,
    down: &FitResult,
    criterion: AnisotropyCriterion,
) -> AnisotropyField {
    for (branch, fit) in [(Branch::Up, up), (Branch::Down, down)] {
        if !fit.converged {
            return AnisotropyField::unavailable(format!(
                "{branch} spline did not converge: {}",
                fit.diagnostic.as_deref().unwrap_or("no diagnostic")
            ));
        }
    }
    let (Some(su), Some(sd)) = (up.spline(), down.spline()) else {
        return AnisotropyField::unavailable("anisotropy needs B-spline fits of both branches");
    };
    if let Err(err) = criterion.validate() {
        return AnisotropyField::unavailable(err.to_string());
    }

    let (ulo, uhi) = su.domain();
    let (dlo, dhi) = sd.domain();
    let (lo, hi) = (ulo.max(dlo), uhi.min(dhi));
    if !(hi > lo) {
        return AnisotropyField::unavailable("branches do not overlap in field");
    }
    let grid = linspace(lo, hi, ANISOTROPY_GRID);
    let u: Vec<f64> = grid.iter().map(|&x| su.eval(x)).collect();
    let d: Vec<f64> = grid.iter().map(|&x| sd.eval(x)).collect();

    match criterion {
        AnisotropyCriterion::BranchClosure { threshold } => branch_closure(&grid, &u, &d, threshold),
        AnisotropyCriterion::SaturationFraction { fraction } => {
            saturation_fraction(&grid, &u, &d, fraction)
        }
    }
}

fn branch_closure(grid: &[f64], u: &[f64], d: &[f64], threshold: f64) -> AnisotropyField {
    let diff: Vec<f64> = u
        .iter()
        .zip(d)
        .map(|(u, d)| {
            let r = ((u - d) / u).abs();
            if r.is_finite() { r } else { f64::INFINITY }
        })
        .collect();

    // Widest opening of the loop; ties resolve to the first index.
    let mut peak = 0;
    for (i, v) in diff.iter().enumerate() {
        if v.is_finite() && (!diff[peak].is_finite() || *v > diff[peak]) {
            peak = i;
        }
    }

    let negative = (0..peak)
        .filter(|&i| diff[i] < threshold)
        .map(|i| grid[i])
        .fold(f64::NEG_INFINITY, f64::max);
    let positive = (peak + 1..grid.len())
        .filter(|&i| diff[i] < threshold)
        .map(|i| grid[i])
        .fold(f64::INFINITY, f64::min);

    if !negative.is_finite() || !positive.is_finite() {
        return AnisotropyField::unavailable(format!(
            "branches never close below {threshold} on both sides"
        ));
    }
    AnisotropyField::from_fields(negative, positive)
}

fn saturation_fraction(grid: &[f64], u: &[f64], d: &[f64], fraction: f64) -> AnisotropyField {
    let mut negative = f64::INFINITY;
    let mut positive = f64::NEG_INFINITY;
    for curve in [u, d] {
        let n = curve.len();
        let mid = 0.5 * (curve[0] + curve[n - 1]);
        let half = 0.5 * (curve[n - 1] - curve[0]);
        if !(half.is_finite() && half != 0.0) {
            return AnisotropyField::unavailable("branch has no saturation contrast");
        }
        let m = |i: usize| (curve[i] - mid) / half;

        // Outermost field still saturated on each side.
        let first_free = (0..n).find(|&i| m(i) > -fraction).unwrap_or(n);
        let last_free = (0..n).rev().find(|&i| m(i) < fraction).unwrap_or(0);
        if first_free == 0 || last_free + 1 >= n {
            return AnisotropyField::unavailable(format!(
                "branch never saturates within {fraction} of its end points"
            ));
        }
        negative = negative.min(grid[first_free - 1]);
        positive = positive.max(grid[last_free + 1]);
    }
    AnisotropyField::from_fields(negative, positive)
}

/// Zero crossing of a straight line fitted in `region`: `Hc = -c0/c1`.
pub fn coercive_from_fit(dataset: &LoopDataset, region: &Region) -> Result<Measurement, LoopError> {
    let (x, y) = region.samples(dataset, 2)?;
    let fit = fit_polynomial(region.branch, &x, &y, 1)?;
    if !fit.converged {
        return Err(LoopError::FitNotConverged {
            branch: region.branch,
            reason: fit.diagnostic.unwrap_or_default(),
        });
    }
    let Some(p) = fit.polynomial() else {
        return Err(LoopError::UnsupportedModel {
            operation: "coercivity fit".to_string(),
            model: fit.model.display_name(),
        });
    };
    let (c0, c1) = (p.constant, p.terms[0]);
    if c1 == 0.0 {
        return Err(LoopError::Degenerate {
            branch: region.branch,
            reason: format!("flat line in {region} has no zero crossing"),
        });
    }
    let value = -c0 / c1;
    let var = p.covariance[0][0] / (c1 * c1) + c0 * c0 * p.covariance[1][1] / c1.powi(4)
        - 2.0 * c0 * p.covariance[0][1] / c1.powi(3);
    Ok(Measurement {
        value,
        sigma: var.max(0.0).sqrt(),
    })
}

/// A value together with the dataset version it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<T> {
    pub value: T,
    pub version: DatasetVersion,
}

/// Line-fit coercive field of one region; a failing region does not abort
/// the other metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum LocalCoercivity {
    Available { region: Region, value: Measurement },
    Unavailable { region: Region, reason: String },
}

impl LocalCoercivity {
    pub fn region(&self) -> &Region {
        match self {
            LocalCoercivity::Available { region, .. } | LocalCoercivity::Unavailable { region, .. } => {
                region
            }
        }
    }
}

/// Options for `derive_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsOptions {
    pub spline: SplineOptions,
    pub anisotropy: AnisotropyCriterion,
    /// Regions for line-fit coercivity estimates, in raw field units.
    pub coercive_regions: Vec<Region>,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            spline: SplineOptions::default(),
            anisotropy: AnisotropyCriterion::default(),
            coercive_regions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetricsResult {
    pub coercive: Tagged<LoopMetric>,
    pub remanence: Tagged<LoopMetric>,
    pub anisotropy: Tagged<AnisotropyField>,
    pub local_coercivity: Vec<Tagged<LocalCoercivity>>,
}

/// Derive all metrics from a version-chain link.
///
/// Coercivity regions are located on the link through its field frame.
pub fn derive_for(link: &LoopVersion, opts: &MetricsOptions) -> Result<DerivedMetricsResult, LoopError> {
    let located = MetricsOptions {
        coercive_regions: opts.coercive_regions.iter().map(|r| link.frame.locate(r)).collect(),
        ..opts.clone()
    };
    derive_metrics(&link.dataset, link.version, &located)
}

/// Derive all metrics from `dataset`, with regions in its own coordinates.
///
/// Anisotropy and coercivity-fit failures are reported as `Unavailable`;
/// only invalid options are errors.
pub fn derive_metrics(
    dataset: &LoopDataset,
    version: DatasetVersion,
    opts: &MetricsOptions,
) -> Result<DerivedMetricsResult, LoopError> {
    opts.anisotropy.validate()?;
    let tag = |value| Tagged { value, version };

    let anisotropy = match (
        branch_spline(dataset, Branch::Up, &opts.spline),
        branch_spline(dataset, Branch::Down, &opts.spline),
    ) {
        (Ok(up), Ok(down)) => anisotropy_field(&up, &down, opts.anisotropy),
        (Err(err), _) | (_, Err(err)) => AnisotropyField::unavailable(err.to_string()),
    };

    let local_coercivity = opts
        .coercive_regions
        .iter()
        .map(|region| {
            let value = match coercive_from_fit(dataset, region) {
                Ok(value) => LocalCoercivity::Available {
                    region: *region,
                    value,
                },
                Err(err) => {
                    log::warn!("{version}: coercivity fit in {region} failed: {err}");
                    LocalCoercivity::Unavailable {
                        region: *region,
                        reason: err.to_string(),
                    }
                }
            };
            Tagged { value, version }
        })
        .collect();

    Ok(DerivedMetricsResult {
        coercive: tag(coercive_field(dataset)),
        remanence: tag(remanence(dataset)),
        anisotropy: Tagged {
            value: anisotropy,
            version,
        },
        local_coercivity,
    })
}
