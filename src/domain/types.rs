//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting and correction
//! - exported to JSON reports
//! - loaded from JSON recipes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LoopError;
use crate::math::BSpline;

/// Half of a hysteresis loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    /// Ascending field sweep.
    Up,
    /// Descending field sweep.
    Down,
}

impl Branch {
    pub const ALL: [Branch; 2] = [Branch::Up, Branch::Down];

    pub(crate) fn tag(self) -> &'static str {
        match self {
            Branch::Up => "up",
            Branch::Down => "down",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Up => write!(f, "Up"),
            Branch::Down => write!(f, "Down"),
        }
    }
}

/// Axis within a branch: X is the field, Y the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

/// One cell of the 2×2 (branch × axis) grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slot {
    pub branch: Branch,
    pub axis: Axis,
}

impl Slot {
    pub const UP_X: Slot = Slot::new(Branch::Up, Axis::X);
    pub const UP_Y: Slot = Slot::new(Branch::Up, Axis::Y);
    pub const DOWN_X: Slot = Slot::new(Branch::Down, Axis::X);
    pub const DOWN_Y: Slot = Slot::new(Branch::Down, Axis::Y);

    /// Grid order used for column lists: up-x, up-y, down-x, down-y.
    pub const ALL: [Slot; 4] = [Slot::UP_X, Slot::UP_Y, Slot::DOWN_X, Slot::DOWN_Y];

    pub const fn new(branch: Branch, axis: Axis) -> Self {
        Self { branch, axis }
    }

    /// Both field-axis slots.
    pub fn field_slots() -> Vec<Slot> {
        vec![Slot::UP_X, Slot::DOWN_X]
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = match self.axis {
            Axis::X => "x",
            Axis::Y => "y",
        };
        write!(f, "{}-{axis}", self.branch.tag())
    }
}

impl FromStr for Slot {
    type Err = LoopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        let Some((branch, axis)) = norm.split_once('-') else {
            return Err(LoopError::invalid("slot", format!("'{s}' (expected e.g. up-x, down-y)")));
        };
        let branch = match branch {
            "up" => Branch::Up,
            "down" | "dw" => Branch::Down,
            _ => return Err(LoopError::invalid("slot", format!("unknown branch in '{s}'"))),
        };
        let axis = match axis {
            "x" => Axis::X,
            "y" => Axis::Y,
            _ => return Err(LoopError::invalid("slot", format!("unknown axis in '{s}'"))),
        };
        Ok(Slot::new(branch, axis))
    }
}

impl TryFrom<String> for Slot {
    type Error = LoopError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Slot> for String {
    fn from(value: Slot) -> Self {
        value.to_string()
    }
}

/// The samples of one branch.
///
/// `sigma`, when present, is the 1-σ uncertainty of each Y sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<Vec<f64>>,
}

impl BranchData {
    pub fn new(branch: Branch, x: Vec<f64>, y: Vec<f64>) -> Result<Self, LoopError> {
        if x.len() != y.len() {
            return Err(LoopError::LengthMismatch {
                branch,
                x_len: x.len(),
                y_len: y.len(),
            });
        }
        Ok(Self { x, y, sigma: None })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Uncertainty of sample `i` (0 when no uncertainty series is attached).
    pub fn sigma_at(&self, i: usize) -> f64 {
        self.sigma
            .as_ref()
            .and_then(|s| s.get(i).copied())
            .unwrap_or(0.0)
    }

    pub fn axis(&self, axis: Axis) -> &[f64] {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
        }
    }
}

/// One hysteresis loop: ascending and descending branch.
///
/// Datasets are never mutated by the pipeline; every stage returns a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDataset {
    pub up: BranchData,
    pub down: BranchData,
}

impl LoopDataset {
    pub fn new(
        up_x: Vec<f64>,
        up_y: Vec<f64>,
        down_x: Vec<f64>,
        down_y: Vec<f64>,
    ) -> Result<Self, LoopError> {
        Ok(Self {
            up: BranchData::new(Branch::Up, up_x, up_y)?,
            down: BranchData::new(Branch::Down, down_x, down_y)?,
        })
    }

    pub fn branch(&self, branch: Branch) -> &BranchData {
        match branch {
            Branch::Up => &self.up,
            Branch::Down => &self.down,
        }
    }

    pub fn series(&self, slot: Slot) -> &[f64] {
        self.branch(slot.branch).axis(slot.axis)
    }

    /// Functional update: a copy of `self` with `branch` replaced.
    pub fn with_branch(&self, branch: Branch, data: BranchData) -> Self {
        let mut out = self.clone();
        match branch {
            Branch::Up => out.up = data,
            Branch::Down => out.down = data,
        }
        out
    }
}

/// A branch plus an inclusive X range. Resolution lives in `fit::region`.
///
/// Always stored with `lo <= hi`, also when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegionBounds")]
pub struct Region {
    pub branch: Branch,
    pub lo: f64,
    pub hi: f64,
}

impl Region {
    /// Build a region; a reversed range is normalized to `[min, max]`.
    pub fn new(branch: Branch, lo: f64, hi: f64) -> Self {
        Self {
            branch,
            lo: lo.min(hi),
            hi: lo.max(hi),
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lo && x <= self.hi
    }
}

#[derive(Deserialize)]
struct RegionBounds {
    branch: Branch,
    lo: f64,
    hi: f64,
}

impl From<RegionBounds> for Region {
    fn from(b: RegionBounds) -> Self {
        Region::new(b.branch, b.lo, b.hi)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.branch, self.lo, self.hi)
    }
}

/// Which link of the version chain a value was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum DatasetVersion {
    Raw,
    Corrected { iteration: usize },
}

impl DatasetVersion {
    pub fn iteration(self) -> usize {
        match self {
            DatasetVersion::Raw => 0,
            DatasetVersion::Corrected { iteration } => iteration,
        }
    }

    pub fn next(self) -> Self {
        DatasetVersion::Corrected {
            iteration: self.iteration() + 1,
        }
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetVersion::Raw => write!(f, "raw"),
            DatasetVersion::Corrected { iteration } => write!(f, "corrected-{iteration}"),
        }
    }
}

/// Concrete fitted model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModelKind {
    Polynomial { degree: usize },
    CubicBSpline { knots: usize },
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> String {
        match self {
            ModelKind::Polynomial { degree } => format!("poly{degree}"),
            ModelKind::CubicBSpline { knots } => format!("bspline3({knots} knots)"),
        }
    }

    /// Number of fitted coefficients.
    pub fn param_count(self) -> usize {
        match self {
            ModelKind::Polynomial { degree } => degree + 1,
            ModelKind::CubicBSpline { knots } => knots + 4,
        }
    }

    /// Minimum number of samples the fitter accepts.
    pub fn min_samples(self) -> usize {
        self.param_count()
    }
}

/// Samples a BIC candidate needs beyond its parameter count.
pub const MIN_N_BUFFER: usize = 2;

/// Which model(s) a correction step fits to its regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModelSpec {
    /// Fixed polynomial degree.
    Polynomial { degree: usize },
    /// Try degrees `1..=max_degree` and pick by BIC.
    AutoPolynomial { max_degree: usize },
    /// Only valid for metrics; correction steps reject it.
    CubicBSpline { knots: usize },
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::Polynomial { degree: 1 }
    }
}

impl ModelSpec {
    /// Smallest sample count any candidate model accepts.
    pub fn min_samples(self) -> usize {
        match self {
            ModelSpec::Polynomial { degree } => degree + 1,
            ModelSpec::AutoPolynomial { .. } => {
                ModelKind::Polynomial { degree: 1 }.param_count() + MIN_N_BUFFER
            }
            ModelSpec::CubicBSpline { knots } => knots + 4,
        }
    }
}

/// Cubic B-spline fitting options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineOptions {
    /// Number of interior knots (uniformly spaced over the data span).
    pub knots: usize,
    /// Target residual sum of squares; `0` means a plain least-squares spline.
    pub smoothing: f64,
    /// Iteration cap for the smoothing-weight search.
    pub max_iter: usize,
    /// Relative tolerance on `|SSE - smoothing|`.
    pub tol: f64,
}

impl Default for SplineOptions {
    fn default() -> Self {
        Self {
            knots: 12,
            smoothing: 0.0,
            max_iter: 80,
            tol: 1e-3,
        }
    }
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub sse: f64,
    pub rmse: f64,
    /// Residual variance `SSE / max(n - p, 1)`.
    pub s2: f64,
    pub bic: f64,
    pub n: usize,
}

/// Polynomial coefficients with the constant term kept apart.
///
/// `y(x) = constant + Σ_k terms[k-1] · x^k`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialParams {
    pub constant: f64,
    pub terms: Vec<f64>,
    /// 1-σ uncertainties, index 0 is the constant.
    pub sigmas: Vec<f64>,
    /// Parameter covariance, row-major `p × p` in the same order as `sigmas`.
    pub covariance: Vec<Vec<f64>>,
}

impl PolynomialParams {
    pub fn degree(&self) -> usize {
        self.terms.len()
    }

    /// Full model value.
    pub fn eval(&self, x: f64) -> f64 {
        self.constant + self.functional(x)
    }

    /// The non-constant part: what a drift correction subtracts.
    pub fn functional(&self, x: f64) -> f64 {
        let mut acc = 0.0;
        let mut pow = 1.0;
        for &c in &self.terms {
            pow *= x;
            acc += c * pow;
        }
        acc
    }

    /// Uncertainty of `functional(x)` from the term sigmas (constant excluded).
    pub fn functional_sigma(&self, x: f64) -> f64 {
        let mut total = 0.0;
        let mut pow = 1.0;
        for s in self.sigmas.iter().skip(1) {
            pow *= x;
            total += (pow * s).powi(2);
        }
        total.sqrt()
    }
}

/// Fitted parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FitParams {
    Polynomial(PolynomialParams),
    Spline(BSpline),
}

/// Output of a single fit.
///
/// `converged = false` is a normal outcome: the caller must check it before
/// using the parameters for anything that modifies data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    pub params: FitParams,
    pub converged: bool,
    pub quality: FitQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl FitResult {
    pub fn polynomial(&self) -> Option<&PolynomialParams> {
        match &self.params {
            FitParams::Polynomial(p) => Some(p),
            FitParams::Spline(_) => None,
        }
    }

    pub fn spline(&self) -> Option<&BSpline> {
        match &self.params {
            FitParams::Spline(s) => Some(s),
            FitParams::Polynomial(_) => None,
        }
    }

    pub fn predict(&self, x: f64) -> f64 {
        match &self.params {
            FitParams::Polynomial(p) => p.eval(x),
            FitParams::Spline(s) => s.eval(x),
        }
    }
}

/// A value with a 1-σ uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub sigma: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_text_form_round_trips() {
        for slot in Slot::ALL {
            let parsed: Slot = slot.to_string().parse().unwrap();
            assert_eq!(parsed, slot);
        }
        assert_eq!("DW_Y".parse::<Slot>().unwrap(), Slot::DOWN_Y);
        assert!("left-x".parse::<Slot>().is_err());
        assert!("up".parse::<Slot>().is_err());
    }

    #[test]
    fn dataset_rejects_ragged_branch() {
        let err = LoopDataset::new(vec![1.0, 2.0], vec![1.0], vec![], vec![]).unwrap_err();
        assert!(matches!(err, LoopError::LengthMismatch { branch: Branch::Up, .. }));
    }

    #[test]
    fn reversed_region_is_normalized_when_deserialized() {
        let region: Region = serde_json::from_str(r#"{"branch": "up", "lo": 10, "hi": 5}"#).unwrap();
        assert_eq!(region, Region::new(Branch::Up, 5.0, 10.0));
        assert!(region.contains(7.0));
    }

    #[test]
    fn auto_degree_minimum_matches_selection() {
        let spec = ModelSpec::AutoPolynomial { max_degree: 3 };
        assert_eq!(spec.min_samples(), 4);
    }

    #[test]
    fn with_branch_leaves_source_untouched() {
        let ds = LoopDataset::new(vec![1.0], vec![2.0], vec![3.0], vec![4.0]).unwrap();
        let replaced = BranchData::new(Branch::Down, vec![9.0], vec![9.0]).unwrap();
        let next = ds.with_branch(Branch::Down, replaced);
        assert_eq!(ds.down.x, vec![3.0]);
        assert_eq!(next.down.x, vec![9.0]);
        assert_eq!(next.up, ds.up);
    }

    #[test]
    fn polynomial_functional_excludes_constant() {
        let p = PolynomialParams {
            constant: 2.0,
            terms: vec![0.5, 0.25],
            sigmas: vec![0.1, 0.01, 0.001],
            covariance: vec![],
        };
        assert!((p.eval(2.0) - (2.0 + 1.0 + 1.0)).abs() < 1e-12);
        assert!((p.functional(2.0) - 2.0).abs() < 1e-12);
        let expected = ((2.0 * 0.01_f64).powi(2) + (4.0 * 0.001_f64).powi(2)).sqrt();
        assert!((p.functional_sigma(2.0) - expected).abs() < 1e-15);
    }

    #[test]
    fn version_counts_iterations() {
        let v = DatasetVersion::Raw.next().next();
        assert_eq!(v, DatasetVersion::Corrected { iteration: 2 });
        assert_eq!(v.to_string(), "corrected-2");
    }
}
