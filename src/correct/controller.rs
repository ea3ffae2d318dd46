//! Correction steps over a version chain.
//!
//! A `LoopCorrector` owns the chain of a single loop. `apply` runs one
//! `CorrectionStep` against the head and appends exactly one link, or returns
//! an error and leaves the chain unchanged. There is no automatic convergence
//! loop: re-running a step on corrected data is always an explicit request.
//!
//! Regions are given in raw field units and located on the head through its
//! `FieldFrame`, so the same step keeps fitting the same samples after the
//! field axis was shifted or scaled.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::correct::transform::{
    apply_dependent_shift, close_loop, frame_after, invert_axes, normalize, normalize_endpoints,
    ordered_tails, subtract_fit, subtract_tail_fits, symmetrize, FieldOp, TransformOutcome,
    TransformSpec,
};
use crate::domain::{
    Branch, FieldFrame, FitResult, LoopDataset, LoopVersion, ModelSpec, Provenance, Region,
    RegionFit, SkippedOp, Slot, SplineOptions, VersionChain,
};
use crate::error::LoopError;
use crate::fit::fit_region;
use crate::metrics::{anisotropy_field, branch_spline, AnisotropyCriterion, AnisotropyField};

/// A field shift applied after the field transform, gated on spline fits of
/// the transformed data. Always moves the X slots of both branches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DependentShift {
    Fixed { amount: f64 },
    /// Centre the loop on the midpoint of its anisotropy fields.
    AnisotropyCenter {
        #[serde(default)]
        criterion: AnisotropyCriterion,
    },
}

fn default_label() -> String {
    "correction".to_string()
}

/// One correction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionStep {
    #[serde(default = "default_label")]
    pub label: String,
    /// At most two regions per branch (one per saturation tail), in raw
    /// field units.
    pub regions: Vec<Region>,
    #[serde(default)]
    pub model: ModelSpec,
    #[serde(default)]
    pub transform: TransformSpec,
    /// Map the tail constants of two-region branches to ±1.
    #[serde(default)]
    pub normalize: bool,
    /// Centre and scale the loop from its end-point averages.
    #[serde(default)]
    pub normalize_endpoints: bool,
    /// Slots negated before anything else.
    #[serde(default)]
    pub invert: Vec<Slot>,
    /// Remove the end-point gap between the branches before fitting.
    #[serde(default)]
    pub close_loop: bool,
    #[serde(default)]
    pub dependent_shift: Option<DependentShift>,
    /// Replace the loop by its antisymmetric spline average, last.
    #[serde(default)]
    pub symmetrize: bool,
    /// Spline options for the gated operations.
    #[serde(default)]
    pub spline: SplineOptions,
}

impl CorrectionStep {
    /// A step fitting `model` to `regions` with no field transform.
    pub fn new(label: impl Into<String>, regions: Vec<Region>, model: ModelSpec) -> Self {
        Self {
            label: label.into(),
            regions,
            model,
            transform: TransformSpec::default(),
            normalize: false,
            normalize_endpoints: false,
            invert: Vec::new(),
            close_loop: false,
            dependent_shift: None,
            symmetrize: false,
            spline: SplineOptions::default(),
        }
    }

    fn has_work(&self) -> bool {
        !self.regions.is_empty()
            || !self.transform.is_identity()
            || self.dependent_shift.is_some()
            || !self.invert.is_empty()
            || self.close_loop
            || self.normalize_endpoints
            || self.symmetrize
    }

    pub fn validate(&self) -> Result<(), LoopError> {
        if !self.has_work() {
            return Err(LoopError::invalid("step", "no regions and no transform"));
        }
        for branch in Branch::ALL {
            let count = self.regions.iter().filter(|r| r.branch == branch).count();
            if count > 2 {
                return Err(LoopError::invalid(
                    "regions",
                    format!("{branch} branch has {count} regions, at most 2 are supported"),
                ));
            }
        }
        if self.normalize && self.normalize_endpoints {
            return Err(LoopError::invalid(
                "normalization",
                "tail-constant and end-point normalization are exclusive",
            ));
        }
        if let ModelSpec::CubicBSpline { .. } = self.model {
            return Err(LoopError::UnsupportedModel {
                operation: "drift correction".to_string(),
                model: "cubic B-spline".to_string(),
            });
        }
        if let Some(DependentShift::AnisotropyCenter { criterion }) = &self.dependent_shift {
            criterion.validate()?;
        }
        self.transform.validate()
    }

    /// The same fits for a repeated pass: axis operations already happened in
    /// the first pass and are dropped. `None` when nothing is left to refit.
    pub fn refit(&self) -> Option<CorrectionStep> {
        if self.regions.is_empty() {
            return None;
        }
        Some(CorrectionStep {
            label: format!("{} (refit)", self.label),
            regions: self.regions.clone(),
            model: self.model,
            normalize: self.normalize,
            normalize_endpoints: self.normalize_endpoints,
            spline: self.spline,
            ..CorrectionStep::new("", Vec::new(), self.model)
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoopCorrector {
    chain: VersionChain,
}

impl LoopCorrector {
    pub fn new(raw: LoopDataset) -> Self {
        Self {
            chain: VersionChain::new(raw),
        }
    }

    pub fn chain(&self) -> &VersionChain {
        &self.chain
    }

    pub fn into_chain(self) -> VersionChain {
        self.chain
    }

    pub fn head(&self) -> &LoopVersion {
        self.chain.head()
    }

    /// Run `step` on the head dataset and append the result.
    pub fn apply(&mut self, step: &CorrectionStep) -> Result<&LoopVersion, LoopError> {
        let index = self.chain.len();
        let (dataset, frame, provenance) =
            run_step(self.chain.head(), step).map_err(|e| e.at_step(index, &step.label))?;

        log::info!(
            "step {index} '{}': {} fits, total sse {:.4e}",
            provenance.label,
            provenance.fits.len(),
            provenance.total_sse()
        );
        for skip in &provenance.skipped {
            log::warn!("step {index}: skipped {}: {}", skip.operation, skip.reason);
        }
        Ok(self.chain.push(dataset, frame, provenance))
    }

    /// Run `step` `passes` times in a row.
    pub fn iterate(&mut self, step: &CorrectionStep, passes: usize) -> Result<&LoopVersion, LoopError> {
        self.run_passes(std::slice::from_ref(step), passes)
    }

    /// Run `steps` in order, `passes` times.
    ///
    /// Axis operations (inversion, closure, field transform, dependent shift,
    /// symmetrization) run in the first pass only; later passes refit the same
    /// raw-unit regions and subtract again.
    pub fn run_passes(&mut self, steps: &[CorrectionStep], passes: usize) -> Result<&LoopVersion, LoopError> {
        if passes == 0 {
            return Err(LoopError::invalid("passes", "must be at least 1"));
        }
        if steps.is_empty() {
            return Err(LoopError::invalid("steps", "no correction steps given"));
        }
        for step in steps {
            self.apply(step)?;
        }
        let refits: Vec<CorrectionStep> = steps.iter().filter_map(CorrectionStep::refit).collect();
        if passes > 1 && refits.is_empty() {
            log::warn!("no step has regions; passes 2..{passes} have nothing to refit");
        }
        for _ in 1..passes {
            for step in &refits {
                self.apply(step)?;
            }
        }
        Ok(self.chain.head())
    }

    /// Make link `index` the head again (the chain only grows).
    pub fn reset_to(&mut self, index: usize) -> Result<&LoopVersion, LoopError> {
        let len = self.chain.len();
        if index >= len {
            return Err(LoopError::invalid(
                "version",
                format!("link {index} does not exist (chain has {len})"),
            ));
        }
        log::info!("reset to link {index}");
        self.chain
            .reset_to(index)
            .ok_or_else(|| LoopError::invalid("version", format!("link {index} does not exist")))
    }
}

/// Correct independent loops in parallel, each with its own chain.
pub fn correct_batch(
    datasets: Vec<LoopDataset>,
    steps: &[CorrectionStep],
) -> Vec<Result<VersionChain, LoopError>> {
    datasets
        .into_par_iter()
        .map(|ds| {
            let mut corrector = LoopCorrector::new(ds);
            for step in steps {
                corrector.apply(step)?;
            }
            Ok(corrector.into_chain())
        })
        .collect()
}

fn run_step(
    head: &LoopVersion,
    step: &CorrectionStep,
) -> Result<(LoopDataset, FieldFrame, Provenance), LoopError> {
    step.validate()?;
    let mut provenance = Provenance::new(step.label.clone(), None);
    let mut frame = head.frame;
    let mut dataset = (*head.dataset).clone();

    if !step.invert.is_empty() {
        dataset = invert_axes(&dataset, &step.invert);
        frame = frame_after(frame, &[FieldOp::Scale(-1.0)], &step.invert);
        let slots: Vec<String> = step.invert.iter().map(Slot::to_string).collect();
        provenance.notes.push(format!("inverted {}", slots.join(", ")));
    }
    if step.close_loop {
        dataset = close_loop(&dataset)?;
        provenance.notes.push("closed the loop end gap".to_string());
    }

    let regions: Vec<Region> = step.regions.iter().map(|r| frame.locate(r)).collect();
    // Region fits are independent of each other.
    let fits: Vec<RegionFit> = regions
        .par_iter()
        .map(|region| {
            fit_region(&dataset, region, step.model, &step.spline).map(|fit| RegionFit {
                region: *region,
                fit,
            })
        })
        .collect::<Result<_, _>>()?;

    for branch in Branch::ALL {
        let branch_fits: Vec<&RegionFit> = fits.iter().filter(|f| f.region.branch == branch).collect();
        match branch_fits.as_slice() {
            [] => {}
            [only] => {
                dataset = subtract_fit(&dataset, branch, &only.fit)?;
                if step.normalize {
                    provenance.skipped.push(SkippedOp {
                        operation: format!("normalize {branch}"),
                        reason: "normalization needs two tail regions".to_string(),
                    });
                }
            }
            [a, b] => {
                dataset = subtract_tail_fits(&dataset, branch, a, b)?;
                if step.normalize {
                    let (lower, upper) = ordered_tails(a, b);
                    let q1 = constant_of(&lower.fit);
                    let q2 = constant_of(&upper.fit);
                    dataset = normalize(&dataset, branch, q1, q2)?;
                    provenance
                        .notes
                        .push(format!("{branch}: normalized with q1={q1:.6e}, q2={q2:.6e}"));
                }
            }
            more => {
                return Err(LoopError::invalid(
                    "regions",
                    format!("{branch} branch has {} regions, at most 2 are supported", more.len()),
                ));
            }
        }
    }
    if step.normalize_endpoints {
        dataset = normalize_endpoints(&dataset)?;
        provenance.notes.push("normalized from end-point averages".to_string());
    }

    dataset = step.transform.apply(&dataset)?;
    frame = frame_after(frame, &step.transform.ops(), &step.transform.targets);
    if !step.transform.is_identity() {
        provenance.notes.push(format!(
            "field transform: shift {} then scale {}",
            step.transform.shift, step.transform.scale
        ));
    }

    if let Some(shift) = step.dependent_shift {
        let outcome = dependent_shift(dataset, shift, &step.spline);
        if let Some(amount) = outcome.shifted_by {
            frame = frame_after(frame, &[FieldOp::Shift(amount)], &Slot::field_slots());
            provenance.notes.push(format!("dependent field shift by {amount}"));
        }
        provenance.skipped.extend(outcome.skipped);
        dataset = outcome.dataset;
    }

    if step.symmetrize {
        let outcome = match branch_splines(&dataset, &step.spline) {
            Ok((up, down)) => symmetrize(dataset, &up, &down),
            Err(err) => TransformOutcome::skipped(dataset, "symmetrize", format!("spline fit failed: {err}")),
        };
        if outcome.skipped.is_empty() {
            provenance.notes.push("symmetrized".to_string());
        }
        provenance.skipped.extend(outcome.skipped);
        dataset = outcome.dataset;
    }

    provenance.fits = fits;
    Ok((dataset, frame, provenance))
}

fn constant_of(fit: &FitResult) -> f64 {
    fit.polynomial().map_or(f64::NAN, |p| p.constant)
}

fn branch_splines(dataset: &LoopDataset, opts: &SplineOptions) -> Result<(FitResult, FitResult), LoopError> {
    Ok((
        branch_spline(dataset, Branch::Up, opts)?,
        branch_spline(dataset, Branch::Down, opts)?,
    ))
}

/// Spline-fit both branches of the transformed data and shift the field by
/// `shift` if both converged.
fn dependent_shift(dataset: LoopDataset, shift: DependentShift, spline: &SplineOptions) -> TransformOutcome {
    let operation = match shift {
        DependentShift::Fixed { amount } => format!("dependent shift by {amount}"),
        DependentShift::AnisotropyCenter { .. } => "anisotropy centring".to_string(),
    };
    let (up, down) = match branch_splines(&dataset, spline) {
        Ok(pair) => pair,
        Err(err) => return TransformOutcome::skipped(dataset, operation, format!("spline fit failed: {err}")),
    };

    let targets = Slot::field_slots();
    match shift {
        DependentShift::Fixed { amount } => apply_dependent_shift(dataset, amount, &targets, &[&up, &down]),
        DependentShift::AnisotropyCenter { criterion } => match anisotropy_field(&up, &down, criterion) {
            AnisotropyField::Available {
                negative, positive, ..
            } => {
                let center = 0.5 * (negative + positive);
                apply_dependent_shift(dataset, center, &targets, &[&up, &down])
            }
            AnisotropyField::Unavailable { reason } => TransformOutcome::skipped(dataset, operation, reason),
        },
    }
}
