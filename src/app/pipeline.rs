//! Shared "correction pipeline" logic used by the CLI and the integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! CSV ingest -> correction steps (version chain) -> metrics -> routing
//!
//! The CLI can then focus on presentation (printing, plots, JSON).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::correct::{CorrectionStep, LoopCorrector};
use crate::domain::{DatasetVersion, FieldFrame, LoopDataset, Provenance, VersionChain};
use crate::error::AppError;
use crate::io::{extract_loop, load_or_create, read_table, write_table_csv, LoopColumns};
use crate::metrics::{derive_for, DerivedMetricsResult, MetricsOptions};
use crate::route::{route, DestinationGrid, GridMapping, RouteReport};

/// Where and how the corrected series are written.
#[derive(Debug, Clone)]
pub struct Destination {
    pub path: PathBuf,
    pub grid: DestinationGrid,
    pub mapping: GridMapping,
}

/// Everything a correction run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub columns: LoopColumns,
    pub steps: Vec<CorrectionStep>,
    /// How many times the step list is applied.
    pub passes: usize,
    pub metrics: MetricsOptions,
    pub destination: Option<Destination>,
}

/// All computed outputs of a single `hyloop correct` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub chain: VersionChain,
    pub raw_metrics: DerivedMetricsResult,
    pub metrics: DerivedMetricsResult,
    pub route_report: Option<RouteReport>,
}

/// Execute the full pipeline: load, correct, derive metrics, route.
pub fn run_correction(config: &RunConfig) -> Result<RunOutput, AppError> {
    let table = read_table(&config.input)?;
    let dataset = extract_loop(&table, &config.columns)?;

    let mut output = correct_dataset(dataset, &config.steps, config.passes, &config.metrics)?;
    if let Some(dest) = &config.destination {
        let report = route_to_file(&output.chain.head().dataset, dest)?;
        output.route_report = Some(report);
    }
    Ok(output)
}

/// Apply `steps` `passes` times to `dataset` and derive metrics for the raw
/// and the final link.
///
/// Only the first pass moves the field axis; later passes refit the regions.
pub fn correct_dataset(
    dataset: LoopDataset,
    steps: &[CorrectionStep],
    passes: usize,
    metrics: &MetricsOptions,
) -> Result<RunOutput, AppError> {
    if steps.is_empty() {
        return Err(AppError::new(4, "No correction steps given."));
    }
    if passes == 0 {
        return Err(AppError::new(4, "Passes must be >= 1."));
    }

    let mut corrector = LoopCorrector::new(dataset);
    corrector.run_passes(steps, passes)?;
    let chain = corrector.into_chain();

    let raw_metrics = derive_for(chain.raw(), metrics)?;
    let metrics = derive_for(chain.head(), metrics)?;
    Ok(RunOutput {
        chain,
        raw_metrics,
        metrics,
        route_report: None,
    })
}

/// Route `dataset` into the destination CSV, creating it if needed.
///
/// The file is only rewritten when routing succeeds.
pub fn route_to_file(dataset: &LoopDataset, dest: &Destination) -> Result<RouteReport, AppError> {
    let mut table = load_or_create(&dest.path)?;
    let report = route(dataset, &dest.mapping, &dest.grid, &mut table)?;
    write_table_csv(&dest.path, &table)?;
    log::info!(
        "routed {} series into '{}'",
        report.written.len(),
        dest.path.display()
    );
    Ok(report)
}

/// Serializable view of a run for `--report-json`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub input: String,
    pub generated_at: DateTime<Utc>,
    pub iterations: usize,
    pub links: Vec<LinkReport<'a>>,
    pub raw_metrics: &'a DerivedMetricsResult,
    pub metrics: &'a DerivedMetricsResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed: Option<&'a RouteReport>,
}

#[derive(Debug, Serialize)]
pub struct LinkReport<'a> {
    pub version: DatasetVersion,
    pub up_samples: usize,
    pub down_samples: usize,
    pub frame: FieldFrame,
    pub provenance: &'a Provenance,
}

impl RunOutput {
    pub fn report(&self, input: impl Into<String>) -> RunReport<'_> {
        RunReport {
            input: input.into(),
            generated_at: Utc::now(),
            iterations: self.chain.iterations(),
            links: self
                .chain
                .iter()
                .map(|link| LinkReport {
                    version: link.version,
                    up_samples: link.dataset.up.len(),
                    down_samples: link.dataset.down.len(),
                    frame: link.frame,
                    provenance: &link.provenance,
                })
                .collect(),
            raw_metrics: &self.raw_metrics,
            metrics: &self.metrics,
            routed: self.route_report.as_ref(),
        }
    }
}
