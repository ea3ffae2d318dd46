//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - builds correction steps from flags or a recipe
//! - runs the correction pipeline
//! - prints reports/plots
//! - writes optional routed CSV and JSON reports

use clap::Parser;

use crate::cli::{
    Command, CorrectArgs, InputArgs, MetricsArgs, PlotArgs, SampleArgs, SplineArgs,
};
use crate::correct::{CorrectionStep, DependentShift, TransformSpec};
use crate::domain::{
    Branch, DatasetVersion, LoopDataset, ModelSpec, Region, Slot, SplineOptions,
};
use crate::error::AppError;
use crate::io::{LoopColumns, Recipe};
use crate::metrics::{AnisotropyCriterion, MetricsOptions};
use crate::route::{DestinationGrid, GridMapping};

pub mod pipeline;

use pipeline::{Destination, RunConfig};

/// Entry point for the `hyloop` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Correct(args) => handle_correct(args),
        Command::Metrics(args) => handle_metrics(args),
        Command::Sample(args) => handle_sample(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn handle_correct(args: CorrectArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args)?;
    let run = pipeline::run_correction(&config)?;
    let source = config.input.display().to_string();

    println!(
        "{}",
        crate::report::format_run_summary(
            &source,
            &run.chain,
            &run.raw_metrics,
            &run.metrics,
            run.route_report.as_ref(),
        )
    );

    if args.plot.plot && !args.plot.no_plot {
        let plot = crate::plot::render_loop_plot(
            Some(&run.chain.raw().dataset),
            &run.chain.head().dataset,
            args.plot.width,
            args.plot.height,
        );
        println!("{plot}");
    }

    if let Some(path) = &args.report_json {
        crate::io::write_json(path, &run.report(source))?;
    }
    Ok(())
}

fn handle_metrics(args: MetricsArgs) -> Result<(), AppError> {
    let dataset = load_loop(&args.input)?;
    let opts = metrics_options(&args.spline)?;
    let metrics = crate::metrics::derive_metrics(&dataset, DatasetVersion::Raw, &opts)?;

    println!("{}", crate::report::format_metrics(&metrics));
    if let Some(path) = &args.report_json {
        crate::io::write_json(path, &metrics)?;
    }
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let opts = crate::data::SampleOptions {
        n: args.samples,
        field_max: args.field_max,
        hc: args.hc,
        width: args.width,
        offset: args.offset,
        slope: args.slope,
        curvature: args.curvature,
        noise: args.noise,
        seed: args.seed,
    };
    let dataset = crate::data::generate_loop(&opts)?;

    let mut table = crate::io::ColumnTable::new();
    for slot in Slot::ALL {
        table.set_column(&slot.to_string(), dataset.series(slot).to_vec());
    }
    for branch in Branch::ALL {
        if let Some(sigma) = &dataset.branch(branch).sigma {
            table.set_column(&format!("{}-sigma", branch.tag()), sigma.clone());
        }
    }
    crate::io::write_table_csv(&args.output, &table)?;
    log::info!(
        "wrote synthetic loop ({} samples per branch) to '{}'",
        opts.n,
        args.output.display()
    );
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let dataset = load_loop(&args.input)?;
    let plot = crate::plot::render_loop_plot(None, &dataset, args.width, args.height);
    println!("{plot}");
    Ok(())
}

fn load_loop(input: &InputArgs) -> Result<LoopDataset, AppError> {
    let table = crate::io::read_table(&input.input)?;
    crate::io::extract_loop(&table, &loop_columns(input)?)
}

fn loop_columns(input: &InputArgs) -> Result<LoopColumns, AppError> {
    let names = match &input.columns {
        Some(cols) => Some(<[String; 4]>::try_from(cols.clone()).map_err(|cols| {
            AppError::new(2, format!("--columns needs 4 names, got {}.", cols.len()))
        })?),
        None => None,
    };
    let sigma = match &input.sigma_columns {
        Some(cols) => Some(<[String; 2]>::try_from(cols.clone()).map_err(|cols| {
            AppError::new(2, format!("--sigma-columns needs 2 names, got {}.", cols.len()))
        })?),
        None => None,
    };
    Ok(LoopColumns { names, sigma })
}

fn spline_options(args: &SplineArgs) -> SplineOptions {
    SplineOptions {
        knots: args.knots,
        smoothing: args.smoothing,
        ..SplineOptions::default()
    }
}

fn anisotropy_criterion(args: &SplineArgs) -> AnisotropyCriterion {
    match args.saturation_fraction {
        Some(fraction) => AnisotropyCriterion::SaturationFraction { fraction },
        None => AnisotropyCriterion::BranchClosure {
            threshold: args.closure_threshold,
        },
    }
}

fn metrics_options(args: &SplineArgs) -> Result<MetricsOptions, AppError> {
    let mut coercive_regions = Vec::new();
    if let Some((lo, hi)) = args.coercive_up {
        coercive_regions.push(Region::new(Branch::Up, lo, hi));
    }
    if let Some((lo, hi)) = args.coercive_down {
        coercive_regions.push(Region::new(Branch::Down, lo, hi));
    }
    let opts = MetricsOptions {
        spline: spline_options(args),
        anisotropy: anisotropy_criterion(args),
        coercive_regions,
    };
    opts.anisotropy.validate()?;
    Ok(opts)
}

/// Build the correction step described by the step flags.
pub fn step_from_args(args: &CorrectArgs) -> Result<CorrectionStep, AppError> {
    let mut regions = Vec::new();
    for (lo, hi) in [args.neg_range, args.pos_range].into_iter().flatten() {
        for branch in Branch::ALL {
            regions.push(Region::new(branch, lo, hi));
        }
    }

    let model = match args.auto_degree {
        Some(max_degree) => ModelSpec::AutoPolynomial { max_degree },
        None => ModelSpec::Polynomial {
            degree: args.degree,
        },
    };

    let mut step = CorrectionStep::new("cli", regions, model);
    step.transform = TransformSpec {
        shift: args.shift,
        scale: args.scale,
        targets: if args.targets.is_empty() {
            Slot::field_slots()
        } else {
            args.targets.clone()
        },
    };
    step.normalize = args.normalize;
    step.normalize_endpoints = args.normalize_endpoints;
    step.invert = args.invert.clone();
    step.close_loop = args.close_loop;
    step.symmetrize = args.symmetrize;
    step.spline = spline_options(&args.spline);
    step.dependent_shift = match (args.second_shift, args.center_anisotropy) {
        (Some(amount), _) => Some(DependentShift::Fixed { amount }),
        (None, true) => Some(DependentShift::AnisotropyCenter {
            criterion: anisotropy_criterion(&args.spline),
        }),
        (None, false) => None,
    };
    step.validate()?;
    Ok(step)
}

/// Resolve flags and the optional recipe into a `RunConfig`.
///
/// Precedence: explicit CLI routing flags, then the recipe, then defaults
/// (identity mapping, slot names as destination columns).
pub fn run_config_from_args(args: &CorrectArgs) -> Result<RunConfig, AppError> {
    let columns = loop_columns(&args.input)?;

    let recipe: Option<Recipe> = match &args.recipe {
        Some(path) => Some(crate::io::load_recipe(path)?),
        None => None,
    };

    let (steps, passes, metrics) = match &recipe {
        Some(r) => (r.steps.clone(), r.passes, r.metrics.clone()),
        None => (
            vec![step_from_args(args)?],
            args.iterations,
            metrics_options(&args.spline)?,
        ),
    };

    let destination = match &args.dest_file {
        Some(path) => {
            let grid = match (&args.dest_columns, recipe.as_ref().and_then(|r| r.destination.clone())) {
                (Some(names), _) => DestinationGrid::from_names(names)?,
                (None, Some(grid)) => grid,
                (None, None) => {
                    let names: Vec<String> = Slot::ALL.iter().map(Slot::to_string).collect();
                    DestinationGrid::from_names(&names)?
                }
            };
            let mapping = if !args.routes.is_empty() {
                GridMapping {
                    routes: args.routes.clone(),
                }
            } else {
                recipe
                    .as_ref()
                    .and_then(|r| r.routes.clone())
                    .unwrap_or_else(GridMapping::identity)
            };
            mapping.validate()?;
            Some(Destination {
                path: path.clone(),
                grid,
                mapping,
            })
        }
        None => {
            if args.dest_columns.is_some() || !args.routes.is_empty() {
                return Err(AppError::new(4, "--dest-columns and --map require --dest-file."));
            }
            None
        }
    };

    Ok(RunConfig {
        input: args.input.input.clone(),
        columns,
        steps,
        passes,
        metrics,
        destination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn correct_args(extra: &[&str]) -> CorrectArgs {
        let mut argv = vec!["hyloop", "correct", "-i", "loop.csv"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Correct(args) => args,
            _ => panic!("expected correct"),
        }
    }

    #[test]
    fn tail_ranges_become_two_regions_per_branch() {
        let args = correct_args(&["--neg-range", "-10,-5", "--pos-range", "10,5", "--normalize"]);
        let step = step_from_args(&args).unwrap();
        assert_eq!(step.regions.len(), 4);
        assert_eq!(step.regions[3], Region::new(Branch::Down, 5.0, 10.0));
        assert!(step.normalize);
        assert_eq!(step.model, ModelSpec::Polynomial { degree: 1 });
    }

    #[test]
    fn axis_flags_reach_the_step() {
        let args = correct_args(&[
            "--invert",
            "up-x,down-x",
            "--close-loop",
            "--normalize-endpoints",
            "--symmetrize",
        ]);
        let step = step_from_args(&args).unwrap();
        assert_eq!(step.invert, vec![Slot::UP_X, Slot::DOWN_X]);
        assert!(step.close_loop && step.normalize_endpoints && step.symmetrize);
        assert!(step.regions.is_empty());
    }

    #[test]
    fn both_normalizations_conflict_on_the_command_line() {
        let argv = ["hyloop", "correct", "-i", "loop.csv", "--normalize", "--normalize-endpoints"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn empty_step_is_rejected_with_exit_4() {
        let args = correct_args(&[]);
        assert_eq!(step_from_args(&args).unwrap_err().exit_code(), 4);
    }

    #[test]
    fn routing_defaults_to_identity_and_slot_names() {
        let args = correct_args(&["--shift", "1", "--dest-file", "out.csv"]);
        let config = run_config_from_args(&args).unwrap();
        let dest = config.destination.unwrap();
        assert_eq!(dest.mapping, GridMapping::identity());
        assert_eq!(dest.grid.column(Slot::DOWN_Y), Some("down-y"));
        assert_eq!(config.passes, 1);
    }

    #[test]
    fn map_without_destination_is_rejected() {
        let args = correct_args(&["--shift", "1", "--map", "up-x=down-x"]);
        assert_eq!(run_config_from_args(&args).unwrap_err().exit_code(), 4);
    }

    #[test]
    fn center_anisotropy_uses_the_selected_criterion() {
        let args = correct_args(&[
            "--pos-range",
            "5,10",
            "--center-anisotropy",
            "--saturation-fraction",
            "0.9",
        ]);
        let step = step_from_args(&args).unwrap();
        assert_eq!(
            step.dependent_shift,
            Some(DependentShift::AnisotropyCenter {
                criterion: AnisotropyCriterion::SaturationFraction { fraction: 0.9 }
            })
        );
    }
}
