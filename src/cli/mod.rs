//! Command-line parsing for the hysteresis loop corrector.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting/correction code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::Slot;
use crate::route::Route;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "hyloop", version, about = "Hysteresis loop drift correction and loop metrics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Correct a loop, print the chain and metrics, optionally route/export.
    Correct(CorrectArgs),
    /// Print derived metrics of a loop without correcting it.
    Metrics(MetricsArgs),
    /// Write a synthetic loop CSV.
    Sample(SampleArgs),
    /// Plot a loop CSV in the terminal.
    Plot(PlotArgs),
}

/// Where the loop comes from.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    /// Input CSV with a header row.
    #[arg(short, long, value_name = "CSV")]
    pub input: PathBuf,

    /// Loop columns in order up-x,up-y,down-x,down-y (default: first four).
    #[arg(long, value_delimiter = ',')]
    pub columns: Option<Vec<String>>,

    /// Per-sample Y uncertainty columns for the up and down branch.
    #[arg(long, value_delimiter = ',')]
    pub sigma_columns: Option<Vec<String>>,
}

/// Cubic B-spline and anisotropy options shared by correction and metrics.
#[derive(Debug, Args, Clone)]
pub struct SplineArgs {
    /// Interior knots of the branch splines.
    #[arg(long, default_value_t = 12)]
    pub knots: usize,

    /// Target residual sum of squares for the spline (0 = plain least squares).
    #[arg(long, default_value_t = 0.0)]
    pub smoothing: f64,

    /// Branch-closure threshold for the anisotropy field.
    #[arg(long, default_value_t = 0.02)]
    pub closure_threshold: f64,

    /// Use the saturation-fraction criterion with this fraction instead.
    #[arg(long, conflicts_with = "closure_threshold")]
    pub saturation_fraction: Option<f64>,

    /// Up-branch region `lo,hi` for a line-fit coercive field.
    #[arg(long, value_parser = parse_range, allow_hyphen_values = true)]
    pub coercive_up: Option<(f64, f64)>,

    /// Down-branch region `lo,hi` for a line-fit coercive field.
    #[arg(long, value_parser = parse_range, allow_hyphen_values = true)]
    pub coercive_down: Option<(f64, f64)>,
}

/// Terminal plot options.
#[derive(Debug, Args, Clone)]
pub struct PlotOptions {
    /// Render an ASCII plot in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[derive(Debug, Args, Clone)]
pub struct CorrectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// JSON recipe (steps, passes, routes, metrics). Replaces the step flags below.
    #[arg(long, value_name = "JSON")]
    pub recipe: Option<PathBuf>,

    /// Negative saturation region `lo,hi`, fitted on both branches.
    #[arg(long, value_parser = parse_range, allow_hyphen_values = true)]
    pub neg_range: Option<(f64, f64)>,

    /// Positive saturation region `lo,hi`, fitted on both branches.
    #[arg(long, value_parser = parse_range, allow_hyphen_values = true)]
    pub pos_range: Option<(f64, f64)>,

    /// Polynomial degree of the tail fits.
    #[arg(short, long, default_value_t = 1)]
    pub degree: usize,

    /// Pick the degree by BIC from 1..=N instead of using `--degree`.
    #[arg(long, value_name = "N")]
    pub auto_degree: Option<usize>,

    /// Field shift applied after the drift correction.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub shift: f64,

    /// Field scale applied last.
    #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
    pub scale: f64,

    /// Slots the shift/scale applies to (default: up-x, down-x).
    #[arg(long = "target", value_name = "SLOT")]
    pub targets: Vec<Slot>,

    /// Map the two tail constants of each branch to ±1.
    #[arg(long)]
    pub normalize: bool,

    /// Centre and scale the loop from the averages of its end points.
    #[arg(long, conflicts_with = "normalize")]
    pub normalize_endpoints: bool,

    /// Negate these slots before fitting (e.g. `up-x,down-x`).
    #[arg(long, value_delimiter = ',', value_name = "SLOT")]
    pub invert: Vec<Slot>,

    /// Remove the gap between the branch end points before fitting.
    #[arg(long)]
    pub close_loop: bool,

    /// Replace the loop by its antisymmetric spline average (spline gated).
    #[arg(long)]
    pub symmetrize: bool,

    /// Passes over the step; passes after the first only refit the regions.
    #[arg(long, default_value_t = 1)]
    pub iterations: usize,

    /// Extra field shift applied only when both branch splines converge.
    #[arg(long, allow_hyphen_values = true, conflicts_with = "center_anisotropy")]
    pub second_shift: Option<f64>,

    /// Centre the loop on its anisotropy fields (spline gated).
    #[arg(long)]
    pub center_anisotropy: bool,

    #[command(flatten)]
    pub spline: SplineArgs,

    /// Destination CSV; loaded if it exists, created otherwise.
    #[arg(long, value_name = "CSV")]
    pub dest_file: Option<PathBuf>,

    /// Destination column names for up-x,up-y,down-x,down-y (default: slot names).
    #[arg(long, value_delimiter = ',')]
    pub dest_columns: Option<Vec<String>>,

    /// Route `source=dest` (e.g. `up-x=down-x`); repeatable. Default: identity.
    #[arg(long = "map", value_name = "ROUTE")]
    pub routes: Vec<Route>,

    /// Write the full run report as JSON.
    #[arg(long, value_name = "JSON")]
    pub report_json: Option<PathBuf>,

    #[command(flatten)]
    pub plot: PlotOptions,
}

#[derive(Debug, Args, Clone)]
pub struct MetricsArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub spline: SplineArgs,

    /// Write the metrics as JSON.
    #[arg(long, value_name = "JSON")]
    pub report_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Output CSV.
    #[arg(short, long, value_name = "CSV")]
    pub output: PathBuf,

    /// Samples per branch.
    #[arg(short = 'n', long, default_value_t = 201)]
    pub samples: usize,

    /// Field sweep half-range.
    #[arg(long, default_value_t = 10.0)]
    pub field_max: f64,

    /// Coercive field of the synthetic loop.
    #[arg(long, default_value_t = 1.5)]
    pub hc: f64,

    /// Switching width.
    #[arg(long, default_value_t = 0.8)]
    pub width: f64,

    /// Constant background.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub offset: f64,

    /// Linear background (drift) slope.
    #[arg(long, default_value_t = 0.05, allow_hyphen_values = true)]
    pub slope: f64,

    /// Quadratic background coefficient.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub curvature: f64,

    /// Gaussian noise on Y (also written as sigma columns when > 0).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct PlotArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

/// Parse `lo,hi` (or `lo:hi`).
pub fn parse_range(s: &str) -> Result<(f64, f64), String> {
    let Some((lo, hi)) = s.split_once(',').or_else(|| s.split_once(':')) else {
        return Err(format!("expected 'lo,hi', got '{s}'"));
    };
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid bound '{}': {e}", v.trim()))
    };
    let (lo, hi) = (parse(lo)?, parse(hi)?);
    if !(lo.is_finite() && hi.is_finite()) {
        return Err(format!("range bounds must be finite, got '{s}'"));
    }
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_parse_with_either_separator() {
        assert_eq!(parse_range("-10,-5"), Ok((-10.0, -5.0)));
        assert_eq!(parse_range(" 5 : 10 "), Ok((5.0, 10.0)));
        assert!(parse_range("5").is_err());
        assert!(parse_range("a,1").is_err());
    }

    #[test]
    fn correct_command_parses_step_flags() {
        let cli = Cli::try_parse_from([
            "hyloop",
            "correct",
            "-i",
            "loop.csv",
            "--neg-range",
            "-10,-5",
            "--pos-range",
            "5,10",
            "--shift",
            "-0.5",
            "--map",
            "up-x=down-x",
            "--map",
            "down-x=up-x",
            "--dest-columns",
            "a,b,c,d",
            "--no-plot",
        ])
        .unwrap();
        let Command::Correct(args) = cli.command else {
            panic!("expected correct");
        };
        assert_eq!(args.neg_range, Some((-10.0, -5.0)));
        assert_eq!(args.shift, -0.5);
        assert_eq!(args.routes.len(), 2);
        assert_eq!(args.routes[0].dest, Slot::DOWN_X);
        assert_eq!(args.dest_columns.as_ref().map(Vec::len), Some(4));
        assert!(args.plot.no_plot);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
