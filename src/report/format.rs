//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting and correction code stays clean and testable
//! - output changes are localized (important for snapshot tests)

use crate::domain::{FitParams, FitResult, LoopDataset, VersionChain};
use crate::metrics::{
    AnisotropyField, BranchCrossings, DerivedMetricsResult, LocalCoercivity, LoopMetric,
};
use crate::route::RouteReport;

/// `value(err)` with the error rounded to its leading digit, e.g. `1.23(2)`.
///
/// Values of magnitude `>= 1e4` or `< 1e-3` use a shared exponent:
/// `1.23(3)e7`, `5.6(1)e-5`. A non-positive or non-finite error prints the
/// value alone.
pub fn format_value_error(value: f64, err: f64) -> String {
    if !value.is_finite() {
        return format!("{value}");
    }
    if !(err.is_finite() && err > 0.0) {
        return format!("{value:.6}");
    }
    let exponent = if value == 0.0 { 0 } else { decade(value.abs()) };
    if !(-3..=3).contains(&exponent) {
        let scale = 10f64.powi(exponent);
        return format!("{}e{exponent}", fixed_value_error(value / scale, err / scale));
    }
    fixed_value_error(value, err)
}

fn decade(v: f64) -> i32 {
    // Nudge so that values like 0.09999999999999999 land in the right decade.
    (v.log10() + 1e-12).floor() as i32
}

fn fixed_value_error(value: f64, err: f64) -> String {
    let mut decimals = (-decade(err)).max(0) as usize;
    if decimals > 0 && (err * 10f64.powi(decimals as i32)).round() >= 10.0 {
        decimals -= 1;
    }
    let digits = (err * 10f64.powi(decimals as i32)).round() as i64;
    format!("{value:.decimals$}({digits})")
}

/// One line describing a fit: model, status, quality and parameters.
pub fn format_fit(fit: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<8}", fit.model.display_name()));
    if !fit.converged {
        out.push_str(&format!(
            " NOT CONVERGED ({})",
            fit.diagnostic.as_deref().unwrap_or("no diagnostic")
        ));
        return out;
    }
    out.push_str(&format!(
        " n={} SSE={:.4e} RMSE={:.4e}",
        fit.quality.n, fit.quality.sse, fit.quality.rmse
    ));
    match &fit.params {
        FitParams::Polynomial(p) => {
            let sigma = |k: usize| p.sigmas.get(k).copied().unwrap_or(f64::NAN);
            out.push_str(&format!(" c0={}", format_value_error(p.constant, sigma(0))));
            for (k, &c) in p.terms.iter().enumerate() {
                out.push_str(&format!(" c{}={}", k + 1, format_value_error(c, sigma(k + 1))));
            }
        }
        FitParams::Spline(s) => {
            let (lo, hi) = s.domain();
            out.push_str(&format!(
                " coefficients={} x=[{lo:.4}, {hi:.4}]",
                s.coefficients.len()
            ));
        }
    }
    out
}

/// Every link of the chain with its fits, skipped operations and notes.
pub fn format_chain(chain: &VersionChain) -> String {
    let mut out = String::new();
    out.push_str("Version chain:\n");
    for (i, link) in chain.iter().enumerate() {
        let p = &link.provenance;
        let source = p
            .source
            .map(|s| format!(" <- [{s}]"))
            .unwrap_or_default();
        out.push_str(&format!(
            "[{i}] {}{source} '{}' ({})\n",
            link.version,
            p.label,
            p.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        for rf in &p.fits {
            out.push_str(&format!("    fit {}: {}\n", rf.region, format_fit(&rf.fit)));
        }
        for skip in &p.skipped {
            out.push_str(&format!("    skipped {}: {}\n", skip.operation, skip.reason));
        }
        for note in &p.notes {
            out.push_str(&format!("    note: {note}\n"));
        }
        if !link.frame.is_identity() {
            out.push_str(&format!(
                "    field: up x' = {}x{:+}, down x' = {}x{:+}\n",
                link.frame.up.scale, link.frame.up.offset, link.frame.down.scale, link.frame.down.offset
            ));
        }
    }
    out
}

/// Coercive field, remanence, anisotropy field and local coercivity fits.
pub fn format_metrics(result: &DerivedMetricsResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Metrics ({}):\n", result.coercive.version));
    out.push_str(&format_loop_metric("Hc", "bias", &result.coercive.value));
    out.push_str(&format_loop_metric("Mr", "offset", &result.remanence.value));
    match &result.anisotropy.value {
        AnisotropyField::Available {
            negative,
            positive,
            mean,
            uncertainty,
        } => {
            out.push_str(&format!(
                "- Hk: {} (fields {negative:.6} / {positive:.6})\n",
                format_value_error(*mean, *uncertainty)
            ));
        }
        AnisotropyField::Unavailable { reason } => {
            out.push_str(&format!("- Hk: unavailable ({reason})\n"));
        }
    }
    for local in &result.local_coercivity {
        match &local.value {
            LocalCoercivity::Available { region, value } => out.push_str(&format!(
                "- Hc fit {region}: {}\n",
                format_value_error(value.value, value.sigma)
            )),
            LocalCoercivity::Unavailable { region, reason } => {
                out.push_str(&format!("- Hc fit {region}: unavailable ({reason})\n"));
            }
        }
    }
    out
}

fn format_loop_metric(name: &str, offset_name: &str, metric: &LoopMetric) -> String {
    match (metric.value, metric.offset) {
        (Some(value), Some(offset)) => format!(
            "- {name}: {value:.6} ({offset_name} {offset:.6}) up={} down={}\n",
            fmt_crossings(&metric.up),
            fmt_crossings(&metric.down)
        ),
        _ => format!(
            "- {name}: n/a (no crossings) up={} down={}\n",
            fmt_crossings(&metric.up),
            fmt_crossings(&metric.down)
        ),
    }
}

fn fmt_crossings(c: &BranchCrossings) -> String {
    fmt_vec(&c.crossings)
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

/// Format the full run summary (input, chain, metrics before/after, routing).
pub fn format_run_summary(
    source: &str,
    chain: &VersionChain,
    raw_metrics: &DerivedMetricsResult,
    metrics: &DerivedMetricsResult,
    routed: Option<&RouteReport>,
) -> String {
    let mut out = String::new();

    out.push_str("=== hyloop - Hysteresis Loop Correction ===\n");
    out.push_str(&format!("Input: {source}\n"));
    out.push_str(&format_dataset_line("Raw", &chain.raw().dataset));
    out.push_str(&format_dataset_line("Head", &chain.head().dataset));
    out.push_str(&format!("Iterations: {}\n\n", chain.iterations()));

    out.push_str(&format_chain(chain));
    out.push('\n');
    out.push_str(&format_metrics(raw_metrics));
    if chain.len() > 1 {
        out.push_str(&format_metrics(metrics));
    }

    if let Some(report) = routed {
        out.push_str("\nRouted:\n");
        for (slot, column, n) in &report.written {
            out.push_str(&format!("- {slot} -> '{column}' ({n} samples)\n"));
        }
    }
    out
}

fn format_dataset_line(name: &str, dataset: &LoopDataset) -> String {
    let (lo, hi) = dataset
        .up
        .x
        .iter()
        .chain(&dataset.down.x)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = if lo <= hi {
        format!("x=[{lo:.4}, {hi:.4}]")
    } else {
        "x=[]".to_string()
    };
    format!(
        "{name}: up n={} | down n={} | {range}\n",
        dataset.up.len(),
        dataset.down.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Branch, DatasetVersion};
    use crate::fit::fit_polynomial;
    use crate::metrics::{derive_metrics, MetricsOptions};

    #[test]
    fn value_error_uses_leading_error_digit() {
        assert_eq!(format_value_error(1.234, 0.02), "1.23(2)");
        assert_eq!(format_value_error(1235.0, 12.0), "1235(12)");
        assert_eq!(format_value_error(-0.5012, 0.0031), "-0.501(3)");
        assert_eq!(format_value_error(1.2, 0.096), "1.2(1)");
    }

    #[test]
    fn value_error_switches_to_shared_exponent() {
        assert_eq!(format_value_error(12_300_000.0, 300_000.0), "1.23(3)e7");
        assert_eq!(format_value_error(5.6e-5, 1e-6), "5.6(1)e-5");
    }

    #[test]
    fn value_error_without_uncertainty() {
        assert_eq!(format_value_error(2.0, 0.0), "2.000000");
        assert_eq!(format_value_error(2.0, f64::NAN), "2.000000");
    }

    #[test]
    fn fit_line_shows_constant_and_terms() {
        let x = vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let y: Vec<f64> = x.iter().map(|v| 0.1 * v + 2.0).collect();
        let fit = fit_polynomial(Branch::Up, &x, &y, 1).unwrap();
        let line = format_fit(&fit);
        assert!(line.starts_with("poly1"), "{line}");
        assert!(line.contains("c0="), "{line}");
        assert!(line.contains("c1="), "{line}");
    }

    #[test]
    fn metrics_report_names_the_version() {
        let ds = LoopDataset::new(
            vec![-1.0, 1.0],
            vec![-1.0, 1.0],
            vec![1.0, -1.0],
            vec![1.0, -1.0],
        )
        .unwrap();
        let m = derive_metrics(&ds, DatasetVersion::Raw, &MetricsOptions::default()).unwrap();
        let txt = format_metrics(&m);
        assert!(txt.starts_with("Metrics (raw):"), "{txt}");
        assert!(txt.contains("- Hc: 0.000000"), "{txt}");
        assert!(txt.contains("- Hk: unavailable"), "{txt}");
    }
}
