//! Annotate a topology graph with telemetry

use anyhow::Result;
use chrono::DateTime;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use annotator_lib::{
    export_graph_metrics, filter_graph, AnnotationOptions, Observability, TelemetryAnnotator,
    TelemetryBackend, TimeWindow,
};

use super::{load_graph, save_graph};
use crate::output::{print_info, print_success, print_warning};

/// Options of the `annotate` subcommand
pub struct AnnotateArgs {
    pub graph: PathBuf,
    pub from: i64,
    pub to: i64,
    pub utilization: bool,
    pub saturation: bool,
    pub output: Option<PathBuf>,
    pub export: Option<PathBuf>,
    pub metrics: String,
    pub filter: bool,
}

/// Parse epoch seconds or an RFC 3339 timestamp
pub fn parse_time(value: &str) -> std::result::Result<i64, String> {
    if let Ok(epoch) = value.trim().parse::<i64>() {
        return Ok(epoch);
    }
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.timestamp())
        .map_err(|e| format!("expected epoch seconds or RFC 3339 time: {e}"))
}

pub async fn run(
    args: AnnotateArgs,
    backend: Arc<dyn TelemetryBackend>,
    obs: &Observability,
) -> Result<()> {
    // Reject bad windows and export scopes before touching the backend
    let window = TimeWindow::new(args.from, args.to)?;
    if args.export.is_some() {
        args.metrics.parse::<annotator_lib::MetricScope>()?;
    }

    let graph = load_graph(&args.graph)?;
    let annotator = TelemetryAnnotator::new(backend, obs.clone());
    let options = AnnotationOptions {
        utilization: args.utilization,
        saturation: args.saturation,
    };
    let (mut annotated, summary) = annotator.annotate_window(&graph, window, options).await?;

    print_info(&format!(
        "Annotated {} of {} nodes from {} ({} skipped)",
        summary.annotated.to_string().cyan(),
        annotated.len(),
        annotator.backend().name(),
        summary.skipped
    ));
    if summary.annotated == 0 {
        print_warning("No telemetry found for any node in the requested window");
    }

    if args.filter {
        annotated = filter_graph(&annotated, obs);
        print_info(&format!("{} nodes kept after filtering", annotated.len()));
    }

    if let Some(path) = &args.export {
        let report = export_graph_metrics(&annotated, path, "csv", &args.metrics, obs)?;
        print_success(&format!(
            "Exported {} rows x {} columns to {}",
            report.rows,
            report.columns,
            path.display()
        ));
    }

    match &args.output {
        Some(path) => {
            save_graph(&annotated, path)?;
            print_success(&format!("Annotated graph written to {}", path.display()));
        }
        None => println!("{}", serde_json::to_string_pretty(&annotated)?),
    }

    Ok(())
}
