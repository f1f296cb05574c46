//! Metric listing and export commands

use anyhow::Result;
use std::path::Path;

use annotator_lib::{export_graph_metrics, list_metrics, MetricScope, Observability};

use super::load_graph;
use crate::output::{print_success, print_table, MetricRow, OutputFormat};

/// List the flattened metric names of an annotated graph
pub fn list(graph: &Path, scope: &str, format: OutputFormat) -> Result<()> {
    let scope: MetricScope = scope.parse()?;
    let graph = load_graph(graph)?;

    let rows: Vec<MetricRow> = list_metrics(&graph, scope)
        .iter()
        .map(|name| MetricRow::parse(name))
        .collect();
    print_table(&rows, format);
    Ok(())
}

/// Write the flattened metrics of an annotated graph to a file
pub fn export(graph: &Path, output: &Path, mode: &str, scope: &str, obs: &Observability) -> Result<()> {
    // Mode and scope are checked before the graph is even read
    mode.parse::<annotator_lib::ExportMode>()?;
    scope.parse::<MetricScope>()?;

    let graph = load_graph(graph)?;
    let report = export_graph_metrics(&graph, output, mode, scope, obs)?;
    print_success(&format!(
        "Exported {} rows x {} columns to {}",
        report.rows,
        report.columns,
        output.display()
    ));
    Ok(())
}
