//! Table merge and export
//!
//! Flattens every node-scoped table of an annotated graph into one wide
//! table keyed by timestamp. Each column is named
//! `<node>@<layer>@<type>@<metric>`, with dots in the metric key replaced
//! by underscores; VMs use their `vm_name` as the node part when present.

use crate::error::{AnnotatorError, Result};
use crate::models::{TopologyGraph, TopologyNode};
use crate::observability::Observability;
use crate::table::{TimeTable, TIMESTAMP_COLUMN};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which tables of each node are exported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricScope {
    /// Raw telemetry as fetched
    All,
    Utilization,
    Saturation,
}

impl MetricScope {
    pub const ALL: [MetricScope; 3] = [Self::All, Self::Utilization, Self::Saturation];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Utilization => "utilization",
            Self::Saturation => "saturation",
        }
    }

    /// The table of `node` this scope selects
    pub fn table_of(self, node: &TopologyNode) -> TimeTable {
        match self {
            Self::All => node.telemetry.raw().cloned().unwrap_or_default(),
            Self::Utilization => node.telemetry.utilization_table(),
            Self::Saturation => node.telemetry.saturation_table(),
        }
    }
}

impl fmt::Display for MetricScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricScope {
    type Err = AnnotatorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| AnnotatorError::UnsupportedMetricScope {
                scope: s.to_string(),
                supported: Self::ALL.map(Self::as_str).join(", "),
            })
    }
}

/// Output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    Csv,
}

impl ExportMode {
    pub const ALL: [ExportMode; 1] = [Self::Csv];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ExportMode {
    type Err = AnnotatorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| AnnotatorError::UnsupportedExportMode {
                mode: s.to_string(),
                supported: Self::ALL.map(Self::as_str).join(", "),
            })
    }
}

/// Flattened column name for one metric of one node
pub fn column_name(node: &TopologyNode, metric: &str) -> String {
    format!(
        "{}@{}@{}@{}",
        node.display_name(),
        node.layer,
        node.node_type,
        metric.replace('.', "_")
    )
}

/// Scoped table of `node`, if it has both metric columns and rows
fn exported_table(node: &TopologyNode, scope: MetricScope) -> Option<TimeTable> {
    let table = scope.table_of(node);
    (table.has_metrics() && !table.is_empty()).then_some(table)
}

/// Merge the scoped tables of every node into one wide table.
///
/// Nodes without metric columns or without rows are skipped. Repeated
/// timestamps within a node keep their first row. Rows are ascending by
/// timestamp and a value is missing wherever a node did not report.
pub fn flatten(graph: &TopologyGraph, scope: MetricScope) -> TimeTable {
    graph
        .nodes()
        .filter_map(|node| {
            exported_table(node, scope).map(|table| {
                table
                    .rename_columns(|metric| column_name(node, metric))
                    .dedup_timestamps()
            })
        })
        .fold(TimeTable::new(), |wide, table| wide.outer_join(&table))
}

/// Flattened metric names in graph order, without building the table
pub fn list_metrics(graph: &TopologyGraph, scope: MetricScope) -> Vec<String> {
    graph
        .nodes()
        .filter_map(|node| exported_table(node, scope).map(|table| (node, table)))
        .flat_map(|(node, table)| {
            table
                .column_names()
                .map(|metric| column_name(node, metric))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Destination for a flattened table
pub trait MetricsSink {
    fn save(&self, table: &TimeTable) -> Result<()>;

    /// Human-readable destination, for logs
    fn describe(&self) -> String;
}

/// Writes a wide table as comma-separated values.
///
/// The header is `timestamp` followed by the flattened column names; there
/// is no row-index column and missing values are empty cells.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetricsSink for CsvSink {
    fn save(&self, table: &TimeTable) -> Result<()> {
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);

        let header: Vec<String> = std::iter::once(TIMESTAMP_COLUMN)
            .chain(table.column_names())
            .map(escape_field)
            .collect();
        writeln!(writer, "{}", header.join(","))?;

        let columns: Vec<_> = table.columns().collect();
        for (row, ts) in table.index().iter().enumerate() {
            let mut line = ts.to_string();
            for column in &columns {
                line.push(',');
                if let Some(value) = column.values[row] {
                    line.push_str(&value.to_string());
                }
            }
            writeln!(writer, "{}", line)?;
        }

        writer.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Shape of an exported table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub rows: usize,
    pub columns: usize,
}

/// Flatten `graph` and write it to `destination`.
///
/// `mode` and `scope` are validated before anything is written.
pub fn export_graph_metrics(
    graph: &TopologyGraph,
    destination: impl AsRef<Path>,
    mode: &str,
    scope: &str,
    obs: &Observability,
) -> Result<ExportReport> {
    let mode: ExportMode = mode.parse()?;
    let scope: MetricScope = scope.parse()?;

    let sink: Box<dyn MetricsSink> = match mode {
        ExportMode::Csv => Box::new(CsvSink::new(destination.as_ref())),
    };
    export_to(graph, scope, sink.as_ref(), obs)
}

/// Flatten `graph` into an arbitrary sink
pub fn export_to(
    graph: &TopologyGraph,
    scope: MetricScope,
    sink: &dyn MetricsSink,
    obs: &Observability,
) -> Result<ExportReport> {
    let wide = flatten(graph, scope);
    sink.save(&wide)?;

    let report = ExportReport {
        rows: wide.len(),
        columns: wide.column_names().count(),
    };
    obs.logger
        .log_export(&sink.describe(), report.rows, report.columns);
    Ok(report)
}
