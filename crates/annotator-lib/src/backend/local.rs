//! Local directory backend
//!
//! Each node's telemetry lives in `<dir>/<node>.csv`: a header row starting
//! with `timestamp` followed by one column per metric key, then one row per
//! sample. Empty cells are missing samples.

use super::{async_trait, TelemetryBackend};
use crate::models::{TelemetryQuery, TimeWindow, TopologyGraph, TopologyNode};
use crate::table::{round_timestamp, TimeTable, TIMESTAMP_COLUMN};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Reads per-node CSV files from a directory
pub struct LocalBackend {
    data_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// File holding `node`'s telemetry
    pub fn file_for(&self, node: &str) -> PathBuf {
        let file_name = node.replace(['/', '\\'], "_");
        self.data_dir.join(format!("{file_name}.csv"))
    }

    async fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

/// Parse a telemetry CSV document into a table
pub fn parse_csv(content: &str) -> Result<TimeTable> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(TimeTable::new());
    };

    let header: Vec<&str> = header.split(',').map(str::trim).collect();
    if header.first() != Some(&TIMESTAMP_COLUMN) {
        anyhow::bail!("First column must be '{}'", TIMESTAMP_COLUMN);
    }
    let metrics = &header[1..];

    let mut index = Vec::new();
    let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::new(); metrics.len()];
    for (line_no, line) in lines.enumerate() {
        let mut cells = line.split(',').map(str::trim);
        let ts: f64 = cells
            .next()
            .unwrap_or_default()
            .parse()
            .with_context(|| format!("Invalid timestamp on data row {}", line_no + 1))?;
        index.push(round_timestamp(ts));

        for (column, cell) in columns.iter_mut().zip(cells.chain(std::iter::repeat(""))) {
            let value = if cell.is_empty() {
                None
            } else {
                Some(cell.parse::<f64>().with_context(|| {
                    format!("Invalid value '{}' on data row {}", cell, line_no + 1)
                })?)
            };
            column.push(value);
        }
    }

    let mut table = TimeTable::with_index(index);
    for (name, values) in metrics.iter().zip(columns) {
        table.set_column(*name, values);
    }
    Ok(table)
}

/// Rows of `table` whose timestamp falls inside `window`
fn within(table: &TimeTable, window: TimeWindow) -> TimeTable {
    let rows: Vec<usize> = (0..table.len())
        .filter(|&row| window.contains(table.index()[row]))
        .collect();
    let mut result = TimeTable::with_index(rows.iter().map(|&row| table.index()[row]).collect());
    for column in table.columns() {
        result.set_column(
            column.name.clone(),
            rows.iter().map(|&row| column.values[row]).collect(),
        );
    }
    result
}

#[async_trait]
impl TelemetryBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get_queries(
        &self,
        _graph: &TopologyGraph,
        node: &TopologyNode,
        window: TimeWindow,
    ) -> Result<Vec<TelemetryQuery>> {
        let path = self.file_for(&node.name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let content = self.read(&path).await?;
        let header = content.lines().next().unwrap_or_default();
        let expression = path.display().to_string();
        Ok(header
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != TIMESTAMP_COLUMN)
            .map(|metric| TelemetryQuery {
                metric: metric.to_string(),
                expression: expression.clone(),
                window,
            })
            .collect())
    }

    async fn get_data(&self, node: &TopologyNode) -> Result<TimeTable> {
        let queries = node.telemetry.queries();
        let Some(first) = queries.first() else {
            return Ok(TimeTable::new());
        };

        let content = self.read(Path::new(&first.expression)).await?;
        let table = parse_csv(&content)
            .with_context(|| format!("Malformed telemetry file {}", first.expression))?;
        let metrics: Vec<&str> = queries.iter().map(|q| q.metric.as_str()).collect();

        Ok(within(&table.select(&metrics), first.window).sorted())
    }
}
