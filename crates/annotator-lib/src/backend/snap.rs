//! Snap backend
//!
//! Snap publishes every metric as an InfluxDB measurement named after its
//! fully-qualified key, tagged with the publishing host (`source`) and,
//! for per-device metrics, the device identifier. Queries go through the
//! InfluxDB HTTP `/query` endpoint with epoch-second timestamps.

use super::{async_trait, machine_of, metrics_for, HttpClient, TelemetryBackend};
use crate::models::{attrs, NodeType, TelemetryQuery, TimeWindow, TopologyGraph, TopologyNode};
use crate::table::TimeTable;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const QUERY_PATH: &str = "query";

/// InfluxDB client for Snap-collected metrics
pub struct SnapBackend {
    client: HttpClient,
    database: String,
}

#[derive(Debug, Deserialize)]
struct InfluxResponse {
    #[serde(default)]
    results: Vec<InfluxResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxResult {
    #[serde(default)]
    series: Vec<InfluxSeries>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxSeries {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl SnapBackend {
    pub fn new(base_url: &str, database: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(base_url, timeout)?,
            database: database.into(),
        })
    }

    /// Tag identifying a device-level series, if the node type has one
    fn device_tag(node_type: NodeType) -> Option<&'static str> {
        match node_type {
            NodeType::Pu => Some("cpu_id"),
            NodeType::Disk => Some("disk"),
            NodeType::Nic => Some("nic"),
            NodeType::Container => Some("docker_id"),
            _ => None,
        }
    }

    /// InfluxQL statement fetching one metric for a node
    pub fn statement(
        metric: &str,
        host: &str,
        device: Option<(&str, &str)>,
        window: TimeWindow,
    ) -> String {
        let mut statement = format!(
            "SELECT \"value\" FROM \"{}\" WHERE \"source\" = '{}'",
            escape_identifier(metric),
            escape_literal(host)
        );
        if let Some((tag, value)) = device {
            statement.push_str(&format!(
                " AND \"{}\" = '{}'",
                escape_identifier(tag),
                escape_literal(value)
            ));
        }
        statement.push_str(&format!(
            " AND time >= {}s AND time <= {}s",
            window.from, window.to
        ));
        statement
    }

    async fn run(&self, query: &TelemetryQuery) -> Result<TimeTable> {
        let params = [
            ("db", self.database.clone()),
            ("epoch", "s".to_string()),
            ("q", query.expression.clone()),
        ];
        let response: InfluxResponse = self
            .client
            .get(QUERY_PATH, &params)
            .await
            .with_context(|| format!("InfluxDB query failed: {}", query.expression))?;

        if let Some(err) = response.error {
            anyhow::bail!("InfluxDB error: {}", err);
        }

        let mut samples = Vec::new();
        for result in response.results {
            if let Some(err) = result.error {
                anyhow::bail!("InfluxDB statement error: {}", err);
            }
            for series in result.series {
                let time = series.columns.iter().position(|c| c == "time");
                let value = series.columns.iter().position(|c| c == "value");
                let (Some(time), Some(value)) = (time, value) else {
                    continue;
                };
                for row in &series.values {
                    let Some(ts) = row.get(time).and_then(Value::as_f64) else {
                        continue;
                    };
                    samples.push((ts, row.get(value).and_then(Value::as_f64)));
                }
            }
        }

        Ok(TimeTable::from_samples(&query.metric, &samples)
            .sorted()
            .dedup_timestamps())
    }
}

fn escape_identifier(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl TelemetryBackend for SnapBackend {
    fn name(&self) -> &'static str {
        "snap"
    }

    async fn get_queries(
        &self,
        graph: &TopologyGraph,
        node: &TopologyNode,
        window: TimeWindow,
    ) -> Result<Vec<TelemetryQuery>> {
        let Some(machine) = machine_of(graph, node) else {
            return Ok(Vec::new());
        };
        let host = machine
            .attribute_str(attrs::HOSTNAME)
            .unwrap_or(&machine.name);
        let device_id = node.attribute_str(attrs::DEVICE).unwrap_or(&node.name);
        let device = Self::device_tag(node.node_type).map(|tag| (tag, device_id));

        Ok(metrics_for(node.node_type)
            .iter()
            .map(|metric| TelemetryQuery {
                metric: metric.to_string(),
                expression: Self::statement(metric, host, device, window),
                window,
            })
            .collect())
    }

    async fn get_data(&self, node: &TopologyNode) -> Result<TimeTable> {
        let mut table = TimeTable::new();
        for query in node.telemetry.queries() {
            let series = self.run(query).await?;
            if !series.is_empty() {
                table = table.outer_join(&series);
            }
        }
        Ok(table)
    }
}
