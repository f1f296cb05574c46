//! Prometheus backend
//!
//! Queries the `query_range` HTTP API with node-exporter and cAdvisor
//! metrics. The selectors are scoped by the source machine's host name and
//! the node's device identifier.

use super::{async_trait, machine_of, HttpClient, TelemetryBackend};
use crate::models::{attrs, NodeType, TelemetryQuery, TimeWindow, TopologyGraph, TopologyNode};
use crate::table::TimeTable;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const QUERY_RANGE_PATH: &str = "api/v1/query_range";

/// Prometheus `query_range` client
pub struct PrometheusBackend {
    client: HttpClient,
    step: Duration,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusBackend {
    pub fn new(base_url: &str, step: Duration, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(base_url, timeout)?,
            step,
        })
    }

    /// PromQL selectors fetched for a node, as `(column, expression)` pairs
    pub fn selectors(graph: &TopologyGraph, node: &TopologyNode) -> Vec<(String, String)> {
        let host = machine_of(graph, node)
            .map(|machine| machine.attribute_str(attrs::HOSTNAME).unwrap_or(&machine.name))
            .unwrap_or(&node.name);
        let instance = format!("instance=~\"{}(:[0-9]+)?\"", escape(host));
        let device = escape(node.attribute_str(attrs::DEVICE).unwrap_or(&node.name));

        let metrics: Vec<(&str, String)> = match node.node_type {
            NodeType::Machine => vec![
                ("node_load1", instance.clone()),
                ("node_memory_MemAvailable_bytes", instance.clone()),
                ("node_memory_MemTotal_bytes", instance),
            ],
            NodeType::Pu => vec![(
                "node_cpu_seconds_total",
                format!("{instance},cpu=\"{device}\",mode!=\"idle\""),
            )],
            NodeType::Disk => vec![(
                "node_disk_io_time_seconds_total",
                format!("{instance},device=\"{device}\""),
            )],
            NodeType::Nic => vec![
                (
                    "node_network_receive_bytes_total",
                    format!("{instance},device=\"{device}\""),
                ),
                (
                    "node_network_transmit_bytes_total",
                    format!("{instance},device=\"{device}\""),
                ),
            ],
            NodeType::Container => vec![
                ("container_cpu_usage_seconds_total", format!("name=\"{device}\"")),
                ("container_memory_usage_bytes", format!("name=\"{device}\"")),
            ],
            _ => Vec::new(),
        };

        metrics
            .into_iter()
            .map(|(metric, labels)| (metric.to_string(), format!("{metric}{{{labels}}}")))
            .collect()
    }

    async fn query_range(&self, query: &TelemetryQuery) -> Result<TimeTable> {
        let params = [
            ("query", query.expression.clone()),
            ("start", query.window.from.to_string()),
            ("end", query.window.to.to_string()),
            ("step", format!("{}s", self.step.as_secs().max(1))),
        ];
        let response: QueryResponse = self
            .client
            .get(QUERY_RANGE_PATH, &params)
            .await
            .with_context(|| format!("Prometheus query failed: {}", query.expression))?;

        if response.status != "success" {
            anyhow::bail!(
                "Prometheus returned {}: {}",
                response.status,
                response.error.unwrap_or_default()
            );
        }
        let Some(data) = response.data else {
            return Ok(TimeTable::new());
        };
        if data.result_type != "matrix" {
            anyhow::bail!("Unexpected result type '{}'", data.result_type);
        }

        // Several series for one selector (e.g. per mode) are summed
        let mut table = TimeTable::new();
        for series in data.result {
            let samples: Vec<(f64, Option<f64>)> = series
                .values
                .iter()
                .map(|(ts, value)| (*ts, value.parse::<f64>().ok()))
                .collect();
            let series = TimeTable::from_samples(&query.metric, &samples).dedup_timestamps();
            table = if table.has_metrics() {
                table.outer_add(&series, &query.metric)
            } else {
                series
            };
        }
        Ok(table)
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl TelemetryBackend for PrometheusBackend {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn get_queries(
        &self,
        graph: &TopologyGraph,
        node: &TopologyNode,
        window: TimeWindow,
    ) -> Result<Vec<TelemetryQuery>> {
        Ok(Self::selectors(graph, node)
            .into_iter()
            .map(|(metric, expression)| TelemetryQuery {
                metric,
                expression,
                window,
            })
            .collect())
    }

    async fn get_data(&self, node: &TopologyNode) -> Result<TimeTable> {
        let mut table = TimeTable::new();
        for query in node.telemetry.queries() {
            let series = self.query_range(query).await?;
            if series.has_metrics() {
                table = table.outer_join(&series);
            }
        }
        Ok(table)
    }
}
