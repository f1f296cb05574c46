//! Graph annotation orchestrator
//!
//! Walks every node of a private copy of the topology, fetches its raw
//! telemetry from the configured backend, attaches derived utilization and
//! saturation tables, and folds device utilization into owning machines.
//!
//! Machines and other non-device nodes are visited before processing units,
//! disks and NICs so that a machine's own derivation is in place before its
//! devices propagate into it.


use crate::backend::TelemetryBackend;
use crate::derivation::{self, DerivationContext, SATURATION_RULES, UTILIZATION_RULES};
use crate::error::Result;
use crate::models::{TimeWindow, TopologyGraph};
use crate::observability::Observability;
use crate::propagation;
use crate::table::TimeTable;
use std::sync::Arc;
use std::time::Instant;

/// Which derived tables an annotation pass attaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationOptions {
    pub utilization: bool,
    pub saturation: bool,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            utilization: true,
            saturation: false,
        }
    }
}

/// Per-pass counters, also reported through metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    pub annotated: usize,
    pub skipped: usize,
}

enum NodeOutcome {
    Annotated,
    Skipped,
}

/// Annotates topology graphs with telemetry from one backend
pub struct TelemetryAnnotator {
    backend: Arc<dyn TelemetryBackend>,
    obs: Observability,
}

impl TelemetryAnnotator {
    pub fn new(backend: Arc<dyn TelemetryBackend>, obs: Observability) -> Self {
        Self { backend, obs }
    }

    pub fn backend(&self) -> &dyn TelemetryBackend {
        self.backend.as_ref()
    }

    /// Annotate a copy of `graph` with telemetry between `from` and `to`
    /// (epoch seconds, inclusive). The input graph is never modified.
    pub async fn annotate(
        &self,
        graph: &TopologyGraph,
        from: i64,
        to: i64,
        options: AnnotationOptions,
    ) -> Result<TopologyGraph> {
        let window = TimeWindow::new(from, to)?;
        let (annotated, _) = self.annotate_window(graph, window, options).await?;
        Ok(annotated)
    }

    /// Annotate a copy of `graph` and report how many nodes got telemetry
    pub async fn annotate_window(
        &self,
        graph: &TopologyGraph,
        window: TimeWindow,
        options: AnnotationOptions,
    ) -> Result<(TopologyGraph, AnnotationSummary)> {
        let started = Instant::now();
        self.obs.logger.log_pass_started(
            window,
            graph.len(),
            options.utilization,
            options.saturation,
        );

        let mut working = graph.clone();
        let mut summary = AnnotationSummary::default();
        for name in visit_order(&working) {
            match self.annotate_node(&mut working, &name, window, options).await? {
                NodeOutcome::Annotated => {
                    summary.annotated += 1;
                    self.obs.metrics.inc_nodes_annotated();
                }
                NodeOutcome::Skipped => {
                    summary.skipped += 1;
                    self.obs.metrics.inc_nodes_skipped();
                }
            }
        }

        let elapsed = started.elapsed();
        self.obs.metrics.observe_pass_duration(elapsed.as_secs_f64());
        self.obs
            .logger
            .log_pass_completed(summary.annotated, summary.skipped, elapsed.as_millis());
        Ok((working, summary))
    }

    async fn annotate_node(
        &self,
        graph: &mut TopologyGraph,
        name: &str,
        window: TimeWindow,
        options: AnnotationOptions,
    ) -> Result<NodeOutcome> {
        graph.require_node_mut(name)?.telemetry.clear();

        let queries = {
            let node = graph.require_node(name)?;
            match self.backend.get_queries(graph, node, window).await {
                Ok(queries) => queries,
                Err(err) => {
                    self.record_backend_failure(name, "get_queries", &err);
                    return Ok(NodeOutcome::Skipped);
                }
            }
        };
        if queries.is_empty() {
            self.obs.logger.log_node_skipped(name, "no queries");
            return Ok(NodeOutcome::Skipped);
        }
        graph.require_node_mut(name)?.telemetry.set_queries(queries);

        let node = graph.require_node(name)?;
        let raw = match self.backend.get_data(node).await {
            Ok(raw) => raw,
            Err(err) => {
                self.record_backend_failure(name, "get_data", &err);
                graph.require_node_mut(name)?.telemetry.clear();
                return Ok(NodeOutcome::Skipped);
            }
        };

        let ctx = DerivationContext::from_machine(
            self.backend
                .source(graph, node)
                .and_then(|source| graph.node(&source)),
        );
        let utilization = if options.utilization {
            derivation::evaluate(UTILIZATION_RULES, &raw, &ctx)
        } else {
            Default::default()
        };
        let saturation = if options.saturation {
            derivation::evaluate(SATURATION_RULES, &raw, &ctx)
        } else {
            Default::default()
        };

        let node = graph.require_node_mut(name)?;
        node.telemetry.set_raw(raw);
        for (kind, derived) in [("utilization", utilization), ("saturation", saturation)] {
            for (category, entry) in derived {
                if let Some(capacity) = entry.capacity_missing {
                    self.obs
                        .logger
                        .log_missing_capacity(name, entry.rule, capacity.as_str());
                }
                self.obs.logger.log_derived(name, kind, category, entry.rule);
                self.obs.metrics.inc_derived_table(kind, category);
                if kind == "utilization" {
                    node.telemetry.set_utilization(category, entry.table);
                } else {
                    node.telemetry.set_saturation(category, entry.table);
                }
            }
        }

        // Only devices that actually carry utilization reach their machine
        let carries_utilization = propagation::rule_for(node.node_type)
            .and_then(|rule| node.telemetry.utilization(rule.category))
            .is_some_and(TimeTable::has_metrics);
        if options.utilization && carries_utilization {
            if let Some(result) = propagation::propagate(graph, name)? {
                self.obs.logger.log_propagation(
                    name,
                    &result.machine,
                    result.category,
                    result.outcome.as_str(),
                );
                self.obs
                    .metrics
                    .inc_propagation(result.category, result.outcome.as_str());
            }
        }

        Ok(NodeOutcome::Annotated)
    }

    fn record_backend_failure(&self, node: &str, stage: &str, err: &anyhow::Error) {
        self.obs.logger.log_backend_failure(node, stage, err);
        self.obs.metrics.inc_backend_errors();
    }
}

/// Node names with every non-device node ahead of the devices
fn visit_order(graph: &TopologyGraph) -> Vec<String> {
    let (devices, others): (Vec<_>, Vec<_>) =
        graph.nodes().partition(|node| node.node_type.is_device());
    others
        .into_iter()
        .chain(devices)
        .map(|node| node.name.clone())
        .collect()
}
