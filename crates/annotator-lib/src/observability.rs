//! Observability infrastructure for the annotator
//!
//! Provides:
//! - Prometheus metrics (nodes annotated/skipped, backend errors, derived
//!   tables, propagation outcomes, pass latency) registered on a registry
//!   supplied by the caller
//! - Structured logging with tracing
//!
//! Both are bundled in [`Observability`] and passed explicitly to every
//! component; nothing here is process-global.

use crate::error::Result;
use crate::models::{Category, TimeWindow};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use tracing::{debug, error, info, warn};

/// Histogram buckets for annotation pass latency (in seconds)
const PASS_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Annotator metrics for Prometheus exposition.
///
/// Cloning is cheap; clones share the same underlying collectors.
#[derive(Clone)]
pub struct AnnotatorMetrics {
    nodes_annotated: IntCounter,
    nodes_skipped: IntCounter,
    backend_errors: IntCounter,
    derived_tables: IntCounterVec,
    propagations: IntCounterVec,
    pass_duration_seconds: Histogram,
}

impl AnnotatorMetrics {
    /// Create the collectors and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let nodes_annotated = IntCounter::new(
            "annotator_nodes_annotated_total",
            "Nodes that received raw telemetry",
        )?;
        let nodes_skipped = IntCounter::new(
            "annotator_nodes_skipped_total",
            "Nodes skipped because no query resolved for them",
        )?;
        let backend_errors = IntCounter::new(
            "annotator_backend_errors_total",
            "Telemetry backend failures caught during annotation",
        )?;
        let derived_tables = IntCounterVec::new(
            Opts::new(
                "annotator_derived_tables_total",
                "Derived tables attached to nodes",
            ),
            &["kind", "category"],
        )?;
        let propagations = IntCounterVec::new(
            Opts::new(
                "annotator_propagations_total",
                "Device to machine propagation attempts by outcome",
            ),
            &["category", "outcome"],
        )?;
        let pass_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "annotator_pass_duration_seconds",
                "Time spent annotating one topology copy",
            )
            .buckets(PASS_LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(nodes_annotated.clone()))?;
        registry.register(Box::new(nodes_skipped.clone()))?;
        registry.register(Box::new(backend_errors.clone()))?;
        registry.register(Box::new(derived_tables.clone()))?;
        registry.register(Box::new(propagations.clone()))?;
        registry.register(Box::new(pass_duration_seconds.clone()))?;

        Ok(Self {
            nodes_annotated,
            nodes_skipped,
            backend_errors,
            derived_tables,
            propagations,
            pass_duration_seconds,
        })
    }

    pub fn inc_nodes_annotated(&self) {
        self.nodes_annotated.inc();
    }

    pub fn inc_nodes_skipped(&self) {
        self.nodes_skipped.inc();
    }

    pub fn inc_backend_errors(&self) {
        self.backend_errors.inc();
    }

    pub fn inc_derived_table(&self, kind: &str, category: Category) {
        self.derived_tables
            .with_label_values(&[kind, category.as_str()])
            .inc();
    }

    pub fn inc_propagation(&self, category: Category, outcome: &str) {
        self.propagations
            .with_label_values(&[category.as_str(), outcome])
            .inc();
    }

    pub fn observe_pass_duration(&self, duration_secs: f64) {
        self.pass_duration_seconds.observe(duration_secs);
    }

    pub fn nodes_annotated(&self) -> u64 {
        self.nodes_annotated.get()
    }

    pub fn nodes_skipped(&self) -> u64 {
        self.nodes_skipped.get()
    }

    pub fn backend_errors(&self) -> u64 {
        self.backend_errors.get()
    }

    pub fn propagations(&self, category: Category, outcome: &str) -> u64 {
        self.propagations
            .with_label_values(&[category.as_str(), outcome])
            .get()
    }
}

/// Structured logger for annotator events
///
/// Every event carries the telemetry system it relates to.
#[derive(Clone)]
pub struct StructuredLogger {
    backend: String,
}

impl StructuredLogger {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Log the start of an annotation pass
    pub fn log_pass_started(
        &self,
        window: TimeWindow,
        nodes: usize,
        utilization: bool,
        saturation: bool,
    ) {
        info!(
            event = "annotation_started",
            backend = %self.backend,
            ts_from = window.from,
            ts_to = window.to,
            nodes = nodes,
            utilization = utilization,
            saturation = saturation,
            "Annotating topology with telemetry"
        );
    }

    /// Log the end of an annotation pass
    pub fn log_pass_completed(&self, annotated: usize, skipped: usize, elapsed_ms: u128) {
        info!(
            event = "annotation_completed",
            backend = %self.backend,
            annotated = annotated,
            skipped = skipped,
            elapsed_ms = elapsed_ms,
            "Topology annotation complete"
        );
    }

    /// Log a backend failure that was isolated to one node
    pub fn log_backend_failure(&self, node: &str, stage: &str, err: &anyhow::Error) {
        error!(
            event = "backend_failure",
            backend = %self.backend,
            node = %node,
            stage = %stage,
            error = %format!("{err:#}"),
            "Telemetry backend failed, node left without telemetry"
        );
    }

    pub fn log_node_skipped(&self, node: &str, reason: &str) {
        debug!(
            event = "node_skipped",
            backend = %self.backend,
            node = %node,
            reason = %reason,
            "No telemetry for node"
        );
    }

    pub fn log_derived(&self, node: &str, kind: &str, category: Category, rule: &str) {
        debug!(
            event = "table_derived",
            node = %node,
            kind = %kind,
            category = %category,
            rule = %rule,
            "Derived table attached"
        );
    }

    /// Log a derivation whose capacity denominator is absent or zero
    pub fn log_missing_capacity(&self, node: &str, rule: &str, capacity: &str) {
        warn!(
            event = "missing_capacity",
            node = %node,
            rule = %rule,
            capacity = %capacity,
            "Capacity unavailable, derived values left missing"
        );
    }

    pub fn log_propagation(&self, device: &str, machine: &str, category: Category, outcome: &str) {
        debug!(
            event = "propagation",
            device = %device,
            machine = %machine,
            category = %category,
            outcome = %outcome,
            "Device utilization propagated"
        );
    }

    pub fn log_export(&self, destination: &str, rows: usize, columns: usize) {
        info!(
            event = "metrics_exported",
            destination = %destination,
            rows = rows,
            columns = columns,
            "Graph metrics exported"
        );
    }

    pub fn log_filtered(&self, kept: usize, removed: usize) {
        info!(
            event = "graph_filtered",
            kept = kept,
            removed = removed,
            "Removed nodes without telemetry"
        );
    }
}

/// Logger and metrics handed to each component
#[derive(Clone)]
pub struct Observability {
    pub logger: StructuredLogger,
    pub metrics: AnnotatorMetrics,
}

impl Observability {
    pub fn new(logger: StructuredLogger, metrics: AnnotatorMetrics) -> Self {
        Self { logger, metrics }
    }

    /// Observability backed by a private registry nobody scrapes
    pub fn detached(backend: impl Into<String>) -> Self {
        let registry = Registry::new();
        let metrics = AnnotatorMetrics::new(&registry)
            .expect("a fresh registry accepts every annotator collector");
        Self::new(StructuredLogger::new(backend), metrics)
    }
}
