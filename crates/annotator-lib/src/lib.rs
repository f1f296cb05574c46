//! Telemetry annotation for infrastructure topology graphs
//!
//! This crate provides the core functionality for:
//! - Fetching raw node telemetry from Snap/InfluxDB, Prometheus or local files
//! - Deriving per-category utilization and saturation tables
//! - Propagating device utilization up to owning machines
//! - Flattening annotated graphs into one wide table and exporting it
//! - Filtering out nodes that carry no telemetry

pub mod annotation;
pub mod backend;
pub mod derivation;
pub mod error;
pub mod export;
pub mod filter;
pub mod models;
pub mod observability;
pub mod propagation;
pub mod table;

pub use annotation::{AnnotationOptions, AnnotationSummary, TelemetryAnnotator};
pub use backend::{BackendKind, LocalBackend, PrometheusBackend, SnapBackend, TelemetryBackend};
pub use error::{AnnotatorError, Result};
pub use export::{
    export_graph_metrics, flatten, list_metrics, CsvSink, ExportMode, MetricScope, MetricsSink,
};
pub use filter::filter_graph;
pub use models::*;
pub use observability::{AnnotatorMetrics, Observability, StructuredLogger};
pub use table::{TimeTable, Timestamp};
