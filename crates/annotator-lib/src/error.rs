//! Error types for the annotator.
//!
//! Configuration errors are raised before any side effect takes place.
//! Backend failures never surface here during an annotation pass; the
//! orchestrator logs them and moves on to the next node.

use thiserror::Error;

/// Result type alias for annotator operations.
pub type Result<T> = std::result::Result<T, AnnotatorError>;

/// Main error type for the annotator.
#[derive(Error, Debug)]
pub enum AnnotatorError {
    // Configuration errors
    #[error("Telemetry system {name} is not supported. Supported systems are: {supported}")]
    UnsupportedBackend { name: String, supported: String },

    #[error("Mode {mode} not supported. Supported modes are: {supported}")]
    UnsupportedExportMode { mode: String, supported: String },

    #[error("Metrics {scope} not supported. Supported metrics are: {supported}")]
    UnsupportedMetricScope { scope: String, supported: String },

    #[error("Invalid time window: from {from} is after to {to}")]
    InvalidTimeWindow { from: i64, to: i64 },

    // Graph integrity errors
    #[error("Node not found: {name}")]
    NodeNotFound { name: String },

    #[error("Node {node} has no '{attribute}' reference to its owning machine")]
    MissingStructuralReference { node: String, attribute: String },

    #[error("Node already exists: {name}")]
    DuplicateNode { name: String },

    // Collaborator errors
    #[error("Telemetry backend error: {0:#}")]
    Backend(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl AnnotatorError {
    /// Whether this error is a configuration error raised before any I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedBackend { .. }
                | Self::UnsupportedExportMode { .. }
                | Self::UnsupportedMetricScope { .. }
                | Self::InvalidTimeWindow { .. }
        )
    }
}
