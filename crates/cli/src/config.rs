//! Configuration management for the CLI

use annotator_lib::{
    BackendKind, LocalBackend, PrometheusBackend, SnapBackend, TelemetryBackend,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Annotator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotatorConfig {
    /// Telemetry system: snap, prometheus or local
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Directory of per-node CSV files for the local backend
    #[serde(default = "default_local_data_dir")]
    pub local_data_dir: PathBuf,

    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// Resolution of Prometheus range queries
    #[serde(default = "default_prometheus_step")]
    pub prometheus_step_secs: u64,

    /// InfluxDB endpoint holding Snap metrics
    #[serde(default = "default_influx_url")]
    pub influx_url: String,

    #[serde(default = "default_influx_database")]
    pub influx_database: String,

    /// HTTP timeout for remote backends
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Log output: plain or json
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_local_data_dir() -> PathBuf {
    PathBuf::from("./telemetry")
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_prometheus_step() -> u64 {
    15
}

fn default_influx_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_influx_database() -> String {
    "snap".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local_data_dir: default_local_data_dir(),
            prometheus_url: default_prometheus_url(),
            prometheus_step_secs: default_prometheus_step(),
            influx_url: default_influx_url(),
            influx_database: default_influx_database(),
            request_timeout_secs: default_request_timeout(),
            log_format: default_log_format(),
        }
    }
}

impl AnnotatorConfig {
    /// Load configuration from an optional file and `ANNOTATOR_*` environment
    /// variables; the environment wins
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("ANNOTATOR"))
            .build()
            .context("Failed to load configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn backend_kind(&self) -> Result<BackendKind> {
        Ok(self.backend.parse()?)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Build the configured telemetry backend
    pub fn build_backend(&self) -> Result<Arc<dyn TelemetryBackend>> {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        let backend: Arc<dyn TelemetryBackend> = match self.backend_kind()? {
            BackendKind::Local => Arc::new(LocalBackend::new(&self.local_data_dir)),
            BackendKind::Prometheus => Arc::new(
                PrometheusBackend::new(
                    &self.prometheus_url,
                    Duration::from_secs(self.prometheus_step_secs),
                    timeout,
                )
                .context("Failed to create Prometheus backend")?,
            ),
            BackendKind::Snap => Arc::new(
                SnapBackend::new(&self.influx_url, self.influx_database.clone(), timeout)
                    .context("Failed to create Snap backend")?,
            ),
        };
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_nothing_configured() {
        let config: AnnotatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.backend, "local");
        assert_eq!(config.prometheus_step_secs, 15);
        assert_eq!(config.influx_database, "snap");
        assert!(!config.json_logs());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "backend = \"prometheus\"\nprometheus_url = \"http://prom:9090\"").unwrap();

        let config = AnnotatorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.backend_kind().unwrap(), BackendKind::Prometheus);
        assert_eq!(config.prometheus_url, "http://prom:9090");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let config = AnnotatorConfig {
            backend: "graphite".to_string(),
            ..AnnotatorConfig::default()
        };
        let err = config.build_backend().err().unwrap();
        assert!(err.to_string().contains("graphite"));
    }
}
