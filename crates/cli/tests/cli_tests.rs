//! CLI integration tests

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const GRAPH: &str = r#"{
  "nodes": [
    {"name": "machine-0", "layer": "physical", "type": "machine",
     "attributes": {"memory_total": 1000}},
    {"name": "tor-0", "layer": "physical", "type": "switch"}
  ],
  "edges": []
}"#;

const MACHINE_CSV: &str = "timestamp,intel/procfs/meminfo/mem_used,intel/procfs/meminfo/mem_total
100,250,1000
110,500,1000
120,750,1000
";

fn annotator(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_graph-annotator"))
        .args(args)
        .env_remove("ANNOTATOR_BACKEND")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute command")
}

/// Temp workspace with a graph, local telemetry and a config pointing at it
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("telemetry");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(data.join("machine-0.csv"), MACHINE_CSV).unwrap();
        std::fs::write(dir.path().join("graph.json"), GRAPH).unwrap();
        std::fs::write(
            dir.path().join("annotator.toml"),
            format!(
                "backend = \"local\"\nlocal_data_dir = \"{}\"\n",
                data.display().to_string().replace('\\', "/")
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn arg(&self, name: &str) -> String {
        self.path(name).display().to_string()
    }

    fn annotate(&self, extra: &[&str]) -> Output {
        let config = self.arg("annotator.toml");
        let graph = self.arg("graph.json");
        let mut args = vec![
            "--config",
            config.as_str(),
            "annotate",
            "--graph",
            graph.as_str(),
            "--from",
            "90",
            "--to",
            "200",
        ];
        args.extend_from_slice(extra);
        annotator(&args)
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_cli_help() {
    let output = annotator(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    for command in ["annotate", "list-metrics", "export", "filter"] {
        assert!(stdout.contains(command), "Should show {command} command");
    }
}

#[test]
fn test_cli_version() {
    let output = annotator(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("graph-annotator"), "Should show binary name");
}

#[test]
fn test_annotate_writes_graph_and_csv() {
    let ws = Workspace::new();
    let out = ws.arg("annotated.json");
    let csv = ws.arg("metrics.csv");

    let output = ws.annotate(&[
        "--utilization",
        "--output",
        out.as_str(),
        "--export",
        csv.as_str(),
    ]);
    assert!(
        output.status.success(),
        "annotate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let graph = read_json(&ws.path("annotated.json"));
    let machine = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["name"] == "machine-0")
        .unwrap();
    assert!(machine["telemetry"]["utilization"]["memory"].is_object());

    let content = std::fs::read_to_string(ws.path("metrics.csv")).unwrap();
    let header = content.lines().next().unwrap();
    assert!(header.starts_with("timestamp,"));
    assert!(header.contains("machine-0@physical@machine@intel/procfs/meminfo/mem_used"));
    assert_eq!(content.lines().count(), 4);
}

#[test]
fn test_annotate_rejects_inverted_window() {
    let ws = Workspace::new();
    let config = ws.arg("annotator.toml");
    let graph = ws.arg("graph.json");

    let output = annotator(&[
        "--config",
        config.as_str(),
        "annotate",
        "--graph",
        graph.as_str(),
        "--from",
        "200",
        "--to",
        "100",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_unknown_backend_is_rejected() {
    let ws = Workspace::new();
    let out = ws.arg("annotated.json");

    let config = ws.arg("annotator.toml");
    let graph = ws.arg("graph.json");
    let output = annotator(&[
        "--config",
        config.as_str(),
        "--backend",
        "graphite",
        "annotate",
        "--graph",
        graph.as_str(),
        "--from",
        "90",
        "--to",
        "200",
        "--output",
        out.as_str(),
    ]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("graphite"));
    assert!(!ws.path("annotated.json").exists());
}

#[test]
fn test_export_unknown_mode_writes_nothing() {
    let ws = Workspace::new();
    let out = ws.arg("annotated.json");
    assert!(ws.annotate(&["--output", out.as_str()]).status.success());

    let dest = ws.arg("metrics.parquet");
    let output = annotator(&[
        "export",
        "--graph",
        out.as_str(),
        "--output",
        dest.as_str(),
        "--mode",
        "parquet",
    ]);

    assert!(!output.status.success());
    assert!(!ws.path("metrics.parquet").exists());
}

#[test]
fn test_list_metrics_json() {
    let ws = Workspace::new();
    let out = ws.arg("annotated.json");
    assert!(ws.annotate(&["--output", out.as_str()]).status.success());

    let output = annotator(&["list-metrics", "--graph", out.as_str(), "--format", "json"]);
    assert!(output.status.success());

    let rows: Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row["node"] == "machine-0"));
}

#[test]
fn test_filter_drops_idle_nodes() {
    let ws = Workspace::new();
    let out = ws.arg("annotated.json");
    assert!(ws.annotate(&["--output", out.as_str()]).status.success());

    let filtered = ws.arg("filtered.json");
    let output = annotator(&["filter", "--graph", out.as_str(), "--output", filtered.as_str()]);
    assert!(output.status.success());

    let graph = read_json(&ws.path("filtered.json"));
    let names: Vec<&str> = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["machine-0"]);
}

#[test]
fn test_missing_argument() {
    let output = annotator(&["annotate", "--from", "0", "--to", "10"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--graph"));
}
