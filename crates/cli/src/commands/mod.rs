//! Subcommand implementations

pub mod annotate;
pub mod filter;
pub mod metrics;

use annotator_lib::TopologyGraph;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Read a topology graph from a JSON file
pub fn load_graph(path: &Path) -> Result<TopologyGraph> {
    let file =
        File::open(path).with_context(|| format!("Failed to open graph {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse graph {}", path.display()))
}

/// Write a topology graph as pretty-printed JSON
pub fn save_graph(graph: &TopologyGraph, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, graph).context("Failed to serialize graph")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotator_lib::{NodeLayer, NodeType, TopologyNode};
    use tempfile::TempDir;

    #[test]
    fn test_graph_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");

        let mut graph = TopologyGraph::new();
        graph
            .add_node(TopologyNode::new("m", NodeLayer::Physical, NodeType::Machine))
            .unwrap();
        save_graph(&graph, &path).unwrap();

        let loaded = load_graph(&path).unwrap();
        assert_eq!(loaded.node_names(), vec!["m"]);
    }

    #[test]
    fn test_missing_graph_reports_path() {
        let err = load_graph(Path::new("/nonexistent/graph.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/graph.json"));
    }
}
