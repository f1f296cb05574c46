//! Removal of nodes that carry no telemetry

use crate::models::{attrs, NodeLayer, NodeType, TopologyGraph};
use crate::observability::Observability;
use serde_json::Value;
use std::collections::HashMap;

/// Copy of `graph` without the nodes that reported no metric.
///
/// Service-layer nodes are always kept. `template` attributes are stripped
/// from every node and restored only on service-compute nodes.
pub fn filter_graph(graph: &TopologyGraph, obs: &Observability) -> TopologyGraph {
    let mut filtered = graph.clone();

    let mut templates: HashMap<String, Value> = HashMap::new();
    for node in filtered.nodes_mut() {
        if let Some(template) = node.attributes.remove(attrs::TEMPLATE) {
            templates.insert(node.name.clone(), template);
        }
    }

    let before = filtered.len();
    filtered.retain_nodes(|node| node.telemetry.has_metrics() || node.layer == NodeLayer::Service);
    let removed = before - filtered.len();

    for node in filtered.nodes_mut() {
        if node.node_type != NodeType::ServiceCompute {
            continue;
        }
        if let Some(template) = templates.remove(&node.name) {
            node.attributes.insert(attrs::TEMPLATE.to_string(), template);
        }
    }

    obs.logger.log_filtered(filtered.len(), removed);
    filtered
}
