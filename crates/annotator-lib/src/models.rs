//! Core data models for the topology annotator

use crate::error::{AnnotatorError, Result};
use crate::table::TimeTable;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Attribute keys with structural meaning
pub mod attrs {
    /// Owning machine of a processing unit
    pub const MACHINE: &str = "machine";
    /// Machine (or VM) a disk, NIC, VM or container is allocated on
    pub const ALLOCATION: &str = "allocation";
    /// Link speed of the machine's NICs, in megabits per second
    pub const NIC_SPEED_MBPS: &str = "nic_speed_mbps";
    /// Total memory of a machine or VM, in bytes
    pub const MEMORY_TOTAL: &str = "memory_total";
    /// Display name of a virtual machine
    pub const VM_NAME: &str = "vm_name";
    /// Service template carried by service-compute nodes
    pub const TEMPLATE: &str = "template";
    /// Host name a machine reports its telemetry under
    pub const HOSTNAME: &str = "hostname";
    /// Device identifier (cpu id, disk or interface name) used as a query tag
    pub const DEVICE: &str = "device";
}

/// Topology layer a node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLayer {
    Physical,
    Virtual,
    Service,
}

impl NodeLayer {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Virtual => "virtual",
            Self::Service => "service",
        }
    }
}

impl fmt::Display for NodeLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of infrastructure element a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Machine,
    Pu,
    Cache,
    Disk,
    Nic,
    Switch,
    Vm,
    Container,
    VirtualNetwork,
    ServiceCompute,
}

impl NodeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::Pu => "pu",
            Self::Cache => "cache",
            Self::Disk => "disk",
            Self::Nic => "nic",
            Self::Switch => "switch",
            Self::Vm => "vm",
            Self::Container => "container",
            Self::VirtualNetwork => "virtual_network",
            Self::ServiceCompute => "service_compute",
        }
    }

    /// Processing units, disks and NICs are devices owned by a machine
    pub const fn is_device(self) -> bool {
        matches!(self, Self::Pu | Self::Disk | Self::Nic)
    }

    /// Attribute naming the node that owns or hosts this one
    pub const fn owner_attribute(self) -> Option<&'static str> {
        match self {
            Self::Pu => Some(attrs::MACHINE),
            Self::Disk | Self::Nic | Self::Vm | Self::Container => Some(attrs::ALLOCATION),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource category of a derived utilization or saturation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Compute,
    Memory,
    Disk,
    Network,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Compute,
        Category::Memory,
        Category::Disk,
        Category::Network,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed time window, in epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from > to {
            return Err(AnnotatorError::InvalidTimeWindow { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.from && ts <= self.to
    }
}

/// A backend-specific query resolved for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryQuery {
    /// Column key the query result is stored under
    pub metric: String,
    /// Backend query text (PromQL, InfluxQL, file path, ...)
    pub expression: String,
    pub window: TimeWindow,
}

/// Telemetry attached to a node during an annotation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTelemetry {
    #[serde(default)]
    queries: Vec<TelemetryQuery>,
    #[serde(default)]
    raw: Option<TimeTable>,
    #[serde(default)]
    utilization: BTreeMap<Category, TimeTable>,
    #[serde(default)]
    saturation: BTreeMap<Category, TimeTable>,
    /// Devices whose utilization has been folded into this node, per category
    #[serde(default)]
    propagated_from: BTreeMap<Category, BTreeSet<String>>,
}

impl NodeTelemetry {
    pub fn queries(&self) -> &[TelemetryQuery] {
        &self.queries
    }

    pub fn set_queries(&mut self, queries: Vec<TelemetryQuery>) {
        self.queries = queries;
    }

    pub fn raw(&self) -> Option<&TimeTable> {
        self.raw.as_ref()
    }

    pub fn set_raw(&mut self, table: TimeTable) {
        self.raw = Some(table);
    }

    /// Whether the raw telemetry carries any metric column
    pub fn has_metrics(&self) -> bool {
        self.raw.as_ref().is_some_and(TimeTable::has_metrics)
    }

    pub fn utilization(&self, category: Category) -> Option<&TimeTable> {
        self.utilization.get(&category)
    }

    pub fn set_utilization(&mut self, category: Category, table: TimeTable) {
        self.utilization.insert(category, table);
    }

    pub fn saturation(&self, category: Category) -> Option<&TimeTable> {
        self.saturation.get(&category)
    }

    pub fn set_saturation(&mut self, category: Category, table: TimeTable) {
        self.saturation.insert(category, table);
    }

    /// All utilization categories outer-joined into one table
    pub fn utilization_table(&self) -> TimeTable {
        merge_categories(&self.utilization)
    }

    /// All saturation categories outer-joined into one table
    pub fn saturation_table(&self) -> TimeTable {
        merge_categories(&self.saturation)
    }

    pub fn has_contribution(&self, category: Category, device: &str) -> bool {
        self.propagated_from
            .get(&category)
            .is_some_and(|devices| devices.contains(device))
    }

    pub fn record_contribution(&mut self, category: Category, device: &str) {
        self.propagated_from
            .entry(category)
            .or_default()
            .insert(device.to_string());
    }

    /// Drop every table and query
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn merge_categories(tables: &BTreeMap<Category, TimeTable>) -> TimeTable {
    tables
        .values()
        .fold(TimeTable::new(), |merged, table| merged.outer_join(table))
}

/// A node of the infrastructure topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub name: String,
    pub layer: NodeLayer,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub telemetry: NodeTelemetry,
}

impl TopologyNode {
    pub fn new(name: impl Into<String>, layer: NodeLayer, node_type: NodeType) -> Self {
        Self {
            name: name.into(),
            layer,
            node_type,
            attributes: Map::new(),
            telemetry: NodeTelemetry::default(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Numeric attribute; numeric strings are accepted as well
    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Name of the node that owns or hosts this one, if the type has one
    pub fn owner(&self) -> Option<&str> {
        self.node_type
            .owner_attribute()
            .and_then(|key| self.attribute_str(key))
    }

    /// Name used when the node's metrics are exported
    pub fn display_name(&self) -> &str {
        if self.node_type == NodeType::Vm {
            if let Some(vm_name) = self.attribute_str(attrs::VM_NAME).filter(|n| !n.is_empty()) {
                return vm_name;
            }
        }
        &self.name
    }
}

/// A directed ownership/allocation relation between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Directed attributed topology graph, nodes addressed by unique name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphRepr")]
pub struct TopologyGraph {
    nodes: Vec<TopologyNode>,
    edges: Vec<TopologyEdge>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct GraphRepr {
    #[serde(default)]
    nodes: Vec<TopologyNode>,
    #[serde(default)]
    edges: Vec<TopologyEdge>,
}

impl TryFrom<GraphRepr> for TopologyGraph {
    type Error = AnnotatorError;

    /// Node names must be unique, as with [`TopologyGraph::add_node`]
    fn try_from(repr: GraphRepr) -> Result<Self> {
        let mut graph = Self::new();
        for node in repr.nodes {
            graph.add_node(node)?;
        }
        graph.edges = repr.edges;
        Ok(graph)
    }
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: TopologyNode) -> Result<()> {
        if self.index.contains_key(&node.name) {
            return Err(AnnotatorError::DuplicateNode { name: node.name });
        }
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Add an edge between two existing nodes
    pub fn add_edge(&mut self, source: &str, target: &str, label: Option<&str>) -> Result<()> {
        for name in [source, target] {
            if !self.index.contains_key(name) {
                return Err(AnnotatorError::NodeNotFound {
                    name: name.to_string(),
                });
            }
        }
        self.edges.push(TopologyEdge {
            source: source.to_string(),
            target: target.to_string(),
            label: label.map(str::to_string),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TopologyNode> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut TopologyNode> {
        self.nodes.iter_mut()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn edges(&self) -> &[TopologyEdge] {
        &self.edges
    }

    pub fn node(&self, name: &str) -> Option<&TopologyNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut TopologyNode> {
        self.index.get(name).map(|&i| &mut self.nodes[i])
    }

    /// Lookup that fails with [`AnnotatorError::NodeNotFound`]
    pub fn require_node(&self, name: &str) -> Result<&TopologyNode> {
        self.node(name).ok_or_else(|| AnnotatorError::NodeNotFound {
            name: name.to_string(),
        })
    }

    pub fn require_node_mut(&mut self, name: &str) -> Result<&mut TopologyNode> {
        self.node_mut(name).ok_or_else(|| AnnotatorError::NodeNotFound {
            name: name.to_string(),
        })
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, name: &str) -> Option<TopologyNode> {
        let pos = self.index.get(name).copied()?;
        let node = self.nodes.remove(pos);
        self.edges.retain(|e| e.source != name && e.target != name);
        self.rebuild_index();
        Some(node)
    }

    /// Keep only the nodes matching `keep`, dropping edges of removed nodes
    pub fn retain_nodes(&mut self, mut keep: impl FnMut(&TopologyNode) -> bool) {
        self.nodes.retain(|n| keep(n));
        self.rebuild_index();
        let index = &self.index;
        self.edges
            .retain(|e| index.contains_key(&e.source) && index.contains_key(&e.target));
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_graph() -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        graph
            .add_node(TopologyNode::new("machine-0", NodeLayer::Physical, NodeType::Machine))
            .unwrap();
        graph
            .add_node(
                TopologyNode::new("disk-0", NodeLayer::Physical, NodeType::Disk)
                    .with_attribute(attrs::ALLOCATION, "machine-0"),
            )
            .unwrap();
        graph.add_edge("disk-0", "machine-0", None).unwrap();
        graph
    }

    #[test]
    fn test_time_window_validation() {
        assert!(TimeWindow::new(10, 20).is_ok());
        assert!(TimeWindow::new(10, 10).is_ok());
        let err = TimeWindow::new(20, 10).unwrap_err();
        assert!(matches!(err, AnnotatorError::InvalidTimeWindow { from: 20, to: 10 }));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut graph = sample_graph();
        let err = graph
            .add_node(TopologyNode::new("disk-0", NodeLayer::Physical, NodeType::Disk))
            .unwrap_err();
        assert!(matches!(err, AnnotatorError::DuplicateNode { .. }));
    }

    #[test]
    fn test_deserialized_duplicate_nodes_are_rejected() {
        let json = r#"{"nodes": [
            {"name": "m", "layer": "physical", "type": "machine"},
            {"name": "m", "layer": "physical", "type": "switch"}
        ]}"#;
        let err = serde_json::from_str::<TopologyGraph>(json).unwrap_err();
        assert!(err.to_string().contains("Node already exists: m"));
    }

    #[test]
    fn test_edge_requires_existing_nodes() {
        let mut graph = sample_graph();
        assert!(graph.add_edge("disk-0", "ghost", None).is_err());
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = sample_graph();
        let removed = graph.remove_node("disk-0").unwrap();
        assert_eq!(removed.name, "disk-0");
        assert!(graph.edges().is_empty());
        assert!(graph.node("disk-0").is_none());
        assert!(graph.node("machine-0").is_some());
    }

    #[test]
    fn test_owner_resolution() {
        let graph = sample_graph();
        assert_eq!(graph.node("disk-0").unwrap().owner(), Some("machine-0"));
        assert_eq!(graph.node("machine-0").unwrap().owner(), None);

        let pu = TopologyNode::new("pu-0", NodeLayer::Physical, NodeType::Pu)
            .with_attribute(attrs::MACHINE, "machine-0");
        assert_eq!(pu.owner(), Some("machine-0"));
    }

    #[test]
    fn test_vm_display_name() {
        let vm = TopologyNode::new("uuid-1", NodeLayer::Virtual, NodeType::Vm)
            .with_attribute(attrs::VM_NAME, "web-1");
        assert_eq!(vm.display_name(), "web-1");

        let machine = TopologyNode::new("m", NodeLayer::Physical, NodeType::Machine)
            .with_attribute(attrs::VM_NAME, "ignored");
        assert_eq!(machine.display_name(), "m");
    }

    #[test]
    fn test_attribute_f64_accepts_numeric_strings() {
        let node = TopologyNode::new("m", NodeLayer::Physical, NodeType::Machine)
            .with_attribute(attrs::NIC_SPEED_MBPS, "1000")
            .with_attribute(attrs::MEMORY_TOTAL, json!(2048));
        assert_eq!(node.attribute_f64(attrs::NIC_SPEED_MBPS), Some(1000.0));
        assert_eq!(node.attribute_f64(attrs::MEMORY_TOTAL), Some(2048.0));
    }

    #[test]
    fn test_graph_json_roundtrip_rebuilds_index() {
        let graph = sample_graph();
        let json = serde_json::to_string(&graph).unwrap();
        let parsed: TopologyGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.node("disk-0").unwrap().node_type, NodeType::Disk);
        assert_eq!(parsed.edges().len(), 1);
    }
}
