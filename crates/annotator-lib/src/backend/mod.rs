//! Telemetry backends
//!
//! A backend resolves the queries that fetch a node's raw telemetry, runs
//! them, and names the machine the telemetry originates from. Three systems
//! are supported: Snap metrics stored in InfluxDB, Prometheus, and a local
//! directory of per-node CSV files.

mod http;
mod local;
mod prometheus;
mod snap;

pub use self::http::HttpClient;
pub use self::local::LocalBackend;
pub use self::prometheus::PrometheusBackend;
pub use self::snap::SnapBackend;

use crate::derivation::keys;
use crate::error::AnnotatorError;
use crate::models::{NodeType, TelemetryQuery, TimeWindow, TopologyGraph, TopologyNode};
use crate::table::TimeTable;
use anyhow::Result;
use std::fmt;
use std::str::FromStr;

pub use async_trait::async_trait;

/// Capability interface over a telemetry system
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Queries fetching `node`'s raw telemetry within `window`.
    ///
    /// An empty list means the backend has nothing for this node.
    async fn get_queries(
        &self,
        graph: &TopologyGraph,
        node: &TopologyNode,
        window: TimeWindow,
    ) -> Result<Vec<TelemetryQuery>>;

    /// Run the queries attached to `node`. Returns an empty table when no
    /// samples exist, never an absent one.
    async fn get_data(&self, node: &TopologyNode) -> Result<TimeTable>;

    /// Machine the node's telemetry originates from
    fn source(&self, graph: &TopologyGraph, node: &TopologyNode) -> Option<String> {
        machine_of(graph, node).map(|machine| machine.name.clone())
    }
}

/// Walk owner references up to the hosting machine
pub fn machine_of<'g>(graph: &'g TopologyGraph, node: &'g TopologyNode) -> Option<&'g TopologyNode> {
    let mut current = node;
    // Bounded walk; a cyclic allocation chain resolves to nothing
    for _ in 0..=graph.len() {
        if current.node_type == NodeType::Machine {
            return Some(current);
        }
        current = graph.node(current.owner()?)?;
    }
    None
}

/// Raw metric keys fetched for each node type
pub fn metrics_for(node_type: NodeType) -> &'static [&'static str] {
    match node_type {
        NodeType::Machine => &[
            keys::USE_COMPUTE_UTILIZATION,
            keys::USE_MEMORY_UTILIZATION,
            keys::USE_DISK_UTILIZATION,
            keys::USE_NETWORK_UTILIZATION,
            keys::USE_COMPUTE_SATURATION,
            keys::USE_MEMORY_SATURATION,
            keys::USE_DISK_SATURATION,
            keys::USE_NETWORK_SATURATION,
            keys::PROCFS_CPU_UTILIZATION,
            keys::PROCFS_MEM_USED,
            keys::PROCFS_MEM_TOTAL,
        ],
        NodeType::Vm => &[
            keys::PROCFS_CPU_UTILIZATION,
            keys::PROCFS_MEM_USED,
            keys::PROCFS_MEM_TOTAL,
        ],
        NodeType::Pu => &[keys::PROCFS_CPU_UTILIZATION],
        NodeType::Disk => &[keys::PROCFS_DISK_IO_TIME],
        NodeType::Nic => &[keys::PSUTIL_NET_BYTES_RECV, keys::PSUTIL_NET_BYTES_SENT],
        NodeType::Container => &[
            keys::DOCKER_CPU_USAGE,
            keys::DOCKER_MEM_USAGE,
            keys::DOCKER_NET_RX_BYTES,
            keys::DOCKER_NET_TX_BYTES,
        ],
        NodeType::Cache
        | NodeType::Switch
        | NodeType::VirtualNetwork
        | NodeType::ServiceCompute => &[],
    }
}

/// Supported telemetry systems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Snap,
    Prometheus,
    Local,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::Snap, Self::Prometheus, Self::Local];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snap => "snap",
            Self::Prometheus => "prometheus",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AnnotatorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| AnnotatorError::UnsupportedBackend {
                name: s.to_string(),
                supported: Self::ALL.map(Self::as_str).join(", "),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{attrs, NodeLayer};

    fn graph() -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        graph
            .add_node(TopologyNode::new("machine-0", NodeLayer::Physical, NodeType::Machine))
            .unwrap();
        graph
            .add_node(
                TopologyNode::new("vm-0", NodeLayer::Virtual, NodeType::Vm)
                    .with_attribute(attrs::ALLOCATION, "machine-0"),
            )
            .unwrap();
        graph
            .add_node(
                TopologyNode::new("c-0", NodeLayer::Virtual, NodeType::Container)
                    .with_attribute(attrs::ALLOCATION, "vm-0"),
            )
            .unwrap();
        graph
            .add_node(TopologyNode::new("svc", NodeLayer::Service, NodeType::ServiceCompute))
            .unwrap();
        graph
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("snap".parse::<BackendKind>().unwrap(), BackendKind::Snap);
        assert_eq!("Prometheus".parse::<BackendKind>().unwrap(), BackendKind::Prometheus);
        assert_eq!(" local ".parse::<BackendKind>().unwrap(), BackendKind::Local);

        let err = "graphite".parse::<BackendKind>().unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Telemetry system graphite is not supported. Supported systems are: snap, prometheus, local"
        );
    }

    #[test]
    fn test_machine_of_follows_allocation_chain() {
        let graph = graph();
        let container = graph.node("c-0").unwrap();
        assert_eq!(machine_of(&graph, container).unwrap().name, "machine-0");

        let service = graph.node("svc").unwrap();
        assert!(machine_of(&graph, service).is_none());
    }

    #[test]
    fn test_machine_of_terminates_on_cycles() {
        let mut graph = TopologyGraph::new();
        graph
            .add_node(
                TopologyNode::new("a", NodeLayer::Virtual, NodeType::Vm)
                    .with_attribute(attrs::ALLOCATION, "b"),
            )
            .unwrap();
        graph
            .add_node(
                TopologyNode::new("b", NodeLayer::Virtual, NodeType::Vm)
                    .with_attribute(attrs::ALLOCATION, "a"),
            )
            .unwrap();
        assert!(machine_of(&graph, graph.node("a").unwrap()).is_none());
    }

    #[test]
    fn test_every_device_fetches_something() {
        for node_type in [NodeType::Pu, NodeType::Disk, NodeType::Nic] {
            assert!(!metrics_for(node_type).is_empty());
        }
        assert!(metrics_for(NodeType::Switch).is_empty());
    }
}
