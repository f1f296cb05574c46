//! End-to-end tests: local telemetry files through annotation, export and filtering

use annotator_lib::{
    attrs, derivation::keys, export_graph_metrics, filter_graph, flatten, list_metrics,
    AnnotationOptions, AnnotatorMetrics, Category, LocalBackend, MetricScope, NodeLayer,
    NodeType, Observability, StructuredLogger, TelemetryAnnotator, TopologyGraph, TopologyNode,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn write(dir: &Path, node: &str, content: &str) {
    tokio::fs::write(dir.join(format!("{node}.csv")), content)
        .await
        .unwrap();
}

/// machine-0 with two PUs, a disk and a NIC, a VM and an idle switch
fn topology() -> TopologyGraph {
    let mut graph = TopologyGraph::new();
    graph
        .add_node(
            TopologyNode::new("machine-0", NodeLayer::Physical, NodeType::Machine)
                .with_attribute(attrs::NIC_SPEED_MBPS, 100)
                .with_attribute(attrs::MEMORY_TOTAL, 1000),
        )
        .unwrap();
    for pu in ["pu-0", "pu-1"] {
        graph
            .add_node(
                TopologyNode::new(pu, NodeLayer::Physical, NodeType::Pu)
                    .with_attribute(attrs::MACHINE, "machine-0"),
            )
            .unwrap();
        graph.add_edge(pu, "machine-0", None).unwrap();
    }
    graph
        .add_node(
            TopologyNode::new("sda", NodeLayer::Physical, NodeType::Disk)
                .with_attribute(attrs::ALLOCATION, "machine-0"),
        )
        .unwrap();
    graph
        .add_node(
            TopologyNode::new("eth0", NodeLayer::Physical, NodeType::Nic)
                .with_attribute(attrs::ALLOCATION, "machine-0"),
        )
        .unwrap();
    graph
        .add_node(
            TopologyNode::new("vm-uuid", NodeLayer::Virtual, NodeType::Vm)
                .with_attribute(attrs::ALLOCATION, "machine-0")
                .with_attribute(attrs::VM_NAME, "web-1"),
        )
        .unwrap();
    graph
        .add_node(TopologyNode::new("tor-0", NodeLayer::Physical, NodeType::Switch))
        .unwrap();
    graph
        .add_node(
            TopologyNode::new("svc", NodeLayer::Service, NodeType::ServiceCompute)
                .with_attribute(attrs::TEMPLATE, "web-template"),
        )
        .unwrap();
    graph
}

async fn telemetry_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "machine-0",
        "timestamp,intel/procfs/meminfo/mem_used,intel/procfs/meminfo/mem_total\n\
         0,50,200\n1,100,200\n2,150,200\n",
    )
    .await;
    write(
        dir.path(),
        "pu-0",
        "timestamp,intel/procfs/cpu/utilization_percentage\n0,10\n1,20\n2,30\n",
    )
    .await;
    write(
        dir.path(),
        "pu-1",
        "timestamp,intel/procfs/cpu/utilization_percentage\n1,5\n2,\n",
    )
    .await;
    write(
        dir.path(),
        "sda",
        "timestamp,intel/procfs/disk/io_time\n0,0\n1,500\n2,1300\n",
    )
    .await;
    // 100 Mbit/s = 12.5 MB/s; 1.25 MB over one second is 10%
    write(
        dir.path(),
        "eth0",
        "timestamp,intel/psutil/net/bytes_recv,intel/psutil/net/bytes_sent\n\
         0,0,0\n1,1000000,250000\n2,2000000,500000\n",
    )
    .await;
    write(
        dir.path(),
        "vm-uuid",
        "timestamp,intel/procfs/cpu/utilization_percentage\n0,1\n",
    )
    .await;
    dir
}

async fn annotate(dir: &Path, obs: Observability) -> TopologyGraph {
    let annotator = TelemetryAnnotator::new(Arc::new(LocalBackend::new(dir)), obs);
    annotator
        .annotate(
            &topology(),
            0,
            2,
            AnnotationOptions {
                utilization: true,
                saturation: true,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_machine_aggregates_devices() {
    let dir = telemetry_dir().await;
    let graph = annotate(dir.path(), Observability::detached("local")).await;
    let machine = graph.node("machine-0").unwrap();

    let memory = machine.telemetry.utilization(Category::Memory).unwrap();
    assert_eq!(
        memory.column(keys::PROCFS_MEM_UTILIZATION).unwrap(),
        &[Some(25.0), Some(50.0), Some(75.0)]
    );

    let compute = machine.telemetry.utilization(Category::Compute).unwrap();
    assert_eq!(
        compute.column(keys::PROCFS_CPU_UTILIZATION).unwrap(),
        &[Some(10.0), Some(25.0), Some(30.0)]
    );

    let disk = machine.telemetry.utilization(Category::Disk).unwrap();
    assert_eq!(disk.column("sda").unwrap(), &[Some(0.0), Some(50.0), Some(80.0)]);

    let network = machine.telemetry.utilization(Category::Network).unwrap();
    assert_eq!(
        network.column("eth0").unwrap(),
        &[Some(0.0), Some(10.0), Some(10.0)]
    );
}

#[tokio::test]
async fn test_flatten_and_export_csv() {
    let dir = telemetry_dir().await;
    let graph = annotate(dir.path(), Observability::detached("local")).await;

    let wide = flatten(&graph, MetricScope::Utilization);
    assert_eq!(wide.index(), &[0, 1, 2]);
    assert!(wide.contains("sda@physical@disk@intel/procfs/disk/utilization_percentage"));
    assert!(wide.contains("machine-0@physical@machine@sda"));
    // VMs are exported under their display name
    assert!(wide.contains("web-1@virtual@vm@intel/procfs/cpu/utilization_percentage"));
    assert_eq!(
        wide.value_at("web-1@virtual@vm@intel/procfs/cpu/utilization_percentage", 2),
        None
    );

    let listed = list_metrics(&graph, MetricScope::Utilization);
    let flattened: Vec<&str> = wide.column_names().collect();
    assert_eq!(listed.len(), flattened.len());
    assert!(listed.iter().all(|name| flattened.contains(&name.as_str())));

    let out = TempDir::new().unwrap();
    let path = out.path().join("graph_metrics.csv");
    let report = export_graph_metrics(
        &graph,
        &path,
        "csv",
        "utilization",
        &Observability::detached("local"),
    )
    .unwrap();
    assert_eq!(report.rows, 3);

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines = content.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("timestamp,"));
    assert_eq!(header.split(',').count(), report.columns + 1);
    assert_eq!(lines.count(), 3);
}

#[tokio::test]
async fn test_filter_after_annotation() {
    let dir = telemetry_dir().await;
    let graph = annotate(dir.path(), Observability::detached("local")).await;

    let filtered = filter_graph(&graph, &Observability::detached("local"));
    assert!(filtered.node("tor-0").is_none());
    assert!(filtered.node("machine-0").is_some());
    assert_eq!(
        filtered.node("svc").unwrap().attribute_str(attrs::TEMPLATE),
        Some("web-template")
    );
}

#[tokio::test]
async fn test_annotated_graph_survives_json_transport() {
    let dir = telemetry_dir().await;
    let graph = annotate(dir.path(), Observability::detached("local")).await;

    let json = serde_json::to_string(&graph).unwrap();
    let parsed: TopologyGraph = serde_json::from_str(&json).unwrap();
    assert_eq!(
        flatten(&parsed, MetricScope::All),
        flatten(&graph, MetricScope::All)
    );
}

#[tokio::test]
async fn test_metrics_exposed_on_injected_registry() {
    let dir = telemetry_dir().await;
    let registry = Registry::new();
    let obs = Observability::new(
        StructuredLogger::new("local"),
        AnnotatorMetrics::new(&registry).unwrap(),
    );
    annotate(dir.path(), obs.clone()).await;

    // tor-0 and svc have no telemetry files
    assert_eq!(obs.metrics.nodes_annotated(), 6);
    assert_eq!(obs.metrics.nodes_skipped(), 2);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .unwrap();
    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("annotator_propagations_total{category=\"disk\",outcome=\"applied\"} 1"));
}
