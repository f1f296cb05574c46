//! Metric derivation engine
//!
//! Turns a node's raw telemetry table into per-category utilization and
//! saturation tables. Rules are selected by which raw metric keys are
//! present, not by node type, and are evaluated in ascending priority so
//! that the highest-priority matching rule owns each category:
//!
//! pre-aggregated USE gauge > procfs/psutil raw > container cgroup raw
//!
//! Every rule is a pure function of the raw table and the capacities of the
//! machine the telemetry originates from.

use crate::models::{attrs, Category, TopologyNode};
use crate::table::TimeTable;
use std::collections::BTreeMap;

/// Fully-qualified metric keys understood by the rule tables
pub mod keys {
    // Pre-aggregated USE gauges
    pub const USE_COMPUTE_UTILIZATION: &str = "intel/use/compute/utilization";
    pub const USE_MEMORY_UTILIZATION: &str = "intel/use/memory/utilization";
    pub const USE_DISK_UTILIZATION: &str = "intel/use/disk/utilization";
    pub const USE_NETWORK_UTILIZATION: &str = "intel/use/network/utilization";
    pub const USE_COMPUTE_SATURATION: &str = "intel/use/compute/saturation";
    pub const USE_MEMORY_SATURATION: &str = "intel/use/memory/saturation";
    pub const USE_DISK_SATURATION: &str = "intel/use/disk/saturation";
    pub const USE_NETWORK_SATURATION: &str = "intel/use/network/saturation";

    // procfs / psutil
    pub const PROCFS_CPU_UTILIZATION: &str = "intel/procfs/cpu/utilization_percentage";
    pub const PROCFS_MEM_USED: &str = "intel/procfs/meminfo/mem_used";
    pub const PROCFS_MEM_TOTAL: &str = "intel/procfs/meminfo/mem_total";
    pub const PROCFS_MEM_UTILIZATION: &str = "intel/procfs/meminfo/mem_utilization_percentage";
    pub const PROCFS_DISK_IO_TIME: &str = "intel/procfs/disk/io_time";
    pub const PROCFS_DISK_UTILIZATION: &str = "intel/procfs/disk/utilization_percentage";
    pub const PSUTIL_NET_BYTES_RECV: &str = "intel/psutil/net/bytes_recv";
    pub const PSUTIL_NET_BYTES_SENT: &str = "intel/psutil/net/bytes_sent";
    pub const PSUTIL_NET_UTILIZATION: &str = "intel/psutil/net/utilization_percentage";

    // Container cgroups
    pub const DOCKER_CPU_USAGE: &str = "intel/docker/stats/cgroups/cpu_stats/cpu_usage/total_usage";
    pub const DOCKER_CPU_UTILIZATION: &str =
        "intel/docker/stats/cgroups/cpu_stats/cpu_usage/utilization_percentage";
    pub const DOCKER_MEM_USAGE: &str = "intel/docker/stats/cgroups/memory_stats/usage/usage";
    pub const DOCKER_MEM_UTILIZATION: &str =
        "intel/docker/stats/cgroups/memory_stats/usage/utilization_percentage";
    pub const DOCKER_NET_RX_BYTES: &str = "intel/docker/stats/network/rx_bytes";
    pub const DOCKER_NET_TX_BYTES: &str = "intel/docker/stats/network/tx_bytes";
    pub const DOCKER_NET_UTILIZATION: &str = "intel/docker/stats/network/utilization_percentage";
}

/// CPU busy time is reported in nanoseconds per one-second interval
pub const CPU_NANOS_PER_INTERVAL: f64 = 1e9;
/// Disk busy time is reported in milliseconds per one-second interval
pub const DISK_MILLIS_PER_INTERVAL: f64 = 1000.0;

/// Source family of a rule, in ascending precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RulePriority {
    ContainerCgroup,
    ProcfsRaw,
    PreAggregated,
}

/// Machine capacity a derivation divides by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Link capacity in bytes/sec, from the machine's NIC speed
    LinkBytesPerSec,
    /// Total memory in bytes
    MemoryBytes,
}

impl Capacity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinkBytesPerSec => attrs::NIC_SPEED_MBPS,
            Self::MemoryBytes => attrs::MEMORY_TOTAL,
        }
    }
}

/// How a rule turns raw columns into its output column
#[derive(Debug, Clone, Copy)]
pub enum Derivation {
    /// Pre-aggregated gauge, passed through unchanged
    Gauge(&'static str),
    /// Cumulative busy-time counter: first difference over `units_per_interval`
    CounterPercent {
        counter: &'static str,
        output: &'static str,
        units_per_interval: f64,
    },
    /// Direct ratio of two gauges
    Ratio {
        used: &'static str,
        total: &'static str,
        output: &'static str,
    },
    /// Gauge divided by a machine capacity
    CapacityRatio {
        used: &'static str,
        capacity: Capacity,
        output: &'static str,
    },
    /// Cumulative receive and send byte counters over the link capacity
    LinkUtilization {
        received: &'static str,
        sent: &'static str,
        output: &'static str,
    },
}

impl Derivation {
    /// Raw columns that must all be present for the rule to apply
    pub fn requires(&self) -> Vec<&'static str> {
        match *self {
            Self::Gauge(key) => vec![key],
            Self::CounterPercent { counter, .. } => vec![counter],
            Self::Ratio { used, total, .. } => vec![used, total],
            Self::CapacityRatio { used, .. } => vec![used],
            Self::LinkUtilization { received, sent, .. } => vec![received, sent],
        }
    }

    pub fn output(&self) -> &'static str {
        match *self {
            Self::Gauge(key) => key,
            Self::CounterPercent { output, .. }
            | Self::Ratio { output, .. }
            | Self::CapacityRatio { output, .. }
            | Self::LinkUtilization { output, .. } => output,
        }
    }

    pub fn capacity(&self) -> Option<Capacity> {
        match *self {
            Self::CapacityRatio { capacity, .. } => Some(capacity),
            Self::LinkUtilization { .. } => Some(Capacity::LinkBytesPerSec),
            _ => None,
        }
    }

    fn apply(&self, raw: &TimeTable, ctx: &DerivationContext) -> TimeTable {
        match *self {
            Self::Gauge(key) => raw.select(&[key]),
            Self::CounterPercent {
                counter,
                output,
                units_per_interval,
            } => {
                let delta = raw.select(&[counter]).fill_missing(0.0).first_difference();
                let values = delta
                    .column(counter)
                    .unwrap_or_default()
                    .iter()
                    .map(|d| Some(d.map_or(0.0, |d| d / units_per_interval * 100.0)))
                    .collect();
                TimeTable::from_series(output, delta.index().to_vec(), values)
            }
            Self::Ratio {
                used,
                total,
                output,
            } => {
                let filled = raw.select(&[used, total]).fill_missing(0.0);
                let values = filled
                    .column(used)
                    .unwrap_or_default()
                    .iter()
                    .zip(filled.column(total).unwrap_or_default())
                    .map(|(used, total)| percentage(used.unwrap_or(0.0), total.unwrap_or(0.0)))
                    .collect();
                TimeTable::from_series(output, filled.index().to_vec(), values)
            }
            Self::CapacityRatio {
                used,
                capacity,
                output,
            } => {
                let filled = raw.select(&[used]).fill_missing(0.0);
                let capacity = ctx.capacity(capacity);
                let values = filled
                    .column(used)
                    .unwrap_or_default()
                    .iter()
                    .map(|used| capacity.and_then(|c| percentage(used.unwrap_or(0.0), c)))
                    .collect();
                TimeTable::from_series(output, filled.index().to_vec(), values)
            }
            Self::LinkUtilization {
                received,
                sent,
                output,
            } => {
                let filled = raw.select(&[received, sent]).fill_missing(0.0);
                let total: Vec<Option<f64>> = filled
                    .column(received)
                    .unwrap_or_default()
                    .iter()
                    .zip(filled.column(sent).unwrap_or_default())
                    .map(|(r, s)| Some(r.unwrap_or(0.0) + s.unwrap_or(0.0)))
                    .collect();
                let delta = TimeTable::from_series(output, filled.index().to_vec(), total)
                    .first_difference();
                let capacity = ctx.capacity(Capacity::LinkBytesPerSec);
                let values = delta
                    .column(output)
                    .unwrap_or_default()
                    .iter()
                    .map(|d| capacity.and_then(|c| percentage(d.unwrap_or(0.0), c)))
                    .collect();
                TimeTable::from_series(output, delta.index().to_vec(), values)
            }
        }
    }
}

/// `part / whole * 100`; missing when the denominator is zero
fn percentage(part: f64, whole: f64) -> Option<f64> {
    if whole == 0.0 {
        None
    } else {
        Some(part / whole * 100.0)
    }
}

/// One entry of a rule table
#[derive(Debug, Clone, Copy)]
pub struct DerivationRule {
    pub name: &'static str,
    pub category: Category,
    pub priority: RulePriority,
    pub derivation: Derivation,
}

impl DerivationRule {
    pub fn matches(&self, raw: &TimeTable) -> bool {
        self.derivation.requires().iter().all(|key| raw.contains(key))
    }
}

/// Utilization rules, listed in ascending priority
pub static UTILIZATION_RULES: &[DerivationRule] = &[
    DerivationRule {
        name: "docker_cpu",
        category: Category::Compute,
        priority: RulePriority::ContainerCgroup,
        derivation: Derivation::CounterPercent {
            counter: keys::DOCKER_CPU_USAGE,
            output: keys::DOCKER_CPU_UTILIZATION,
            units_per_interval: CPU_NANOS_PER_INTERVAL,
        },
    },
    DerivationRule {
        name: "docker_memory",
        category: Category::Memory,
        priority: RulePriority::ContainerCgroup,
        derivation: Derivation::CapacityRatio {
            used: keys::DOCKER_MEM_USAGE,
            capacity: Capacity::MemoryBytes,
            output: keys::DOCKER_MEM_UTILIZATION,
        },
    },
    DerivationRule {
        name: "docker_network",
        category: Category::Network,
        priority: RulePriority::ContainerCgroup,
        derivation: Derivation::LinkUtilization {
            received: keys::DOCKER_NET_RX_BYTES,
            sent: keys::DOCKER_NET_TX_BYTES,
            output: keys::DOCKER_NET_UTILIZATION,
        },
    },
    DerivationRule {
        name: "procfs_cpu",
        category: Category::Compute,
        priority: RulePriority::ProcfsRaw,
        derivation: Derivation::Gauge(keys::PROCFS_CPU_UTILIZATION),
    },
    DerivationRule {
        name: "procfs_memory",
        category: Category::Memory,
        priority: RulePriority::ProcfsRaw,
        derivation: Derivation::Ratio {
            used: keys::PROCFS_MEM_USED,
            total: keys::PROCFS_MEM_TOTAL,
            output: keys::PROCFS_MEM_UTILIZATION,
        },
    },
    DerivationRule {
        name: "procfs_disk",
        category: Category::Disk,
        priority: RulePriority::ProcfsRaw,
        derivation: Derivation::CounterPercent {
            counter: keys::PROCFS_DISK_IO_TIME,
            output: keys::PROCFS_DISK_UTILIZATION,
            units_per_interval: DISK_MILLIS_PER_INTERVAL,
        },
    },
    DerivationRule {
        name: "psutil_network",
        category: Category::Network,
        priority: RulePriority::ProcfsRaw,
        derivation: Derivation::LinkUtilization {
            received: keys::PSUTIL_NET_BYTES_RECV,
            sent: keys::PSUTIL_NET_BYTES_SENT,
            output: keys::PSUTIL_NET_UTILIZATION,
        },
    },
    DerivationRule {
        name: "use_compute",
        category: Category::Compute,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_COMPUTE_UTILIZATION),
    },
    DerivationRule {
        name: "use_memory",
        category: Category::Memory,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_MEMORY_UTILIZATION),
    },
    DerivationRule {
        name: "use_disk",
        category: Category::Disk,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_DISK_UTILIZATION),
    },
    DerivationRule {
        name: "use_network",
        category: Category::Network,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_NETWORK_UTILIZATION),
    },
];

/// Saturation rules; only pre-aggregated gauges are known
pub static SATURATION_RULES: &[DerivationRule] = &[
    DerivationRule {
        name: "use_compute_saturation",
        category: Category::Compute,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_COMPUTE_SATURATION),
    },
    DerivationRule {
        name: "use_memory_saturation",
        category: Category::Memory,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_MEMORY_SATURATION),
    },
    DerivationRule {
        name: "use_disk_saturation",
        category: Category::Disk,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_DISK_SATURATION),
    },
    DerivationRule {
        name: "use_network_saturation",
        category: Category::Network,
        priority: RulePriority::PreAggregated,
        derivation: Derivation::Gauge(keys::USE_NETWORK_SATURATION),
    },
];

/// Capacities of the machine a node's telemetry originates from
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivationContext {
    pub nic_speed_mbps: Option<f64>,
    pub memory_total_bytes: Option<f64>,
}

impl DerivationContext {
    /// Read capacities from the source machine's attributes
    pub fn from_machine(machine: Option<&TopologyNode>) -> Self {
        match machine {
            Some(machine) => Self {
                nic_speed_mbps: machine.attribute_f64(attrs::NIC_SPEED_MBPS),
                memory_total_bytes: machine.attribute_f64(attrs::MEMORY_TOTAL),
            },
            None => Self::default(),
        }
    }

    /// Capacity in the unit the rule divides by; `None` when absent or zero
    pub fn capacity(&self, capacity: Capacity) -> Option<f64> {
        let value = match capacity {
            Capacity::LinkBytesPerSec => self.nic_speed_mbps.map(|mbps| mbps * 1e6 / 8.0),
            Capacity::MemoryBytes => self.memory_total_bytes,
        };
        value.filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// A derived table and the rule that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTable {
    pub rule: &'static str,
    pub table: TimeTable,
    /// The rule needed a capacity the source machine does not provide
    pub capacity_missing: Option<Capacity>,
}

/// Evaluate a rule table against a raw table.
///
/// Rules run in ascending priority (stable for equal priorities), so the
/// last matching rule of the highest priority owns its category. An empty
/// raw table yields no derived tables.
pub fn evaluate(
    rules: &[DerivationRule],
    raw: &TimeTable,
    ctx: &DerivationContext,
) -> BTreeMap<Category, DerivedTable> {
    let mut derived = BTreeMap::new();
    if raw.is_empty() {
        return derived;
    }

    let mut ordered: Vec<&DerivationRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.priority);

    for rule in ordered.into_iter().filter(|rule| rule.matches(raw)) {
        let capacity_missing = rule
            .derivation
            .capacity()
            .filter(|capacity| ctx.capacity(*capacity).is_none());
        derived.insert(
            rule.category,
            DerivedTable {
                rule: rule.name,
                table: rule.derivation.apply(raw, ctx),
                capacity_missing,
            },
        );
    }
    derived
}

/// Derived utilization tables by category
pub fn derive_utilization(
    raw: &TimeTable,
    ctx: &DerivationContext,
) -> BTreeMap<Category, TimeTable> {
    tables_only(evaluate(UTILIZATION_RULES, raw, ctx))
}

/// Derived saturation tables by category
pub fn derive_saturation(raw: &TimeTable, ctx: &DerivationContext) -> BTreeMap<Category, TimeTable> {
    tables_only(evaluate(SATURATION_RULES, raw, ctx))
}

fn tables_only(derived: BTreeMap<Category, DerivedTable>) -> BTreeMap<Category, TimeTable> {
    derived
        .into_iter()
        .map(|(category, d)| (category, d.table))
        .collect()
}
