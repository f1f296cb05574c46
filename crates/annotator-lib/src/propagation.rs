//! Device to machine propagation
//!
//! Processing units, disks and NICs carry their own derived utilization.
//! After a device has been annotated its table is folded into the owning
//! machine's aggregate table for the matching category. A machine that
//! already reports a pre-aggregated USE gauge for that category is left
//! alone, and each device contributes to a machine at most once.

use crate::derivation::keys;
use crate::error::{AnnotatorError, Result};
use crate::models::{Category, NodeType, TopologyGraph};
use crate::table::TimeTable;
use std::fmt;

/// How a device table is combined with the machine's aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// Elementwise zero-filled sum into the machine's column of the same name
    Sum,
    /// One machine column per device, named after the device
    PerDevice,
}

/// Propagation behavior of one device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationRule {
    pub device: NodeType,
    pub category: Category,
    pub fold: Fold,
    /// Pre-aggregated column whose presence on the machine disables folding
    pub marker: &'static str,
}

pub static PROPAGATION_RULES: &[PropagationRule] = &[
    PropagationRule {
        device: NodeType::Pu,
        category: Category::Compute,
        fold: Fold::Sum,
        marker: keys::USE_COMPUTE_UTILIZATION,
    },
    PropagationRule {
        device: NodeType::Disk,
        category: Category::Disk,
        fold: Fold::PerDevice,
        marker: keys::USE_DISK_UTILIZATION,
    },
    PropagationRule {
        device: NodeType::Nic,
        category: Category::Network,
        fold: Fold::PerDevice,
        marker: keys::USE_NETWORK_UTILIZATION,
    },
];

/// Rule for a node type, if it is a propagating device
pub fn rule_for(node_type: NodeType) -> Option<&'static PropagationRule> {
    PROPAGATION_RULES.iter().find(|rule| rule.device == node_type)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationOutcome {
    /// The machine aggregate was updated
    Applied,
    /// The machine reports a pre-aggregated gauge for the category
    Guarded,
    /// This device already contributed to the machine
    AlreadyApplied,
    /// The device has no utilization to propagate
    NoData,
}

impl PropagationOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Guarded => "guarded",
            Self::AlreadyApplied => "already_applied",
            Self::NoData => "no_data",
        }
    }
}

impl fmt::Display for PropagationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of propagating one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    pub machine: String,
    pub category: Category,
    pub outcome: PropagationOutcome,
}

/// Fold a device's derived utilization into its owning machine.
///
/// Returns `Ok(None)` for nodes that are not propagating devices. A device
/// with no utilization for its category reports
/// [`PropagationOutcome::NoData`] without resolving its owner. A device that
/// does carry utilization but has no owner reference fails with
/// [`AnnotatorError::MissingStructuralReference`]; an owner that is not in
/// the graph fails with [`AnnotatorError::NodeNotFound`].
pub fn propagate(graph: &mut TopologyGraph, device: &str) -> Result<Option<Propagation>> {
    let node = graph.require_node(device)?;
    let Some(rule) = rule_for(node.node_type) else {
        return Ok(None);
    };

    let contribution = node
        .telemetry
        .utilization(rule.category)
        .filter(|table| table.has_metrics())
        .cloned();
    let Some(contribution) = contribution else {
        return Ok(Some(Propagation {
            machine: node.owner().unwrap_or_default().to_string(),
            category: rule.category,
            outcome: PropagationOutcome::NoData,
        }));
    };

    let machine = match node.owner() {
        Some(owner) => owner.to_string(),
        None => {
            return Err(AnnotatorError::MissingStructuralReference {
                node: device.to_string(),
                attribute: node
                    .node_type
                    .owner_attribute()
                    .unwrap_or_default()
                    .to_string(),
            })
        }
    };

    let target = graph.require_node_mut(&machine)?;
    let done = |outcome| {
        Ok(Some(Propagation {
            machine: machine.clone(),
            category: rule.category,
            outcome,
        }))
    };

    let current = target.telemetry.utilization(rule.category);
    let reports_gauge = current.is_some_and(|table| table.contains(rule.marker))
        || target
            .telemetry
            .raw()
            .is_some_and(|raw| raw.contains(rule.marker));
    if reports_gauge {
        return done(PropagationOutcome::Guarded);
    }
    if target.telemetry.has_contribution(rule.category, device) {
        return done(PropagationOutcome::AlreadyApplied);
    }

    let folded = fold(rule.fold, current, &contribution, device);
    target.telemetry.set_utilization(rule.category, folded);
    target.telemetry.record_contribution(rule.category, device);
    done(PropagationOutcome::Applied)
}

fn fold(fold: Fold, current: Option<&TimeTable>, contribution: &TimeTable, device: &str) -> TimeTable {
    // Device tables hold a single derived column
    let Some(column) = contribution.column_names().next().map(str::to_string) else {
        return current.cloned().unwrap_or_default();
    };

    match fold {
        Fold::Sum => {
            let device_values = contribution.select(&[column.as_str()]).fill_missing(0.0);
            match current {
                Some(machine) if machine.contains(&column) => {
                    machine.outer_join(&machine.outer_add(&device_values, &column))
                }
                Some(machine) => machine.outer_join(&device_values),
                None => device_values,
            }
        }
        Fold::PerDevice => {
            let device_column = contribution
                .select(&[column.as_str()])
                .rename_columns(|_| device.to_string());
            match current {
                Some(machine) => machine.outer_join(&device_column),
                None => device_column,
            }
        }
    }
}
