//! Graph filtering command

use anyhow::Result;
use std::path::Path;

use annotator_lib::{filter_graph, Observability};

use super::{load_graph, save_graph};
use crate::output::print_success;

/// Drop nodes without telemetry and write the result
pub fn run(graph: &Path, output: &Path, obs: &Observability) -> Result<()> {
    let graph = load_graph(graph)?;
    let filtered = filter_graph(&graph, obs);
    save_graph(&filtered, output)?;
    print_success(&format!(
        "Kept {} of {} nodes, written to {}",
        filtered.len(),
        graph.len(),
        output.display()
    ));
    Ok(())
}
