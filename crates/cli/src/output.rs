//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// One flattened metric, split into its name parts
#[derive(Debug, Serialize, Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Node")]
    pub node: String,
    #[tabled(rename = "Layer")]
    pub layer: String,
    #[tabled(rename = "Type")]
    pub node_type: String,
    #[tabled(rename = "Metric")]
    pub metric: String,
}

impl MetricRow {
    /// Split a `node@layer@type@metric` column name
    pub fn parse(column: &str) -> Self {
        let mut parts = column.splitn(4, '@');
        let mut next = || parts.next().unwrap_or_default().to_string();
        Self {
            node: next(),
            layer: next(),
            node_type: next(),
            metric: next(),
        }
    }
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(&items) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}
