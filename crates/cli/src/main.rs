//! Topology telemetry annotator CLI
//!
//! Annotates infrastructure topology graphs with telemetry, lists and
//! exports their flattened metrics, and filters out nodes that carry none.

mod commands;
mod config;
mod output;

use annotator_lib::{AnnotatorMetrics, Observability, StructuredLogger};
use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::annotate::{self, AnnotateArgs};
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Topology telemetry annotator
#[derive(Parser)]
#[command(name = "graph-annotator")]
#[command(author, version, about = "Annotate topology graphs with telemetry", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); ANNOTATOR_* variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Telemetry system: snap, prometheus or local
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Log output: plain or json
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Print collected Prometheus metrics to stderr when done
    #[arg(long, global = true)]
    pub metrics_dump: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Annotate a graph with telemetry from the configured backend
    Annotate {
        /// Topology graph (JSON)
        #[arg(long)]
        graph: PathBuf,

        /// Window start: epoch seconds or RFC 3339
        #[arg(long, value_parser = annotate::parse_time)]
        from: i64,

        /// Window end: epoch seconds or RFC 3339
        #[arg(long, value_parser = annotate::parse_time)]
        to: i64,

        /// Attach derived utilization and propagate device utilization
        #[arg(long)]
        utilization: bool,

        /// Attach derived saturation
        #[arg(long)]
        saturation: bool,

        /// Where to write the annotated graph (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Also export flattened metrics to this CSV file
        #[arg(long)]
        export: Option<PathBuf>,

        /// Metric scope for --export: all, utilization or saturation
        #[arg(long, default_value = "all")]
        metrics: String,

        /// Drop nodes without telemetry before writing
        #[arg(long)]
        filter: bool,
    },

    /// List the flattened metric names of an annotated graph
    ListMetrics {
        #[arg(long)]
        graph: PathBuf,

        /// Metric scope: all, utilization or saturation
        #[arg(long, default_value = "all")]
        metrics: String,

        /// Output format
        #[arg(long, short, default_value = "table")]
        format: output::OutputFormat,
    },

    /// Export the flattened metrics of an annotated graph
    Export {
        #[arg(long)]
        graph: PathBuf,

        /// Destination file
        #[arg(long, short)]
        output: PathBuf,

        /// Export mode
        #[arg(long, default_value = "csv")]
        mode: String,

        /// Metric scope: all, utilization or saturation
        #[arg(long, default_value = "all")]
        metrics: String,
    },

    /// Remove nodes that carry no telemetry
    Filter {
        #[arg(long)]
        graph: PathBuf,

        #[arg(long, short)]
        output: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn dump_metrics(registry: &Registry) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    eprint!("{}", String::from_utf8(buffer)?);
    Ok(())
}

async fn run(command: Commands, config: &config::AnnotatorConfig, obs: &Observability) -> Result<()> {
    match command {
        Commands::Annotate {
            graph,
            from,
            to,
            utilization,
            saturation,
            output,
            export,
            metrics,
            filter,
        } => {
            let backend = config.build_backend()?;
            let args = AnnotateArgs {
                graph,
                from,
                to,
                utilization,
                saturation,
                output,
                export,
                metrics,
                filter,
            };
            annotate::run(args, backend, obs).await?;
        }
        Commands::ListMetrics {
            graph,
            metrics,
            format,
        } => {
            commands::metrics::list(&graph, &metrics, format)?;
        }
        Commands::Export {
            graph,
            output,
            mode,
            metrics,
        } => {
            commands::metrics::export(&graph, &output, &mode, &metrics, obs)?;
        }
        Commands::Filter { graph, output } => {
            commands::filter::run(&graph, &output, obs)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration; flags override file and environment
    let mut config = config::AnnotatorConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(log_format) = cli.log_format {
        config.log_format = log_format;
    }

    init_tracing(config.json_logs());
    tracing::debug!(backend = %config.backend, "Configuration loaded");

    // Metrics live on a registry owned by this run
    let registry = Registry::new();
    let obs = Observability::new(
        StructuredLogger::new(config.backend.clone()),
        AnnotatorMetrics::new(&registry)?,
    );

    let result = run(cli.command, &config, &obs).await;

    if cli.metrics_dump {
        dump_metrics(&registry)?;
    }
    if let Err(err) = &result {
        output::print_error(&format!("{err:#}"));
        std::process::exit(1);
    }

    Ok(())
}
