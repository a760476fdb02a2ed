//! Warehouse Series replay tool
//!
//! Runs a recorded query batch against the in-memory warehouse and prints
//! the batch response. Useful for checking frame shapes and failure
//! isolation without warehouse credentials.
//!
//! # CLI Commands
//!
//! - `run` - Dispatch a batch file against a fixtures file
//! - `check-config` - Validate configuration file
//! - `health` - Answer a health probe
//!
//! # Configuration
//!
//! The tool reads configuration from:
//! 1. `--config` argument
//! 2. `WAREHOUSE_SERIES_CONFIG` environment variable (path to TOML file)
//! 3. Default configuration

mod config;

use clap::{Parser, Subcommand};
use config::{load_batch, load_config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use warehouse_series::{
    health::HealthReporter,
    metrics,
    query::{CancelHandle, ExecutionContext, QueryDispatcher, QueryExecutor, ResultFormat},
    warehouse::{MemoryWarehouse, WarehouseFixtures},
};

#[derive(Parser)]
#[command(name = "warehouse-series-replay")]
#[command(version)]
#[command(about = "Replay time-series query batches against recorded warehouse results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "WAREHOUSE_SERIES_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a batch against recorded results
    Run {
        /// Batch file: {"queries": [payload, ...]}
        #[arg(short, long)]
        batch: PathBuf,

        /// Fixtures file with canned warehouse results
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Output format (json, json-pretty, table)
        #[arg(short, long, default_value = "json-pretty")]
        output: ResultFormat,
    },

    /// Validate configuration file
    CheckConfig,

    /// Answer a health probe
    Health,
}

/// Cancel `handle` on Ctrl+C
///
/// Logs a warning and never fires if the handler cannot be installed.
fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling in-flight queries");
                handle.cancel();
            },
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler installation failed - batch cannot be interrupted");
            },
        }
    });
}

async fn cmd_run(
    cli: &Cli,
    batch: &Path,
    fixtures: &Path,
    output: ResultFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.monitoring.log_level);

    let queries = load_batch(batch)?;
    let warehouse = MemoryWarehouse::from_fixtures(WarehouseFixtures::from_file(fixtures)?);
    info!(queries = queries.len(), fixtures = %fixtures.display(), "Replaying batch");

    let executor = QueryExecutor::with_config(Arc::new(warehouse), config.executor_config());
    let dispatcher = QueryDispatcher::with_config(executor, config.dispatcher_config());

    let (handle, ctx) = ExecutionContext::new();
    cancel_on_ctrl_c(handle);

    let response = dispatcher.dispatch(&ctx, queries).await;
    println!("{}", response.format(output));

    if config.monitoring.metrics_enabled {
        eprintln!("{}", metrics::gather_metrics());
    }
    Ok(())
}

fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_deref())?;

    println!("Configuration is valid!");
    println!();
    println!("Dispatcher:");
    println!("  Query timeout: {} ms (0 = none)", config.dispatcher.query_timeout_ms);
    println!(
        "  Max concurrent queries: {} (0 = unbounded)",
        config.dispatcher.max_concurrent_queries
    );
    println!();
    println!("Warehouse:");
    println!(
        "  Default project: {}",
        config.warehouse.default_project.as_deref().unwrap_or("<none>")
    );
    println!(
        "  Default location: {}",
        config.warehouse.default_location.as_deref().unwrap_or("<none>")
    );
    println!();
    println!("Monitoring:");
    println!("  Metrics enabled: {}", config.monitoring.metrics_enabled);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

async fn cmd_health(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.monitoring.log_level);

    let result = HealthReporter::new()
        .check_health(&ExecutionContext::background())
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            batch,
            fixtures,
            output,
        } => cmd_run(&cli, batch, fixtures, *output).await,
        Commands::CheckConfig => cmd_check_config(&cli),
        Commands::Health => cmd_health(&cli).await,
    }
}
