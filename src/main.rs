//! Circuit guard demo and diagnostics binary.
//!
//! Drives a synthetic flaky dependency through a breaker so the state
//! machine can be watched from the console, and prints the effective
//! configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use circuit_guard::config::watcher::ConfigWatcher;
use circuit_guard::config::{load_config, GuardConfig};
use circuit_guard::observability::{logging, metrics};
use circuit_guard::resilience::{BreakerRegistry, GuardError};

#[derive(Parser)]
#[command(name = "circuit-guard")]
#[command(about = "Circuit breaker guard demo and diagnostics", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed failing then succeeding calls through a breaker
    Simulate {
        /// Dependency name (selects `[dependencies.<name>]` if present)
        #[arg(short, long, default_value = "payments")]
        dependency: String,

        /// Number of failing calls to make first
        #[arg(short, long, default_value_t = 3)]
        failures: u32,

        /// Number of succeeding calls to make afterwards
        #[arg(short, long, default_value_t = 2)]
        successes: u32,

        /// Pause between calls in milliseconds
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,

        /// Reload the config file while simulating
        #[arg(long)]
        watch: bool,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(Debug, Error)]
#[error("simulated fault in {0}")]
struct SimulatedFault(String);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability)?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            dependency,
            failures,
            successes,
            interval_ms,
            watch,
        } => {
            if config.observability.metrics_enabled {
                metrics::init_metrics(config.observability.metrics_address.parse()?)?;
            }

            let registry = Arc::new(BreakerRegistry::from_config(config)?);

            // Held for the duration of the simulation.
            let _watcher = match reload_target(cli.config.as_deref(), watch) {
                Some(path) => Some(spawn_reload(path, registry.clone())?),
                None => None,
            };

            simulate(
                &registry,
                &dependency,
                failures,
                successes,
                Duration::from_millis(interval_ms),
            )
            .await?;
        }
    }

    Ok(())
}

/// The file to watch, if reloading was asked for and is possible.
fn reload_target(config: Option<&Path>, watch: bool) -> Option<&Path> {
    match (config, watch) {
        (Some(path), true) => Some(path),
        (None, true) => {
            tracing::warn!("--watch needs --config, running without reload");
            None
        }
        (_, false) => None,
    }
}

fn spawn_reload(
    path: &Path,
    registry: Arc<BreakerRegistry>,
) -> Result<notify::RecommendedWatcher, notify::Error> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;

    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            if let Err(e) = registry.apply_config(config) {
                tracing::error!(error = %e, "Rejected reloaded configuration");
            }
        }
    });

    Ok(handle)
}

async fn simulate(
    registry: &BreakerRegistry,
    dependency: &str,
    failures: u32,
    successes: u32,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let breaker = registry.get_or_create(dependency)?;
    let total = failures + successes;
    let mut step = 0;

    tracing::info!(dependency, failures, successes, "Simulation starting");

    while step < total {
        let fails = step < failures;
        let label = format!("{}#{}", dependency, step + 1);

        let result = breaker
            .execute_named(&label, || async {
                if fails {
                    Err(SimulatedFault(dependency.to_string()))
                } else {
                    Ok(step + 1)
                }
            })
            .await;

        match result {
            Ok(n) => {
                println!("call {}: succeeded", n);
                step += 1;
            }
            Err(GuardError::Operation(e)) => {
                println!("call {}: failed ({})", step + 1, e);
                step += 1;
            }
            Err(GuardError::Rejected(rejection)) => {
                println!("call {}: rejected ({})", step + 1, rejection);
                // Failing steps are done once the breaker trips; only the
                // succeeding steps are worth waiting for.
                if fails {
                    step = failures;
                } else {
                    tokio::time::sleep(rejection.retry_after.max(interval)).await;
                    continue;
                }
            }
        }

        println!("{}", serde_json::to_string_pretty(&breaker.snapshot())?);
        tokio::time::sleep(interval).await;
    }

    tracing::info!(dependency, "Simulation finished");
    Ok(())
}
