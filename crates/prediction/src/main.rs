//! Command-line entry point for ready-time predictions

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use readytime_prediction::{
    CartLineItem, ClassifiedPrediction, ConfigManager, LiveUpdateChannel, PredictionBadge,
    PredictionMetrics, PredictionOrchestrator, PredictionOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "readytime", version, about = "Order ready-time predictions")]
struct Cli {
    /// Configuration file (defaults to config/<environment>.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Predict the ready time for a cart stored as a JSON array of items
    Predict {
        #[arg(long)]
        vendor: Option<String>,
        #[arg(long)]
        cart: PathBuf,
    },
    /// Print live prediction updates for a vendor until interrupted
    Watch {
        #[arg(long)]
        vendor: String,
    },
    /// Probe the prediction backend
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::from_file(path),
        None => ConfigManager::new(),
    }
    .context("failed to load configuration")?;

    init_logging(config_manager.log_level());
    info!(
        "readytime v{} ({:?} environment)",
        readytime_prediction::VERSION,
        config_manager.get_environment()
    );

    let config = config_manager.get_config().clone();
    let metrics = Arc::new(PredictionMetrics::new());

    match cli.command {
        Command::Predict { vendor, cart } => {
            let raw = std::fs::read_to_string(&cart)
                .with_context(|| format!("failed to read cart file {}", cart.display()))?;
            let items: Vec<CartLineItem> =
                serde_json::from_str(&raw).context("cart file is not a JSON array of items")?;

            let orchestrator =
                PredictionOrchestrator::from_config(&config.api)?.with_metrics(metrics.clone());
            match orchestrator.get_prediction(&items, vendor.as_deref()).await {
                PredictionOutcome::Ready(prediction) => {
                    println!("{}", serde_json::to_string_pretty(&prediction.result)?);
                    println!("{}", PredictionBadge::new(&prediction, &Local));
                }
                PredictionOutcome::NoPrediction(reason) => {
                    println!("no prediction: {reason}");
                }
            }
        }
        Command::Watch { vendor } => {
            let channel = LiveUpdateChannel::from_config(&config.stream, metrics.clone())?;
            let subscription = channel.subscribe(&vendor, |update| {
                let badge = PredictionBadge::new(&ClassifiedPrediction::new(update), &Local);
                println!("{badge}");
            })?;

            let mut status = subscription.status_receiver();
            loop {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("interrupted, closing live feed");
                        break;
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = status.borrow().clone();
                        info!(vendor = %vendor, status = ?current, "live feed status");
                        if current.is_terminal() {
                            break;
                        }
                    }
                }
            }
            subscription.unsubscribe();
        }
        Command::Health => {
            let orchestrator = PredictionOrchestrator::from_config(&config.api)?;
            match orchestrator.backend_health().await {
                Ok(health) => println!("{}", serde_json::to_string_pretty(&health)?),
                Err(err) => {
                    error!("backend health probe failed: {err}");
                    std::process::exit(1);
                }
            }
        }
    }

    info!(metrics = ?metrics.get_snapshot(), "done");
    Ok(())
}

fn init_logging(default_level: &str) {
    let env = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
