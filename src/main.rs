use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faultmedic::config::{Config, LogFormat};
use faultmedic::driver::{self, JsonFileSource};
use faultmedic::fault::{FaultStatus, FaultType, Metadata, Severity};
use faultmedic::recovery::collaborators::InMemoryCheckpointStore;
use faultmedic::recovery::{Checkpoint, Collaborators};
use faultmedic::FaultToleranceManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "faultmedic",
    about = "Fault recovery dispatch and predictive fault analytics for cluster schedulers",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $FAULTMEDIC_CONFIG, then /etc/faultmedic/faultmedic.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a fault and run the recovery strategies for it
    Dispatch {
        /// node_failure, network_partition, resource_exhaustion, performance_anomaly or service_unavailable
        #[arg(long)]
        fault_type: FaultType,

        /// Node or service the fault was observed on
        #[arg(long)]
        target: String,

        /// Override the default severity for the fault type
        #[arg(long)]
        severity: Option<Severity>,

        #[arg(long, default_value = "")]
        description: String,

        /// Seed the checkpoint store with a checkpoint of this id
        #[arg(long)]
        checkpoint: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run one prediction round over a series file
    Predict {
        /// JSON series file
        #[arg(long)]
        input: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Re-run predictions over a series file until interrupted
    Watch {
        /// JSON series file, re-read every round
        #[arg(long)]
        input: PathBuf,

        /// Seconds between rounds (defaults to driver.interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Token cancelled on Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            on_signal.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    init_tracing(&config);

    match cli.command {
        Commands::Dispatch {
            fault_type,
            target,
            severity,
            description,
            checkpoint,
            json,
        } => {
            let mut collaborators = Collaborators::in_memory();
            if let Some(id) = checkpoint {
                collaborators.checkpoints =
                    Arc::new(InMemoryCheckpointStore::with_checkpoint(Checkpoint::new(id)));
            }
            let manager = FaultToleranceManager::new(&config, &collaborators);

            let mut metadata = Metadata::new();
            if let Some(severity) = severity {
                metadata.insert("severity".to_string(), severity.to_string().into());
            }

            tracing::info!(%fault_type, %target, "Dispatching fault");
            let outcome = manager
                .detect_fault(fault_type, &target, &description, metadata, &ctrl_c_token())
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("\nfaultmedic dispatch");
                println!("Fault:    {} ({}, {})", outcome.fault.id(), fault_type, outcome.fault.severity());
                println!("Target:   {}", target);
                println!("{:<22} | {:<8} | {:>10} | Error", "Strategy", "Result", "Duration");
                println!("{:-<22}-|-{:-<8}-|-{:->10}-|-{:-<30}", "", "", "", "");
                for r in &outcome.results {
                    println!(
                        "{:<22} | {:<8} | {:>8.1}ms | {}",
                        r.strategy,
                        if r.successful { "OK" } else { "FAILED" },
                        r.duration.as_secs_f64() * 1000.0,
                        r.error.as_deref().unwrap_or("-")
                    );
                }
                println!("Status:   {}", outcome.status);
                println!();
            }

            if outcome.status != FaultStatus::Resolved {
                anyhow::bail!("fault {} not resolved (status {})", outcome.fault.id(), outcome.status);
            }
        }
        Commands::Predict { input, json } => {
            let series = driver::load_series(&input)?;
            let manager = FaultToleranceManager::new(&config, &Collaborators::in_memory());
            let predictions = manager.predict(&series);

            if json {
                println!("{}", serde_json::to_string_pretty(&predictions)?);
            } else if predictions.is_empty() {
                println!("No faults predicted across {} series.", series.len());
            } else {
                println!("{:<24} | {:<20} | {:>10} | {:>8} | Models", "Target", "Fault", "Confidence", "ETA");
                println!("{:-<24}-|-{:-<20}-|-{:->10}-|-{:->8}-|-{:-<20}", "", "", "", "", "");
                for p in &predictions {
                    let contributors: Vec<&str> = p.contributors.iter().map(|k| k.as_str()).collect();
                    println!(
                        "{:<24} | {:<20} | {:>10.2} | {:>7}s | {}",
                        p.target,
                        p.predicted_type,
                        p.confidence(),
                        p.time_to_failure().as_secs(),
                        contributors.join(",")
                    );
                }
            }
        }
        Commands::Watch { input, interval_secs } => {
            let interval = interval_secs
                .map(|s| Duration::from_secs(s.max(1)))
                .unwrap_or_else(|| config.driver.interval());
            let manager = Arc::new(FaultToleranceManager::new(&config, &Collaborators::in_memory()));
            let source = Arc::new(JsonFileSource::new(input));

            let rounds = driver::run_prediction_loop(manager.clone(), source, interval, ctrl_c_token()).await;
            let stats = manager.detector().statistics();
            println!(
                "{} rounds, {} predictions stored, {} still active",
                rounds, stats.total_predictions, stats.active_predictions
            );
        }
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}
