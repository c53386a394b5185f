use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod filter;
mod periodicity;
mod spectrum;
mod standardizer;
mod util;

/// Argus trainer — offline model training for the Argus pipeline.
///
/// Each subcommand is idempotent: re-running it on unchanged idle data
/// rewrites the same artifacts byte for byte.
#[derive(Parser, Debug)]
#[command(name = "argus-trainer", version, about)]
struct Cli {
    /// Path to the engine's TOML configuration file (optional).
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the per-device standard scaler and write standardized train/test
    /// CSVs from the device's idle capture.
    Standardizer { mac: String },
    /// Infer periodic (protocol, host) tuples from the idle capture and emit
    /// the device's fingerprint file.
    Periodicity { mac: String },
    /// Train one density model per fingerprint tuple on the standardized
    /// idle data.
    Filter { mac: String },
    /// Run all three trainers in order.
    All { mac: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argus_trainer=info,argus_engine=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        argus_engine::config::AppConfig::from_file(path)?
    } else {
        argus_engine::config::AppConfig::default()
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project_dir = %config.project_dir.display(),
        "Starting Argus trainer"
    );

    match cli.command {
        Command::Standardizer { mac } => standardizer::train_standardizer(&config, &mac)?,
        Command::Periodicity { mac } => periodicity::infer_periodicity(&config, &mac)?,
        Command::Filter { mac } => filter::train_periodic_filter(&config, &mac)?,
        Command::All { mac } => {
            standardizer::train_standardizer(&config, &mac)?;
            periodicity::infer_periodicity(&config, &mac)?;
            filter::train_periodic_filter(&config, &mac)?;
        }
    }

    info!("Trainer finished");
    Ok(())
}
