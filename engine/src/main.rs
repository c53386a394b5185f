use anyhow::Result;
use argus_engine::{config, pipeline, registry, replay, state};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Argus — IoT behavioral traffic pipeline & event inference daemon.
#[derive(Parser, Debug)]
#[command(name = "argus-engine", version, about)]
struct Cli {
    /// Path to a TOML configuration file (optional).
    #[arg(short, long)]
    config: Option<String>,

    /// Replay a JSONL packet capture instead of waiting on a live source,
    /// then exit once the pipeline drains.
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Start with inspection paused (enqueues silently dropped).
    #[arg(long)]
    paused: bool,
}

const BANNER: &str = r#"
    _
   / \   _ __ __ _ _   _ ___
  / _ \ | '__/ _` | | | / __|
 / ___ \| | | (_| | |_| \__ \
/_/   \_\_|  \__, |\__,_|___/
             |___/
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (logs).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argus_engine=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    println!("{BANNER}");
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Argus engine");

    // Load optional config file.
    let app_config = if let Some(ref path) = cli.config {
        config::AppConfig::from_file(path)?
    } else {
        config::AppConfig::default()
    };

    // Stand-alone collaborators, seeded from the config file. A deployment
    // embedding the engine supplies its own registry/resolver/ARP handles.
    let device_registry = Arc::new(registry::MemoryRegistry::from_entries(&app_config.devices));
    let hostnames = Arc::new(registry::MemoryHostnames::new());
    let arp = Arc::new(registry::MemoryArpCache::new());

    info!(
        devices = app_config.devices.len(),
        project_dir = %app_config.project_dir.display(),
        "Configuration loaded"
    );

    let ctx = state::PipelineContext::new(app_config, device_registry, hostnames, arp);
    if cli.paused {
        ctx.set_inspecting(false);
        info!("Inspection paused; packets will be dropped at enqueue");
    }

    let handles = pipeline::spawn_pipeline(&ctx);
    info!("Pipeline started");

    if let Some(ref capture) = cli.replay {
        let enqueued = replay::replay_file(&ctx, capture)?;

        // Wait for the stages to drain, then a little longer so the
        // assembler's idle sweep can seal trailing bursts.
        while !(ctx.packet_queue.is_empty()
            && ctx.burst_queue.is_empty()
            && ctx.ss_burst_queue.is_empty()
            && ctx.filtered_burst_queue.is_empty()
            && ctx.idle_burst_queue.is_empty())
        {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs_f64(
            ctx.config.burst_window_secs * 2.0 + 1.0,
        ))
        .await;

        for entry in ctx.events.iter() {
            for (ts, event) in entry.value().iter() {
                let when = chrono::DateTime::from_timestamp(ts.max(0.0) as i64, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| ts.to_string());
                info!(device = %entry.key(), at = %when, event = %event, "Detected event");
            }
        }
        info!(packets = enqueued, "Replay finished, shutting down");
    } else {
        // Run until interrupted.
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, shutting down");
    }

    pipeline::shutdown(&ctx, handles).await;
    Ok(())
}
