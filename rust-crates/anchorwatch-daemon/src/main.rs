//! anchorwatch daemon - direction-finding anchors to live risk feed
//!
//! Polls the configured anchors over serial, estimates the emitter's speed
//! along the baseline, classifies risk and streams every sample as one JSON
//! line to all TCP clients on `listen_addr`.

use std::path::PathBuf;
use std::sync::Arc;

use anchorwatch_acquisition::Acquisition;
use anchorwatch_broadcaster::BroadcastHub;
use anchorwatch_daemon::{AnchorOpener, DaemonConfig, Supervisor};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "anchorwatch-daemon", version, about)]
struct Cli {
    /// Configuration file (default: <config dir>/anchorwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Legacy JSON anchor list replacing the configured anchors
    #[arg(long)]
    anchors: Option<PathBuf>,

    /// Override the TCP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_level(true)
        .init();

    info!("Starting anchorwatch daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &cli.anchors {
        config.apply_legacy_anchors(path)?;
    }
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;
    let baseline = config.baseline()?;

    info!("Configuration loaded from {}", config.config_path.display());
    for (index, anchor) in config.anchors.iter().enumerate() {
        info!("  - anchor[{}] {} on {} (pos {})", index, anchor.id, anchor.serial_port, anchor.pos);
    }
    info!(
        "  - baseline: {} ↔ {} ({} m)",
        config.baseline.left, config.baseline.right, config.baseline.distance_m
    );

    // Start the broadcaster before touching any device so clients can connect early
    let hub = Arc::new(
        BroadcastHub::new(config.listen_addr.clone(), config.broadcast.clone())
            .context("Failed to create broadcaster")?,
    );
    hub.start().await.context("Failed to start broadcaster")?;

    let opener: AnchorOpener = {
        let anchors = config.anchors.clone();
        let serial = config.serial.clone();
        let max_errors = config.pipeline.max_consecutive_read_errors;
        Arc::new(move || Acquisition::open_serial(&anchors, &serial, max_errors))
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        shutdown_tx.send_replace(true);
    });

    let mut supervisor = Supervisor::new(
        opener,
        baseline,
        Arc::clone(&hub),
        config.pipeline.clone(),
        config.broadcast.shutdown_deadline(),
    );
    let outcome = supervisor.run(shutdown_rx).await;

    // Cleanup
    info!("Shutting down...");
    if let Err(e) = hub.stop(config.broadcast.shutdown_deadline()).await {
        error!("Broadcaster shutdown failed: {}", e);
    }

    match outcome {
        Ok(()) => {
            info!("anchorwatch daemon stopped ({} restarts)", supervisor.restarts());
            Ok(())
        }
        Err(e) => {
            error!("Pipeline stopped: {:#}", e);
            Err(e)
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
