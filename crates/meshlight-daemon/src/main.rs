//! Meshlight Daemon - Main entry point
//!
//! Runs one light node per configured address against the in-memory mesh
//! and prints every state change as a JSON line.

mod config;

use anyhow::Result;
use clap::Parser;
use meshlight_access::SimulatedMesh;
use meshlight_core::StateChange;
use meshlight_node::{LightHandle, LightNode};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Capacity of the shared change stream
const EVENT_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "meshlight")]
#[command(about = "Mesh light node daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "meshlight.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Bind every node, refresh and probe once, print the resulting state and exit
    #[arg(long)]
    once: bool,

    /// Write an example configuration to the config path and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Meshlight v{}", env!("CARGO_PKG_VERSION"));

    if args.init {
        config::save_default_config(&args.config)?;
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    if config.nodes.is_empty() {
        warn!("No nodes configured");
    }

    let mesh = Arc::new(SimulatedMesh::new(config.daemon.app_key_index));
    for device in &config.simulated_devices {
        mesh.add_device(device.clone()).await;
    }

    let (events, _) = broadcast::channel::<StateChange>(EVENT_CAPACITY);
    // One-shot mode prints snapshots only
    let printer = (!args.once).then(|| tokio::spawn(print_changes(events.subscribe())));

    let handles: Vec<LightHandle> = config
        .nodes
        .iter()
        .map(|node_config| {
            let node = LightNode::new(node_config.clone(), mesh.clone()).with_events(events.clone());
            LightHandle::spawn(node)
        })
        .collect();
    info!(nodes = handles.len(), "Light nodes started");

    if args.once {
        for handle in &handles {
            handle.refresh_state().await?;
            handle.probe_availability().await?;
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    } else {
        mesh.set_ready();
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
    }

    for handle in &handles {
        if let Err(e) = handle.shutdown().await {
            warn!(error = %e, "Node already stopped");
        }
    }
    if let Some(printer) = printer {
        printer.abort();
    }

    Ok(())
}

/// Print every change notification as one JSON line
async fn print_changes(mut rx: broadcast::Receiver<StateChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => match serde_json::to_string(&change) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to encode state change"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "State changes dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
