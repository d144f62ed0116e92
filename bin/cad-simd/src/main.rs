//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the CAD simulator daemon."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cad_common::config::AppConfig;
use cad_common::logging::init_tracing;
use cad_device::{spawn_device_ticker, TelemetryDevice};
use cad_stream::{spawn_broadcaster, StreamBroker, WebSocketServerBuilder};
use clap::Parser;
use tokio::signal;
use tracing::info;

const DEFAULT_CONFIG: &str = "configs/cad-sim.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Simulated smart-energy CAD telemetry daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the WebSocket listen address")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "Seed the device simulation for reproducible readings")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(seed) = cli.seed {
        config.device.seed = Some(seed);
    }
    init_tracing("cad-simd", &config.logging)?;

    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }

    run_daemon(config).await
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let device = TelemetryDevice::from_config(&config.device).into_shared();
    let device_task = spawn_device_ticker(device.clone(), config.device.tick_interval);

    let broker = StreamBroker::new(device, config.broker.clone());
    let broadcaster = spawn_broadcaster(broker.clone(), config.broker.broadcast_interval);

    let server = WebSocketServerBuilder::new(config.server.listen, broker.clone())
        .subprotocol(config.server.subprotocol.clone())
        .spawn()
        .await
        .with_context(|| format!("unable to listen on {}", config.server.listen))?;

    info!(
        address = %server.local_addr(),
        device_tick_ms = config.device.tick_interval.as_millis() as u64,
        broadcast_ms = config.broker.broadcast_interval.as_millis() as u64,
        keep_alive_ms = config.broker.keep_alive_timeout.as_millis() as u64,
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    broadcaster.shutdown().await?;
    device_task.shutdown().await?;
    broker.shutdown_clients();
    server.shutdown().await?;

    info!("shutdown complete");
    Ok(())
}
