//! Synthetic Exchange
//!
//! Serves GBM-driven trades and quotes to any number of TCP clients, with
//! optional single-byte corruption to exercise client resynchronization.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tickfeed_bins::common::{init_logging, install_stop_signals, CommonArgs};
use tickfeed_core::config::constants::{DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_CLIENT_BACKLOG};
use tickfeed_core::config::SimulatorConfig;
use tickfeed_core::sim::ExchangeSimulator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Synthetic market data exchange")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Instruments to generate
    #[arg(short, long, default_value_t = 100)]
    instruments: usize,

    /// Full sweeps over all instruments per second
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Probability of corrupting one byte of an outgoing frame
    #[arg(short, long, default_value_t = 0.0)]
    fault_rate: f64,

    /// Seed for reproducible price paths
    #[arg(short, long)]
    seed: Option<u64>,

    /// Heartbeat period in milliseconds
    #[arg(long, default_value_t = 1000)]
    heartbeat_ms: u64,

    /// Per-client outbound backlog limit in bytes
    #[arg(long, default_value_t = MAX_CLIENT_BACKLOG)]
    max_backlog: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.common)?;

    tracing::info!("=== Tickfeed: Exchange Simulator ===");

    let config = SimulatorConfig {
        port: args.port,
        instruments: args.instruments,
        tick_rate: args.tick_rate,
        fault_rate: args.fault_rate,
        seed: args.seed,
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        max_client_backlog: args.max_backlog,
    };

    let stop = install_stop_signals()?;
    let mut simulator = ExchangeSimulator::bind(config)
        .context("Failed to start exchange simulator")?
        .with_stop(stop);

    let stats = simulator.run()?;

    tracing::info!("=== Final Statistics ===");
    tracing::info!("Sweeps: {}", stats.sweeps);
    tracing::info!(
        "Frames: {} generated, {} corrupted",
        stats.frames_generated,
        stats.frames_corrupted
    );
    tracing::info!("Heartbeats: {}", stats.heartbeats);
    tracing::info!("Bytes sent: {}", stats.bytes_sent);
    tracing::info!(
        "Clients: {} accepted, {} dropped",
        stats.clients_accepted,
        stats.clients_dropped
    );

    Ok(())
}
