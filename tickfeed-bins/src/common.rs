//! Common utilities for all binaries
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::{Context, Result};
use clap::Args;
use std::num::ParseIntError;
use tickfeed_core::feed::{FeedReport, StopHandle};

/// Logging arguments shared by every binary
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Log level (RUST_LOG overrides)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Initialize tracing/logging
pub fn init_logging(args: &CommonArgs) -> Result<()> {
    tickfeed_core::utils::init_logger(&args.log_level, args.json_logs)
}

/// Stop handle wired to SIGINT/SIGTERM
pub fn install_stop_signals() -> Result<StopHandle> {
    let stop = StopHandle::new();
    stop.register_signals()
        .context("Failed to install signal handlers")?;
    Ok(stop)
}

/// Setup CPU affinity and real-time priority for the calling thread
pub fn setup_performance(cpu_core: Option<usize>, realtime: bool) -> Result<()> {
    match (cpu_core, realtime) {
        (Some(core), true) => {
            tickfeed_core::perf::optimize_ingest_thread(core, Some(REALTIME_PRIORITY))?;
        }
        (Some(core), false) => {
            tickfeed_core::perf::pin_to_core(core)?;
            tracing::info!("Pinned to CPU core {}", core);
        }
        (None, true) => {
            tickfeed_core::perf::set_realtime_priority(REALTIME_PRIORITY)?;
            tracing::info!("Enabled real-time priority");
        }
        (None, false) => {}
    }

    Ok(())
}

const REALTIME_PRIORITY: i32 = 50;

/// Parse a comma-separated instrument list ("1,5,9")
pub fn parse_instrument_list(raw: &str) -> Result<Vec<u16>, ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Print final statistics
pub fn print_report(report: &FeedReport) {
    let m = &report.metrics;
    let d = &report.decoder;

    tracing::info!("=== Final Statistics ===");
    tracing::info!(
        "Stop reason: {}",
        report.stop_reason.as_deref().unwrap_or("signal")
    );
    tracing::info!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    tracing::info!("Ticks published: {}", m.ticks_published);
    tracing::info!(
        "Frames: {} ({} trades, {} quotes, {} heartbeats)",
        d.frames,
        d.trades,
        d.quotes,
        d.heartbeats
    );
    tracing::info!(
        "Bytes received: {} in {} reads (avg {:.0} B)",
        m.bytes_received,
        m.receives,
        m.avg_receive_size()
    );
    tracing::info!(
        "Resync: {} bytes dropped, {} checksum failures, {} unknown types, {} overflow resets",
        d.bytes_dropped,
        d.checksum_failures,
        d.unknown_types,
        d.overflow_resets
    );
    tracing::info!(
        "Sequence gaps: {} ({} messages missing)",
        m.sequence_gaps,
        m.missing_messages
    );
    tracing::info!(
        "Connections: {} connects, {} disconnects, {} failed attempts",
        m.connects,
        m.disconnects,
        m.connect_failures
    );

    let secs = report.elapsed.as_secs_f64();
    if secs > 0.0 {
        tracing::info!("Average rate: {:.0} ticks/s", m.ticks_published as f64 / secs);
    }
}
