//! Feed Client
//!
//! This binary combines:
//! - FeedHandler on a dedicated (optionally pinned) ingest thread
//! - A display loop reading the symbol cache every refresh interval
//! - An optional Prometheus endpoint on its own tokio runtime
//!
//! Exits non-zero when the connection retry budget is exhausted.

use anyhow::Result;

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    client::main()
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    anyhow::bail!("tickfeed-client needs epoll and only runs on Linux")
}

#[cfg(target_os = "linux")]
mod client {
    use anyhow::{anyhow, Context, Result};
    use clap::Parser;
    use std::cmp::Reverse;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tickfeed_bins::common::{
        init_logging, install_stop_signals, parse_instrument_list, print_report,
        setup_performance, CommonArgs,
    };
    use tickfeed_core::cache::SymbolCache;
    use tickfeed_core::config::constants::{
        CONNECT_ATTEMPTS, DEFAULT_HOST, DEFAULT_INSTRUMENTS, DEFAULT_PORT,
    };
    use tickfeed_core::config::FeedConfig;
    use tickfeed_core::feed::{FeedHandler, FeedStatus, StopHandle};
    use tickfeed_core::monitoring::{MetricsServer, MetricsServerConfig, PrometheusExporter};
    use tickfeed_core::perf::{FeedMetrics, LatencySeries, LatencyTracker, MetricsSnapshot};

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Market data feed client")]
    struct Args {
        #[command(flatten)]
        common: CommonArgs,

        /// Exchange host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Exchange port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Instruments held in the cache
        #[arg(short, long, default_value_t = DEFAULT_INSTRUMENTS)]
        instruments: usize,

        /// Comma-separated instrument ids to subscribe to (default: all)
        #[arg(long)]
        subscribe: Option<String>,

        /// Connection attempts per reconnect cycle
        #[arg(long, default_value_t = CONNECT_ATTEMPTS)]
        connect_attempts: u32,

        /// CPU core to pin the ingest thread to
        #[arg(short = 'c', long)]
        cpu_core: Option<usize>,

        /// Enable real-time priority on the ingest thread (requires privileges)
        #[arg(long)]
        realtime: bool,

        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<SocketAddr>,

        /// Display refresh period in milliseconds
        #[arg(long, default_value_t = 500)]
        refresh_ms: u64,

        /// Instruments shown in the display
        #[arg(long, default_value_t = 20)]
        top: usize,

        /// Disable the live display
        #[arg(long)]
        no_display: bool,

        /// Print the final report as JSON on stdout
        #[arg(long)]
        json_report: bool,
    }

    pub fn main() -> Result<()> {
        let args = Args::parse();
        init_logging(&args.common)?;

        tracing::info!("=== Tickfeed: Feed Client ===");

        let mut config = FeedConfig::new(args.host.clone(), args.port, args.instruments);
        config.connect_attempts = args.connect_attempts;
        if let Some(list) = &args.subscribe {
            config.subscription =
                parse_instrument_list(list).context("Invalid --subscribe list")?;
        }
        config.validate().context("Invalid feed configuration")?;

        let stop = install_stop_signals()?;
        let cache = SymbolCache::new(config.instruments);
        let metrics = Arc::new(FeedMetrics::new());
        let status = Arc::new(FeedStatus::new());
        let latency = Arc::new(LatencyTracker::new());

        let mut handler = FeedHandler::tcp(config, cache.writer()?)?
            .with_metrics(metrics.clone())
            .with_status(status.clone())
            .with_latency(latency.clone())
            .with_stop(stop.clone());

        let cpu_core = args.cpu_core;
        let realtime = args.realtime;
        let ingest = thread::Builder::new()
            .name("tickfeed-ingest".to_string())
            .spawn(move || {
                if let Err(e) = setup_performance(cpu_core, realtime) {
                    tracing::warn!("Performance setup failed: {:#}", e);
                }
                handler.run()
            })
            .context("Failed to spawn ingest thread")?;

        let metrics_thread = match args.metrics_addr {
            Some(addr) => Some(spawn_metrics_server(
                addr,
                metrics.clone(),
                status.clone(),
                latency.clone(),
                stop.clone(),
            )?),
            None => None,
        };

        let refresh = Duration::from_millis(args.refresh_ms);
        let mut display = Display::new(args.top);
        while !ingest.is_finished() {
            if !stop.sleep(refresh) {
                break;
            }
            if !args.no_display {
                display.render(&cache, &metrics, &status, &latency);
            }
        }

        let outcome = ingest
            .join()
            .map_err(|_| anyhow!("Ingest thread panicked"))?;

        // Feed may have ended on its own; release the metrics server too
        stop.stop("feed finished");
        if let Some(handle) = metrics_thread {
            if handle.join().is_err() {
                tracing::warn!("Metrics server thread panicked");
            }
        }

        let report = outcome.context("Feed terminated")?;
        print_report(&report);
        if args.json_report {
            println!("{}", report.to_json()?);
        }

        Ok(())
    }

    fn spawn_metrics_server(
        addr: SocketAddr,
        metrics: Arc<FeedMetrics>,
        status: Arc<FeedStatus>,
        latency: Arc<LatencyTracker>,
        stop: StopHandle,
    ) -> Result<thread::JoinHandle<()>> {
        let exporter = Arc::new(
            PrometheusExporter::new(metrics, status, Some(latency))
                .context("Failed to create Prometheus exporter")?,
        );
        let server = MetricsServer::new(
            MetricsServerConfig {
                listen_addr: addr,
                ..Default::default()
            },
            exporter,
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build metrics runtime")?;

        thread::Builder::new()
            .name("tickfeed-metrics".to_string())
            .spawn(move || {
                let shutdown = async move {
                    while !stop.is_stopped() {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                };
                if let Err(e) = runtime.block_on(server.serve(shutdown)) {
                    tracing::error!("Metrics server failed: {:#}", e);
                }
            })
            .context("Failed to spawn metrics thread")
    }

    struct Display {
        top: usize,
        last: MetricsSnapshot,
        last_at: Instant,
    }

    impl Display {
        fn new(top: usize) -> Self {
            Self {
                top,
                last: MetricsSnapshot::default(),
                last_at: Instant::now(),
            }
        }

        fn render(
            &mut self,
            cache: &SymbolCache,
            metrics: &FeedMetrics,
            status: &FeedStatus,
            latency: &LatencyTracker,
        ) {
            let now = metrics.snapshot();
            let elapsed = self.last_at.elapsed().as_secs_f64();
            let rate = now.tick_rate_since(&self.last, elapsed);
            self.last = now;
            self.last_at = Instant::now();

            let mut rows: Vec<_> = cache
                .snapshots()
                .filter(|(_, state)| state.update_count > 0)
                .collect();
            rows.sort_unstable_by_key(|(_, state)| Reverse(state.update_count));
            rows.truncate(self.top);

            let decode = latency.summary(LatencySeries::Decode);
            let receive = latency.summary(LatencySeries::Receive);

            // Clear screen, cursor home
            print!("\x1b[2J\x1b[H");
            println!(
                "state: {:<12} attempt: {:<3} ticks: {:<12} rate: {:>10.0}/s",
                status.phase().name(),
                status.attempt(),
                now.ticks_published,
                rate
            );
            println!(
                "latency p50/p99: decode {}/{} ns  receive {}/{} ns",
                decode.p50_ns, decode.p99_ns, receive.p50_ns, receive.p99_ns
            );
            println!(
                "decoder: {} frames  {} dropped bytes  {} checksum  {} unknown  {} overflow  gaps {}",
                now.frames,
                now.resync_bytes,
                now.checksum_failures,
                now.unknown_types,
                now.overflow_resets,
                now.sequence_gaps
            );
            println!();
            println!(
                "{:>6} {:>12} {:>8} {:>12} {:>8} {:>12} {:>8} {:>8} {:>10}",
                "id", "bid", "bid_qty", "ask", "ask_qty", "last", "last_qty", "spread", "updates"
            );
            for (id, state) in rows {
                let spread = state
                    .spread_bps()
                    .map(|bps| format!("{bps:.1}bp"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6} {:>12.4} {:>8} {:>12.4} {:>8} {:>12.4} {:>8} {:>8} {:>10}",
                    id,
                    state.best_bid,
                    state.bid_quantity,
                    state.best_ask,
                    state.ask_quantity,
                    state.last_traded_price,
                    state.last_traded_quantity,
                    spread,
                    state.update_count
                );
            }
        }
    }
}
