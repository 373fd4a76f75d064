//! Prometheus mirror of the feed counters
//!
//! The ingestion thread never touches Prometheus types. `sync()` reads
//! `FeedMetrics`, adds the delta since the previous sync to the registered
//! counters and refreshes the gauges; the HTTP server calls it on each scrape.

use crate::feed::FeedStatus;
use crate::perf::{FeedMetrics, LatencySeries, LatencyTracker, MetricsSnapshot};
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "tickfeed";

struct Counters {
    bytes_received: IntCounter,
    receives: IntCounter,
    ticks_published: IntCounter,
    rejected_ticks: IntCounter,
    sequence_gaps: IntCounter,
    missing_messages: IntCounter,
    connects: IntCounter,
    disconnects: IntCounter,
    connect_failures: IntCounter,
    frames: IntCounter,
    trades: IntCounter,
    quotes: IntCounter,
    heartbeats: IntCounter,
    resync_bytes: IntCounter,
    checksum_failures: IntCounter,
    unknown_types: IntCounter,
    overflow_resets: IntCounter,
}

impl Counters {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        Ok(Self {
            bytes_received: counter("bytes_received_total", "Raw bytes read from the transport")?,
            receives: counter("receives_total", "Non-empty receive calls")?,
            ticks_published: counter("ticks_published_total", "Ticks written to the cache")?,
            rejected_ticks: counter(
                "ticks_rejected_total",
                "Ticks dropped for an out-of-range instrument id",
            )?,
            sequence_gaps: counter("sequence_gaps_total", "Per-instrument sequence gap events")?,
            missing_messages: counter(
                "sequence_missing_total",
                "Messages missing across all sequence gaps",
            )?,
            connects: counter("connects_total", "Successful connections")?,
            disconnects: counter("disconnects_total", "Connections lost to peer close or error")?,
            connect_failures: counter("connect_failures_total", "Failed connection attempts")?,
            frames: counter("frames_total", "Valid frames decoded")?,
            trades: counter("trades_total", "Trade frames decoded")?,
            quotes: counter("quotes_total", "Quote frames decoded")?,
            heartbeats: counter("heartbeats_total", "Heartbeat frames decoded")?,
            resync_bytes: counter("resync_bytes_total", "Bytes skipped while resynchronizing")?,
            checksum_failures: counter("checksum_failures_total", "Frames failing the checksum")?,
            unknown_types: counter("unknown_types_total", "Headers with an unknown message type")?,
            overflow_resets: counter(
                "decoder_overflow_resets_total",
                "Decode buffer discards on overflow",
            )?,
        })
    }

    fn add_delta(&self, now: &MetricsSnapshot, prev: &MetricsSnapshot) {
        let pairs = [
            (&self.bytes_received, now.bytes_received, prev.bytes_received),
            (&self.receives, now.receives, prev.receives),
            (&self.ticks_published, now.ticks_published, prev.ticks_published),
            (&self.rejected_ticks, now.rejected_ticks, prev.rejected_ticks),
            (&self.sequence_gaps, now.sequence_gaps, prev.sequence_gaps),
            (&self.missing_messages, now.missing_messages, prev.missing_messages),
            (&self.connects, now.connects, prev.connects),
            (&self.disconnects, now.disconnects, prev.disconnects),
            (&self.connect_failures, now.connect_failures, prev.connect_failures),
            (&self.frames, now.frames, prev.frames),
            (&self.trades, now.trades, prev.trades),
            (&self.quotes, now.quotes, prev.quotes),
            (&self.heartbeats, now.heartbeats, prev.heartbeats),
            (&self.resync_bytes, now.resync_bytes, prev.resync_bytes),
            (&self.checksum_failures, now.checksum_failures, prev.checksum_failures),
            (&self.unknown_types, now.unknown_types, prev.unknown_types),
            (&self.overflow_resets, now.overflow_resets, prev.overflow_resets),
        ];

        for (counter, now, prev) in pairs {
            let delta = now.saturating_sub(prev);
            if delta > 0 {
                counter.inc_by(delta);
            }
        }
    }
}

/// Prometheus registry fed from `FeedMetrics` and `FeedStatus`
pub struct PrometheusExporter {
    registry: Registry,
    counters: Counters,
    connection_phase: IntGauge,
    latency_ns: IntGaugeVec,
    metrics: Arc<FeedMetrics>,
    status: Arc<FeedStatus>,
    latency: Option<Arc<LatencyTracker>>,
    last: Mutex<MetricsSnapshot>,
}

impl PrometheusExporter {
    pub fn new(
        metrics: Arc<FeedMetrics>,
        status: Arc<FeedStatus>,
        latency: Option<Arc<LatencyTracker>>,
    ) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counters = Counters::new(&registry)?;

        let connection_phase = IntGauge::with_opts(
            Opts::new(
                "connection_phase",
                "0=disconnected 1=connecting 2=connected 3=draining 4=failed",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(connection_phase.clone()))?;

        let latency_ns = IntGaugeVec::new(
            Opts::new("latency_ns", "Latency percentiles over retained samples")
                .namespace(NAMESPACE),
            &["series", "quantile"],
        )?;
        registry.register(Box::new(latency_ns.clone()))?;

        info!("Prometheus exporter initialized");

        Ok(Self {
            registry,
            counters,
            connection_phase,
            latency_ns,
            metrics,
            status,
            latency,
            last: Mutex::new(MetricsSnapshot::default()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether the feed currently holds a live connection
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    /// Bring the registry up to date with the live counters
    pub fn sync(&self) {
        let now = self.metrics.snapshot();
        {
            let mut last = self.last.lock();
            self.counters.add_delta(&now, &last);
            *last = now;
        }

        self.connection_phase.set(i64::from(self.status.phase() as u8));

        if let Some(tracker) = &self.latency {
            for (series, label) in [
                (LatencySeries::Receive, "receive"),
                (LatencySeries::Decode, "decode"),
            ] {
                let summary = tracker.summary(series);
                self.latency_ns
                    .with_label_values(&[label, "0.5"])
                    .set(summary.p50_ns as i64);
                self.latency_ns
                    .with_label_values(&[label, "0.99"])
                    .set(summary.p99_ns as i64);
            }
        }
    }
}
