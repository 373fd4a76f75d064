//! Feed handler: connection lifecycle, drain loop, publication
//!
//! ```text
//!  ┌────────────┐  readiness   ┌─────────┐  bytes  ┌──────────────┐  Tick  ┌─────────────┐
//!  │ Transport  │ ───────────→ │  drain  │ ──────→ │ FrameDecoder │ ─────→ │ CacheWriter │
//!  └────────────┘  (edge)      └─────────┘         └──────────────┘        └─────────────┘
//! ```
//!
//! One thread owns everything in this file. It blocks only inside
//! `Readiness::wait` (bounded by `poll_timeout`) and inside backoff sleeps
//! (sliced so a stop is noticed promptly). The stop flag is checked once per
//! loop iteration, never mid-drain.

use super::{FeedStatus, StopHandle};
use crate::cache::CacheWriter;
use crate::config::FeedConfig;
use crate::core::connection_fsm::{
    AttemptResult, ConnectionConnected, ConnectionConnecting, ConnectionDisconnected,
    ConnectionDraining,
};
use crate::core::{now_ns, ConnectionPhase, FeedError, Tick, TickPayload, TransportError};
use crate::perf::{FeedMetrics, LatencySink, MetricsSnapshot, NoopLatency};
use crate::protocol::{DecoderStats, FrameDecoder, Subscription};
use crate::resilience::{ExponentialBackoff, SequenceCheck, SequenceTracker};
use crate::transport::{Readiness, RecvOutcome, Transport};
use serde::Serialize;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Summary returned when a run ends
#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub metrics: MetricsSnapshot,
    pub decoder: DecoderStats,
    pub stop_reason: Option<String>,
    pub elapsed: Duration,
}

impl FeedReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

enum ConnectOutcome {
    Connected(ConnectionConnected),
    Stopped(ConnectionDisconnected),
    Exhausted { attempts: u32 },
}

enum LoopExit {
    PeerClosed(ConnectionDisconnected),
    Stopped(ConnectionDraining),
}

enum DrainOutcome {
    /// Transport reported "no data now"
    Idle,
    /// Peer closed, or a transport error treated as such
    Closed(Option<TransportError>),
}

/// Ingestion orchestrator, generic over its I/O seams
pub struct FeedHandler<T: Transport, R: Readiness> {
    config: FeedConfig,
    transport: T,
    readiness: R,
    decoder: FrameDecoder,
    writer: CacheWriter,
    sequences: SequenceTracker,
    metrics: Arc<FeedMetrics>,
    latency: Arc<dyn LatencySink>,
    stop: StopHandle,
    status: Arc<FeedStatus>,
    backoff: ExponentialBackoff,
    rx_buffer: Box<[u8]>,
    registered_fd: Option<RawFd>,
    released: bool,
    last_stats: Instant,
    last_snapshot: MetricsSnapshot,
}

impl<T: Transport, R: Readiness> FeedHandler<T, R> {
    /// Build a handler publishing into `writer`'s cache
    ///
    /// `config.instruments` must match the cache size.
    pub fn new(
        config: FeedConfig,
        transport: T,
        readiness: R,
        writer: CacheWriter,
    ) -> Result<Self, FeedError> {
        config
            .validate()
            .map_err(|e| FeedError::Config(e.to_string()))?;

        let size = writer.cache().size();
        if size != config.instruments {
            return Err(FeedError::Config(format!(
                "cache holds {} instruments, config expects {}",
                size, config.instruments
            )));
        }

        Ok(Self {
            sequences: SequenceTracker::new(size),
            backoff: ExponentialBackoff::with_config(config.backoff.clone()),
            rx_buffer: vec![0u8; config.rx_chunk_size].into_boxed_slice(),
            decoder: FrameDecoder::new(),
            metrics: Arc::new(FeedMetrics::new()),
            latency: Arc::new(NoopLatency),
            stop: StopHandle::new(),
            status: Arc::new(FeedStatus::new()),
            registered_fd: None,
            released: false,
            last_stats: Instant::now(),
            last_snapshot: MetricsSnapshot::default(),
            config,
            transport,
            readiness,
            writer,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<FeedMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_latency(mut self, latency: Arc<dyn LatencySink>) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_status(mut self, status: Arc<FeedStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    pub fn status(&self) -> &Arc<FeedStatus> {
        &self.status
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn readiness(&self) -> &R {
        &self.readiness
    }

    /// Run until stopped or the retry budget is exhausted
    ///
    /// Resources are released before this returns, on every path.
    pub fn run(&mut self) -> Result<FeedReport, FeedError> {
        if self.released {
            return Err(FeedError::ShutDown);
        }

        let started = Instant::now();
        info!(
            endpoint = %self.config.endpoint(),
            instruments = self.config.instruments,
            attempts = self.config.connect_attempts,
            "Feed handler starting"
        );

        let outcome = self.drive();
        self.shutdown();

        let report = FeedReport {
            metrics: self.metrics.snapshot(),
            decoder: self.decoder.stats(),
            stop_reason: self.stop.reason(),
            elapsed: started.elapsed(),
        };

        match outcome {
            Ok(()) => {
                info!(
                    ticks = report.metrics.ticks_published,
                    connects = report.metrics.connects,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Feed handler stopped"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Feed handler terminated");
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> Result<(), FeedError> {
        let mut idle =
            ConnectionDisconnected::new(self.config.endpoint(), self.config.connect_attempts);

        loop {
            let connected = match self.connect_with_retry(idle.begin_connect()) {
                ConnectOutcome::Connected(connected) => connected,
                ConnectOutcome::Stopped(idle) => {
                    debug!(
                        attempts = idle.data().total_attempts,
                        "Stopped before a connection was established"
                    );
                    return Ok(());
                }
                ConnectOutcome::Exhausted { attempts } => {
                    self.status.set_phase(ConnectionPhase::Failed);
                    return Err(FeedError::RetriesExhausted {
                        endpoint: self.config.endpoint(),
                        attempts,
                    });
                }
            };

            match self.event_loop(connected)? {
                LoopExit::PeerClosed(disconnected) => idle = disconnected,
                LoopExit::Stopped(draining) => {
                    self.status.set_phase(ConnectionPhase::Draining);
                    self.release_connection();
                    let done = draining.finish();
                    self.status.set_phase(ConnectionPhase::Disconnected);
                    debug!(
                        connects = done.data().connect_count,
                        disconnects = done.data().disconnect_count,
                        "Connection drained"
                    );
                    return Ok(());
                }
            }
        }
    }

    fn connect_with_retry(&mut self, mut connecting: ConnectionConnecting) -> ConnectOutcome {
        self.status.set_phase(ConnectionPhase::Connecting);
        let endpoint = connecting.data().endpoint.clone();

        loop {
            if self.stop.is_stopped() {
                self.status.set_attempt(0);
                self.status.set_phase(ConnectionPhase::Disconnected);
                return ConnectOutcome::Stopped(connecting.abandon());
            }

            let attempt = connecting.current_attempt();
            self.status.set_attempt(attempt);
            info!(
                endpoint = %endpoint,
                attempt,
                max_attempts = connecting.max_attempts(),
                "Connecting to feed"
            );

            match self.establish(&endpoint) {
                Ok(fd) => {
                    self.backoff.reset();
                    self.metrics.inc_connects();
                    self.status.set_attempt(0);
                    self.status.set_connected_at(now_ns());
                    self.status.set_phase(ConnectionPhase::Connected);
                    info!(endpoint = %endpoint, fd, attempt, "Connected to feed");
                    return ConnectOutcome::Connected(connecting.succeeded());
                }
                Err(e) => {
                    self.metrics.inc_connect_failures();
                    self.release_connection();

                    match connecting.failed() {
                        AttemptResult::Retry(next) => {
                            let delay = self.backoff.next_delay();
                            warn!(
                                error = %e,
                                attempt,
                                retry_in_ms = delay.as_millis() as u64,
                                "Connect failed, backing off"
                            );
                            connecting = next;
                            self.stop.sleep(delay);
                        }
                        AttemptResult::Exhausted(failed) => {
                            let attempts = failed.data().max_attempts;
                            error!(error = %e, attempts, "Connect failed, retry budget exhausted");
                            self.backoff.reset();
                            self.status.set_attempt(0);
                            return ConnectOutcome::Exhausted { attempts };
                        }
                    }
                }
            }
        }
    }

    /// Connect, tune, subscribe and register; returns the registered descriptor
    fn establish(&mut self, endpoint: &str) -> Result<RawFd, FeedError> {
        self.transport.connect(endpoint, self.config.connect_timeout)?;

        if let Err(e) = self.transport.tune_for_latency(self.config.recv_buffer_size) {
            warn!(error = %e, "Socket tuning failed, continuing with defaults");
        }

        if !self.config.subscription.is_empty() {
            let request = Subscription::new(self.config.subscription.clone())
                .encode()
                .map_err(|e| FeedError::Config(e.to_string()))?;
            self.transport.send(&request)?;
            debug!(
                instruments = self.config.subscription.len(),
                "Subscription sent"
            );
        }

        let fd = self.transport.raw_fd().ok_or(TransportError::NotConnected)?;
        self.readiness.register(fd).map_err(FeedError::Readiness)?;
        self.registered_fd = Some(fd);
        Ok(fd)
    }

    fn event_loop(&mut self, connected: ConnectionConnected) -> Result<LoopExit, FeedError> {
        loop {
            if self.stop.is_stopped() {
                return Ok(LoopExit::Stopped(connected.drain()));
            }

            let ready = self
                .readiness
                .wait(self.config.poll_timeout)
                .map_err(FeedError::Readiness)?;

            if ready > 0 {
                if let DrainOutcome::Closed(cause) = self.drain() {
                    match cause {
                        Some(e) => warn!(error = %e, "Transport error, reconnecting"),
                        None => warn!("Peer closed connection, reconnecting"),
                    }
                    self.on_disconnect();
                    return Ok(LoopExit::PeerClosed(connected.peer_closed()));
                }
            }

            self.housekeeping();
        }
    }

    /// Read until the transport reports "no data now"
    fn drain(&mut self) -> DrainOutcome {
        let mut bytes = 0usize;
        let mut ticks = 0usize;

        let outcome = loop {
            let started = Instant::now();
            match self.transport.recv(&mut self.rx_buffer) {
                Ok(RecvOutcome::Data(n)) => {
                    self.latency.record_receive(started.elapsed().as_nanos() as u64);
                    self.metrics.record_receive(n);
                    bytes += n;

                    let Self {
                        decoder,
                        writer,
                        sequences,
                        metrics,
                        latency,
                        rx_buffer,
                        ..
                    } = self;
                    ticks += decoder.consume(&rx_buffer[..n], |tick| {
                        publish_tick(writer, sequences, metrics, latency.as_ref(), &tick)
                    });
                }
                Ok(RecvOutcome::WouldBlock) => break DrainOutcome::Idle,
                Ok(RecvOutcome::Closed) => break DrainOutcome::Closed(None),
                Err(e) => break DrainOutcome::Closed(Some(e)),
            }
        };

        self.metrics.sync_decoder(&self.decoder.stats());
        debug!(bytes, ticks, "Drained transport");
        outcome
    }

    fn on_disconnect(&mut self) {
        self.release_connection();
        self.metrics.inc_disconnects();
        self.decoder.reset();
        self.sequences.reset();
        self.status.set_phase(ConnectionPhase::Disconnected);
    }

    /// Deregister and close the current connection, if any
    fn release_connection(&mut self) {
        if let Some(fd) = self.registered_fd.take() {
            if let Err(e) = self.readiness.deregister(fd) {
                debug!(fd, error = %e, "Deregister failed");
            }
        }
        self.transport.close();
    }

    fn housekeeping(&mut self) {
        if self.last_stats.elapsed() < self.config.stats_interval {
            return;
        }

        let snapshot = self.metrics.snapshot();
        let prev = self.last_snapshot;
        let elapsed = self.last_stats.elapsed().as_secs_f64();

        info!(
            ticks_per_sec = snapshot.tick_rate_since(&prev, elapsed) as u64,
            ticks = snapshot.ticks_published,
            bytes = snapshot.bytes_received,
            heartbeats = snapshot.heartbeats,
            cache_updates = self.writer.cache().total_updates(),
            "Feed stats"
        );

        if snapshot.resync_bytes > prev.resync_bytes {
            warn!(
                dropped_bytes = snapshot.resync_bytes - prev.resync_bytes,
                checksum_failures = snapshot.checksum_failures - prev.checksum_failures,
                unknown_types = snapshot.unknown_types - prev.unknown_types,
                "Resynchronized past corrupt input"
            );
        }
        if snapshot.overflow_resets > prev.overflow_resets {
            warn!(
                resets = snapshot.overflow_resets - prev.overflow_resets,
                "Decode buffer overflowed"
            );
        }
        if snapshot.sequence_gaps > prev.sequence_gaps {
            warn!(
                gaps = snapshot.sequence_gaps - prev.sequence_gaps,
                missing = snapshot.missing_messages - prev.missing_messages,
                "Sequence gaps detected"
            );
        }
        if snapshot.rejected_ticks > prev.rejected_ticks {
            warn!(
                rejected = snapshot.rejected_ticks - prev.rejected_ticks,
                instruments = self.config.instruments,
                "Ticks with out-of-range instrument ids dropped"
            );
        }

        self.last_snapshot = snapshot;
        self.last_stats = Instant::now();
    }

    /// Release transport and readiness handle; safe to call repeatedly
    pub fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.release_connection();
        self.readiness.close();
        self.metrics.sync_decoder(&self.decoder.stats());

        if self.status.phase() != ConnectionPhase::Failed {
            self.status.set_phase(ConnectionPhase::Disconnected);
        }
        info!("Feed handler resources released");
    }
}

impl<T: Transport, R: Readiness> Drop for FeedHandler<T, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Apply one tick to the cache
///
/// Trades with zero quantity carry no fill and leave the record untouched.
/// Quotes update bid then ask.
#[inline]
fn publish_tick(
    writer: &mut CacheWriter,
    sequences: &mut SequenceTracker,
    metrics: &FeedMetrics,
    latency: &dyn LatencySink,
    tick: &Tick,
) {
    let id = tick.instrument_id;
    let ts = tick.timestamp_ns;

    let written = match tick.payload {
        TickPayload::Trade { quantity: 0, .. } => Ok(false),
        TickPayload::Trade { price, quantity } => {
            writer.write_trade(id, price, quantity, ts).map(|()| true)
        }
        TickPayload::Quote {
            bid_price,
            bid_quantity,
            ask_price,
            ask_quantity,
        } => writer
            .write_bid(id, bid_price, bid_quantity, ts)
            .and_then(|()| writer.write_ask(id, ask_price, ask_quantity, ts))
            .map(|()| true),
    };

    match written {
        Ok(true) => metrics.inc_published(),
        Ok(false) => {}
        Err(_) => {
            metrics.inc_rejected();
            return;
        }
    }

    if let Some(SequenceCheck::Gap(missing)) = sequences.observe(id, tick.sequence) {
        metrics.record_gap(missing);
    }

    latency.record_decode(now_ns().saturating_sub(ts));
}

#[cfg(target_os = "linux")]
impl FeedHandler<crate::transport::TcpTransport, crate::transport::EpollPoller> {
    /// Production wiring: TCP transport driven by epoll
    pub fn tcp(config: FeedConfig, writer: CacheWriter) -> Result<Self, FeedError> {
        let poller = crate::transport::EpollPoller::new().map_err(FeedError::Readiness)?;
        Self::new(config, crate::transport::TcpTransport::new(), poller, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SymbolCache;

    fn fixture(instruments: usize) -> (Arc<SymbolCache>, CacheWriter, SequenceTracker, FeedMetrics) {
        let cache = SymbolCache::new(instruments);
        let writer = cache.writer().unwrap();
        (cache, writer, SequenceTracker::new(instruments), FeedMetrics::new())
    }

    #[test]
    fn test_publish_quote_updates_both_sides() {
        let (cache, mut writer, mut seqs, metrics) = fixture(4);
        let tick = Tick::quote(10, 2, 1, (10.0, 5), (10.5, 7));

        publish_tick(&mut writer, &mut seqs, &metrics, &NoopLatency, &tick);

        let state = cache.read_snapshot(2).unwrap();
        assert_eq!(state.best_bid, 10.0);
        assert_eq!(state.best_ask, 10.5);
        assert_eq!(state.update_count, 2);
        assert_eq!(metrics.snapshot().ticks_published, 1);
    }

    #[test]
    fn test_publish_zero_quantity_trade_skipped() {
        let (cache, mut writer, mut seqs, metrics) = fixture(2);
        let tick = Tick::trade(10, 1, 1, 99.0, 0);

        publish_tick(&mut writer, &mut seqs, &metrics, &NoopLatency, &tick);

        assert_eq!(cache.read_snapshot(1).unwrap().update_count, 0);
        assert_eq!(metrics.snapshot().ticks_published, 0);
    }

    #[test]
    fn test_publish_out_of_range_rejected() {
        let (cache, mut writer, mut seqs, metrics) = fixture(2);
        let tick = Tick::trade(10, 9, 1, 99.0, 10);

        publish_tick(&mut writer, &mut seqs, &metrics, &NoopLatency, &tick);

        assert_eq!(cache.total_updates(), 0);
        assert_eq!(metrics.snapshot().rejected_ticks, 1);
    }

    #[test]
    fn test_publish_counts_gaps() {
        let (_cache, mut writer, mut seqs, metrics) = fixture(1);

        for seq in [1, 2, 6] {
            let tick = Tick::trade(10, 0, seq, 1.0, 1);
            publish_tick(&mut writer, &mut seqs, &metrics, &NoopLatency, &tick);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sequence_gaps, 1);
        assert_eq!(snapshot.missing_messages, 3);
    }

    #[test]
    fn test_report_json() {
        let report = FeedReport {
            metrics: MetricsSnapshot::default(),
            decoder: DecoderStats::default(),
            stop_reason: Some("SIGINT".to_string()),
            elapsed: Duration::from_millis(1500),
        };

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["stop_reason"], "SIGINT");
        assert_eq!(value["metrics"]["ticks_published"], 0);
    }
}
