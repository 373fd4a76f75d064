//! Feed handler lifecycle against scripted transport and readiness doubles
//!
//! Each connect pops one session from the script: either a refusal or a
//! sequence of receive steps. Close calls are counted only when they release
//! something open, so double releases show up as extra counts.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tickfeed_core::cache::SymbolCache;
use tickfeed_core::config::FeedConfig;
use tickfeed_core::core::{ConnectionPhase, FeedError, Tick, TransportError};
use tickfeed_core::feed::{FeedHandler, StopHandle};
use tickfeed_core::perf::{FeedMetrics, LatencySeries, LatencyTracker};
use tickfeed_core::protocol::{encode_heartbeat, encode_tick, Subscription};
use tickfeed_core::resilience::BackoffConfig;
use tickfeed_core::transport::{Readiness, RecvOutcome, Transport};

const FAKE_FD: RawFd = 42;

#[derive(Default)]
struct Calls {
    connects: AtomicUsize,
    transport_closes: AtomicUsize,
    registers: AtomicUsize,
    readiness_closes: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
}

enum Step {
    Data(Vec<u8>),
    Close,
    Reset,
}

enum Session {
    Refuse,
    Serve(Vec<Step>),
}

struct ScriptedTransport {
    sessions: VecDeque<Session>,
    steps: VecDeque<Step>,
    open: bool,
    calls: Arc<Calls>,
    /// Fired once the script runs dry
    stop_when_done: Option<StopHandle>,
}

impl ScriptedTransport {
    fn new(sessions: Vec<Session>, calls: Arc<Calls>) -> Self {
        Self {
            sessions: sessions.into(),
            steps: VecDeque::new(),
            open: false,
            calls,
            stop_when_done: None,
        }
    }

    fn stop_when_done(mut self, stop: StopHandle) -> Self {
        self.stop_when_done = Some(stop);
        self
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, endpoint: &str, _timeout: Duration) -> Result<(), TransportError> {
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        match self.sessions.pop_front() {
            Some(Session::Serve(steps)) => {
                self.steps = steps.into();
                self.open = true;
                Ok(())
            }
            Some(Session::Refuse) | None => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source: io::ErrorKind::ConnectionRefused.into(),
            }),
        }
    }

    fn tune_for_latency(&mut self, _recv_buffer: usize) -> Result<(), TransportError> {
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        match self.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                if bytes.len() > buf.len() {
                    let rest = bytes.split_off(buf.len());
                    self.steps.push_front(Step::Data(rest));
                }
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(RecvOutcome::Data(bytes.len()))
            }
            Some(Step::Close) => Ok(RecvOutcome::Closed),
            Some(Step::Reset) => Err(io::Error::from(io::ErrorKind::ConnectionReset).into()),
            None => {
                if self.sessions.is_empty() {
                    if let Some(stop) = &self.stop_when_done {
                        stop.stop("script exhausted");
                    }
                }
                Ok(RecvOutcome::WouldBlock)
            }
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.calls.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.open.then_some(FAKE_FD)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.calls.transport_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Always reports one ready descriptor after a short pause
struct EagerReadiness {
    open: bool,
    calls: Arc<Calls>,
}

impl EagerReadiness {
    fn new(calls: Arc<Calls>) -> Self {
        Self { open: true, calls }
    }
}

impl Readiness for EagerReadiness {
    fn register(&mut self, _fd: RawFd) -> io::Result<()> {
        self.calls.registers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deregister(&mut self, _fd: RawFd) -> io::Result<()> {
        Ok(())
    }

    fn wait(&mut self, _timeout: Duration) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(1));
        Ok(1)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.calls.readiness_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn config(instruments: usize) -> FeedConfig {
    FeedConfig {
        connect_attempts: 3,
        backoff: BackoffConfig::aggressive(),
        poll_timeout: Duration::from_millis(10),
        rx_chunk_size: 64,
        ..FeedConfig::new("feed.test", 9000, instruments)
    }
}

fn frames(ticks: &[Tick]) -> Vec<u8> {
    let mut out = Vec::new();
    for tick in ticks {
        encode_tick(tick, &mut out);
    }
    out
}

type Handler = FeedHandler<ScriptedTransport, EagerReadiness>;

fn handler(
    instruments: usize,
    sessions: Vec<Session>,
    auto_stop: bool,
) -> (Handler, Arc<SymbolCache>, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let stop = StopHandle::new();
    let mut transport = ScriptedTransport::new(sessions, calls.clone());
    if auto_stop {
        transport = transport.stop_when_done(stop.clone());
    }

    let cache = SymbolCache::new(instruments);
    let writer = cache.writer().unwrap();
    let handler = FeedHandler::new(
        config(instruments),
        transport,
        EagerReadiness::new(calls.clone()),
        writer,
    )
    .unwrap()
    .with_stop(stop);

    (handler, cache, calls)
}

// ============================================================================
// HAPPY PATH
// ============================================================================

#[test]
fn test_ticks_reach_cache() {
    let stream = frames(&[
        Tick::quote(100, 2, 1, (10.0, 5), (10.5, 7)),
        Tick::trade(200, 2, 2, 10.25, 3),
        Tick::trade(300, 0, 1, 99.0, 1),
    ]);
    let (mut handler, cache, calls) =
        handler(4, vec![Session::Serve(vec![Step::Data(stream)])], true);

    let report = handler.run().unwrap();

    let state = cache.read_snapshot(2).unwrap();
    assert_eq!(state.best_bid, 10.0);
    assert_eq!(state.best_ask, 10.5);
    assert_eq!(state.last_traded_price, 10.25);
    assert_eq!(state.update_count, 3);
    assert_eq!(cache.read_snapshot(0).unwrap().last_traded_quantity, 1);

    assert_eq!(report.metrics.ticks_published, 3);
    assert_eq!(report.metrics.connects, 1);
    assert_eq!(report.decoder.quotes, 1);
    assert_eq!(report.decoder.trades, 2);
    assert_eq!(report.stop_reason.as_deref(), Some("script exhausted"));

    assert_eq!(calls.registers.load(Ordering::SeqCst), 1);
    assert_eq!(calls.transport_closes.load(Ordering::SeqCst), 1);
    assert_eq!(calls.readiness_closes.load(Ordering::SeqCst), 1);
    assert_eq!(handler.status().phase(), ConnectionPhase::Disconnected);
}

#[test]
fn test_frames_split_across_receives() {
    // rx_chunk_size is 64, so a 44-byte quote straddles receive boundaries
    let ticks: Vec<Tick> = (1..=20)
        .map(|seq| Tick::quote(seq as u64, 1, seq, (1.0, 1), (1.5, 1)))
        .collect();
    let (mut handler, cache, _calls) =
        handler(2, vec![Session::Serve(vec![Step::Data(frames(&ticks))])], true);

    let report = handler.run().unwrap();

    assert_eq!(report.metrics.ticks_published, 20);
    assert_eq!(report.metrics.sequence_gaps, 0);
    assert_eq!(cache.read_snapshot(1).unwrap().update_count, 40);
}

#[test]
fn test_corruption_and_heartbeats_are_absorbed() {
    let mut stream = frames(&[Tick::trade(1, 0, 1, 5.0, 1)]);
    stream.extend_from_slice(&[0xAB, 0xCD, 0xEF]);
    encode_heartbeat(1, 2, 0, &mut stream);
    stream.extend(frames(&[Tick::trade(3, 0, 2, 6.0, 1)]));

    let (mut handler, cache, _calls) =
        handler(1, vec![Session::Serve(vec![Step::Data(stream)])], true);

    let report = handler.run().unwrap();

    assert_eq!(report.metrics.ticks_published, 2);
    assert_eq!(report.decoder.bytes_dropped, 3);
    assert_eq!(report.metrics.heartbeats, 1);
    assert_eq!(cache.read_snapshot(0).unwrap().last_traded_price, 6.0);
}

#[test]
fn test_out_of_range_and_gaps_counted() {
    let stream = frames(&[
        Tick::trade(1, 0, 1, 5.0, 1),
        Tick::trade(2, 7, 1, 5.0, 1),
        Tick::trade(3, 0, 5, 5.0, 1),
    ]);
    let (mut handler, _cache, _calls) =
        handler(2, vec![Session::Serve(vec![Step::Data(stream)])], true);

    let report = handler.run().unwrap();

    assert_eq!(report.metrics.ticks_published, 2);
    assert_eq!(report.metrics.rejected_ticks, 1);
    assert_eq!(report.metrics.sequence_gaps, 1);
    assert_eq!(report.metrics.missing_messages, 3);
}

#[test]
fn test_subscription_sent_on_connect() {
    let calls = Arc::new(Calls::default());
    let stop = StopHandle::new();
    let transport = ScriptedTransport::new(vec![Session::Serve(vec![])], calls.clone())
        .stop_when_done(stop.clone());
    let cache = SymbolCache::new(4);

    let mut config = config(4);
    config.subscription = vec![1, 3];

    let mut handler = FeedHandler::new(
        config,
        transport,
        EagerReadiness::new(calls.clone()),
        cache.writer().unwrap(),
    )
    .unwrap()
    .with_stop(stop);
    handler.run().unwrap();

    let sent = calls.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], Subscription::new(vec![1, 3]).encode().unwrap());
}

#[test]
fn test_latency_samples_recorded() {
    let tracker = Arc::new(LatencyTracker::new());
    let metrics = Arc::new(FeedMetrics::new());
    let stream = frames(&[Tick::trade(1, 0, 1, 5.0, 1), Tick::trade(2, 0, 2, 5.5, 1)]);
    let (handler, _cache, _calls) =
        handler(1, vec![Session::Serve(vec![Step::Data(stream)])], true);
    let mut handler = handler
        .with_latency(tracker.clone())
        .with_metrics(metrics.clone());

    handler.run().unwrap();

    assert_eq!(tracker.summary(LatencySeries::Decode).count, 2);
    assert!(tracker.summary(LatencySeries::Receive).count >= 1);
    assert_eq!(metrics.snapshot().ticks_published, 2);
}

// ============================================================================
// RECONNECT AND FAILURE
// ============================================================================

#[test]
fn test_reconnects_after_peer_close() {
    let sessions = vec![
        Session::Serve(vec![
            Step::Data(frames(&[Tick::trade(1, 0, 1, 5.0, 1)])),
            Step::Close,
        ]),
        Session::Refuse,
        Session::Serve(vec![Step::Data(frames(&[Tick::trade(2, 1, 1, 7.0, 2)]))]),
    ];
    let (mut handler, cache, calls) = handler(2, sessions, true);

    let report = handler.run().unwrap();

    assert_eq!(report.metrics.connects, 2);
    assert_eq!(report.metrics.disconnects, 1);
    assert_eq!(report.metrics.connect_failures, 1);
    assert_eq!(cache.read_snapshot(0).unwrap().last_traded_price, 5.0);
    assert_eq!(cache.read_snapshot(1).unwrap().last_traded_price, 7.0);

    assert_eq!(calls.connects.load(Ordering::SeqCst), 3);
    assert_eq!(calls.registers.load(Ordering::SeqCst), 2);
    assert_eq!(calls.transport_closes.load(Ordering::SeqCst), 2);
    assert_eq!(calls.readiness_closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transport_error_treated_as_disconnect() {
    let sessions = vec![
        Session::Serve(vec![Step::Reset]),
        Session::Serve(vec![Step::Data(frames(&[Tick::trade(1, 0, 1, 5.0, 1)]))]),
    ];
    let (mut handler, _cache, _calls) = handler(1, sessions, true);

    let report = handler.run().unwrap();

    assert_eq!(report.metrics.connects, 2);
    assert_eq!(report.metrics.disconnects, 1);
    assert_eq!(report.metrics.ticks_published, 1);
}

#[test]
fn test_sequence_tracking_resets_on_reconnect() {
    // The server restarts its sequence numbers after the reconnect
    let sessions = vec![
        Session::Serve(vec![
            Step::Data(frames(&[Tick::trade(1, 0, 500, 5.0, 1)])),
            Step::Close,
        ]),
        Session::Serve(vec![Step::Data(frames(&[Tick::trade(2, 0, 1, 6.0, 1)]))]),
    ];
    let (mut handler, _cache, _calls) = handler(1, sessions, true);

    let report = handler.run().unwrap();

    assert_eq!(report.metrics.sequence_gaps, 0);
    assert_eq!(report.metrics.ticks_published, 2);
}

#[test]
fn test_retries_exhausted() {
    let sessions = vec![Session::Refuse, Session::Refuse, Session::Refuse];
    let (mut handler, cache, calls) = handler(2, sessions, false);

    match handler.run() {
        Err(FeedError::RetriesExhausted { endpoint, attempts }) => {
            assert_eq!(endpoint, "feed.test:9000");
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected RetriesExhausted, got {other:?}"),
    }

    assert_eq!(calls.connects.load(Ordering::SeqCst), 3);
    assert_eq!(calls.transport_closes.load(Ordering::SeqCst), 0);
    assert_eq!(calls.readiness_closes.load(Ordering::SeqCst), 1);
    assert_eq!(handler.status().phase(), ConnectionPhase::Failed);
    assert_eq!(handler.metrics().snapshot().connect_failures, 3);
    assert_eq!(cache.total_updates(), 0);
}

#[test]
fn test_stop_during_backoff() {
    let mut config = config(1);
    config.connect_attempts = 100;
    config.backoff = BackoffConfig {
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        ..BackoffConfig::default()
    };

    let calls = Arc::new(Calls::default());
    let transport = ScriptedTransport::new(vec![], calls.clone());
    let cache = SymbolCache::new(1);
    let mut handler = FeedHandler::new(
        config,
        transport,
        EagerReadiness::new(calls.clone()),
        cache.writer().unwrap(),
    )
    .unwrap();

    let stop = handler.stop_handle().clone();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        stop.stop("operator");
    });

    let started = std::time::Instant::now();
    let report = handler.run().unwrap();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.metrics.connects, 0);
    assert_eq!(report.stop_reason.as_deref(), Some("operator"));
    assert_eq!(calls.connects.load(Ordering::SeqCst), 1);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_concurrent_stop_releases_once() {
    let (handler, _cache, calls) = handler(1, vec![Session::Serve(vec![])], false);
    let status = handler.status().clone();
    let stop = handler.stop_handle().clone();

    let runner = thread::spawn(move || {
        let mut handler = handler;
        let result = handler.run();
        (handler, result)
    });

    while !status.is_connected() {
        thread::sleep(Duration::from_millis(1));
    }

    let stoppers: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|reason| {
            let stop = stop.clone();
            thread::spawn(move || stop.stop(reason))
        })
        .collect();
    for s in stoppers {
        s.join().unwrap();
    }

    let (mut handler, result) = runner.join().unwrap();
    let report = result.unwrap();
    assert!(matches!(
        report.stop_reason.as_deref(),
        Some("first") | Some("second")
    ));

    // Second explicit release and the eventual drop are no-ops
    handler.shutdown();
    handler.shutdown();
    drop(handler);

    assert_eq!(calls.transport_closes.load(Ordering::SeqCst), 1);
    assert_eq!(calls.readiness_closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_run_after_shutdown_is_rejected() {
    let (mut handler, _cache, calls) = handler(1, vec![Session::Serve(vec![])], true);

    handler.shutdown();
    assert!(matches!(handler.run(), Err(FeedError::ShutDown)));
    assert_eq!(calls.connects.load(Ordering::SeqCst), 0);
    assert_eq!(calls.readiness_closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_new_rejects_mismatched_cache() {
    let calls = Arc::new(Calls::default());
    let cache = SymbolCache::new(3);

    let result = FeedHandler::new(
        config(4),
        ScriptedTransport::new(vec![], calls.clone()),
        EagerReadiness::new(calls),
        cache.writer().unwrap(),
    );

    assert!(matches!(result, Err(FeedError::Config(_))));
}
