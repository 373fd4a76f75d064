//! Simulator → TCP → epoll → decoder → cache, over loopback

#![cfg(target_os = "linux")]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tickfeed_core::cache::SymbolCache;
use tickfeed_core::config::{FeedConfig, SimulatorConfig};
use tickfeed_core::feed::{FeedHandler, FeedReport, StopHandle};
use tickfeed_core::perf::FeedMetrics;
use tickfeed_core::resilience::BackoffConfig;
use tickfeed_core::sim::{ExchangeSimulator, SimulatorStats};

const INSTRUMENTS: usize = 16;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn start_simulator(
    port: u16,
    fault_rate: f64,
) -> (u16, StopHandle, thread::JoinHandle<SimulatorStats>) {
    let config = SimulatorConfig {
        port,
        instruments: INSTRUMENTS,
        tick_rate: 500,
        fault_rate,
        seed: Some(2024),
        ..Default::default()
    };
    let mut sim = ExchangeSimulator::bind(config).unwrap();
    let port = sim.local_addr().port();
    let stop = sim.stop_handle().clone();
    let handle = thread::spawn(move || sim.run().unwrap());
    (port, stop, handle)
}

struct Client {
    cache: Arc<SymbolCache>,
    metrics: Arc<FeedMetrics>,
    stop: StopHandle,
    handle: thread::JoinHandle<FeedReport>,
}

fn start_client(port: u16) -> Client {
    let config = FeedConfig {
        connect_attempts: 200,
        backoff: BackoffConfig::aggressive(),
        poll_timeout: Duration::from_millis(20),
        ..FeedConfig::new("127.0.0.1", port, INSTRUMENTS)
    };

    let cache = SymbolCache::new(INSTRUMENTS);
    let metrics = Arc::new(FeedMetrics::new());
    let stop = StopHandle::new();
    let mut handler = FeedHandler::tcp(config, cache.writer().unwrap())
        .unwrap()
        .with_metrics(metrics.clone())
        .with_stop(stop.clone());

    let handle = thread::spawn(move || handler.run().unwrap());
    Client {
        cache,
        metrics,
        stop,
        handle,
    }
}

#[test]
fn test_clean_stream_populates_every_instrument() {
    let (port, sim_stop, sim) = start_simulator(0, 0.0);
    let client = start_client(port);

    let all_updated = wait_until(Duration::from_secs(10), || {
        client
            .cache
            .snapshots()
            .all(|(_, state)| state.update_count >= 5)
    });
    assert!(all_updated, "not every instrument received updates");

    client.stop.stop("test complete");
    let report = client.handle.join().unwrap();
    sim_stop.stop("test complete");
    let sim_stats = sim.join().unwrap();

    assert!(report.metrics.ticks_published > 0);
    assert_eq!(report.metrics.sequence_gaps, 0);
    assert_eq!(report.metrics.rejected_ticks, 0);
    assert_eq!(report.decoder.bytes_dropped, 0);
    assert_eq!(report.metrics.connects, 1);
    assert_eq!(sim_stats.clients_accepted, 1);

    for (id, state) in client.cache.snapshots() {
        assert!(state.last_update_ns > 0, "instrument {id} never stamped");
        if state.best_bid > 0.0 && state.best_ask > 0.0 {
            assert!(state.best_bid < state.best_ask, "crossed quote on {id}");
        }
    }
}

#[test]
fn test_corrupted_stream_resynchronizes() {
    let (port, sim_stop, sim) = start_simulator(0, 0.05);
    let client = start_client(port);

    let recovered = wait_until(Duration::from_secs(10), || {
        let snapshot = client.metrics.snapshot();
        snapshot.resync_bytes > 0 && snapshot.ticks_published > 500
    });
    assert!(recovered, "decoder did not recover from injected faults");

    client.stop.stop("test complete");
    let report = client.handle.join().unwrap();
    sim_stop.stop("test complete");
    let sim_stats = sim.join().unwrap();

    assert!(sim_stats.frames_corrupted > 0);
    assert!(report.decoder.checksum_failures + report.decoder.unknown_types > 0);
    assert_eq!(report.metrics.connects, 1);
}

#[test]
fn test_client_reconnects_after_exchange_restart() {
    let (port, first_stop, first) = start_simulator(0, 0.0);
    let client = start_client(port);

    assert!(wait_until(Duration::from_secs(10), || {
        client.metrics.snapshot().ticks_published > 50
    }));

    first_stop.stop("restart");
    first.join().unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        client.metrics.snapshot().disconnects >= 1
    }));

    let (_, second_stop, second) = start_simulator(port, 0.0);
    let before = client.metrics.snapshot().ticks_published;

    assert!(
        wait_until(Duration::from_secs(10), || {
            let snapshot = client.metrics.snapshot();
            snapshot.connects >= 2 && snapshot.ticks_published > before + 50
        }),
        "client did not resume after the exchange restarted"
    );

    client.stop.stop("test complete");
    let report = client.handle.join().unwrap();
    second_stop.stop("test complete");
    second.join().unwrap();

    // Sequence numbers restart with the new exchange; tracking restarts too
    assert_eq!(report.metrics.sequence_gaps, 0);
    assert!(report.metrics.disconnects >= 1);
}
