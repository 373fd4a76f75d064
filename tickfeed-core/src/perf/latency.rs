//! Latency sampling
//!
//! The ingestion loop reports two series through `LatencySink`:
//!
//! - **receive**: wall time spent inside one successful `recv` call
//! - **decode**: wall clock at delivery minus the frame's own timestamp,
//!   i.e. producer-to-cache latency including the network
//!
//! `LatencyTracker` keeps the most recent samples of each series in a bounded
//! ring and answers percentiles over what it retains. Recording never waits:
//! a sample that finds its ring locked by a reader is counted as dropped.
//! Readers hold the lock only long enough to copy the retained samples.

use crate::config::constants::LATENCY_SAMPLE_CAPACITY;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver of latency samples, injected into the feed handler
pub trait LatencySink: Send + Sync {
    /// Duration of one successful raw receive, in nanoseconds
    fn record_receive(&self, ns: u64);

    /// Age of a tick at delivery, in nanoseconds
    fn record_decode(&self, ns: u64);
}

/// Discards every sample
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLatency;

impl LatencySink for NoopLatency {
    #[inline(always)]
    fn record_receive(&self, _ns: u64) {}

    #[inline(always)]
    fn record_decode(&self, _ns: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySeries {
    Receive,
    Decode,
}

/// Fixed-capacity ring of samples; overwrites the oldest when full
#[derive(Debug)]
struct SampleRing {
    samples: Vec<u64>,
    capacity: usize,
    next: usize,
    total: u64,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity.min(4096)),
            capacity,
            next: 0,
            total: 0,
        }
    }

    fn push(&mut self, value: u64) {
        self.total += 1;
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.next = 0;
        self.total = 0;
    }
}

/// Sample at rank `len * q / 100`, 0 when empty; reorders `samples`
fn select_percentile(samples: &mut [u64], q: u32) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let idx = (samples.len() * q.min(100) as usize / 100).min(samples.len() - 1);
    *samples.select_nth_unstable(idx).1
}

/// One series: the ring plus samples lost to reader contention
#[derive(Debug)]
struct Series {
    ring: Mutex<SampleRing>,
    dropped: AtomicU64,
}

impl Series {
    fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(SampleRing::new(capacity)),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record(&self, ns: u64) {
        match self.ring.try_lock() {
            Some(mut ring) => ring.push(ns),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Copy of the retained samples and the recorded total
    fn copy_out(&self) -> (Vec<u64>, u64) {
        let ring = self.ring.lock();
        (ring.samples.clone(), ring.total)
    }

    fn clear(&self) {
        self.ring.lock().clear();
        self.dropped.store(0, Ordering::Relaxed);
    }
}

/// Percentile summary of one series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    /// Samples ever recorded (retained or not)
    pub count: u64,
    /// Samples discarded because a reader held the ring
    pub dropped: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

/// Bounded two-series latency recorder
#[derive(Debug)]
pub struct LatencyTracker {
    receive: Series,
    decode: Series,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_SAMPLE_CAPACITY)
    }

    /// Tracker retaining at most `capacity` samples per series
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            receive: Series::new(capacity),
            decode: Series::new(capacity),
        }
    }

    fn series(&self, series: LatencySeries) -> &Series {
        match series {
            LatencySeries::Receive => &self.receive,
            LatencySeries::Decode => &self.decode,
        }
    }

    /// `q`-th percentile (0..=100) of a series, 0 when it has no samples
    pub fn percentile(&self, series: LatencySeries, q: u32) -> u64 {
        let (mut samples, _) = self.series(series).copy_out();
        select_percentile(&mut samples, q)
    }

    /// Median of the decode series
    pub fn p50(&self) -> u64 {
        self.percentile(LatencySeries::Decode, 50)
    }

    /// 99th percentile of the decode series
    pub fn p99(&self) -> u64 {
        self.percentile(LatencySeries::Decode, 99)
    }

    pub fn summary(&self, series: LatencySeries) -> LatencySummary {
        let series = self.series(series);
        let (mut samples, recorded) = series.copy_out();
        let dropped = series.dropped.load(Ordering::Relaxed);
        LatencySummary {
            count: recorded + dropped,
            dropped,
            p50_ns: select_percentile(&mut samples, 50),
            p99_ns: select_percentile(&mut samples, 99),
            max_ns: samples.iter().copied().max().unwrap_or(0),
        }
    }

    pub fn clear(&self) {
        self.receive.clear();
        self.decode.clear();
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencySink for LatencyTracker {
    #[inline]
    fn record_receive(&self, ns: u64) {
        self.receive.record(ns);
    }

    #[inline]
    fn record_decode(&self, ns: u64) {
        self.decode.record(ns);
    }
}
