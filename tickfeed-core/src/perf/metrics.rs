//! Lock-free feed counters
//!
//! Written by the ingestion thread, read by anyone. Every counter sits on its
//! own cache line so display and exporter threads polling them do not bounce
//! the line the writer is incrementing. All accesses are `Relaxed`: counters
//! are monotonic statistics, not synchronization.

use crate::protocol::DecoderStats;
use crossbeam_utils::CachePadded;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FeedMetrics {
    /// Raw bytes read from the transport
    pub bytes_received: CachePadded<AtomicU64>,
    /// Successful non-empty `recv` calls
    pub receives: CachePadded<AtomicU64>,
    /// Ticks written to the cache
    pub ticks_published: CachePadded<AtomicU64>,
    /// Ticks dropped because their instrument id is out of range
    pub rejected_ticks: CachePadded<AtomicU64>,
    /// Sequence gap events
    pub sequence_gaps: CachePadded<AtomicU64>,
    /// Messages missing across all gaps
    pub missing_messages: CachePadded<AtomicU64>,
    pub connects: CachePadded<AtomicU64>,
    pub disconnects: CachePadded<AtomicU64>,
    pub connect_failures: CachePadded<AtomicU64>,

    // Mirrored from the decoder after each drain
    pub frames: CachePadded<AtomicU64>,
    pub trades: CachePadded<AtomicU64>,
    pub quotes: CachePadded<AtomicU64>,
    pub heartbeats: CachePadded<AtomicU64>,
    pub resync_bytes: CachePadded<AtomicU64>,
    pub checksum_failures: CachePadded<AtomicU64>,
    pub unknown_types: CachePadded<AtomicU64>,
    pub overflow_resets: CachePadded<AtomicU64>,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_receive(&self, bytes: usize) {
        self.receives.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_published(&self) {
        self.ticks_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_rejected(&self) {
        self.rejected_ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gap(&self, missing: u32) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
        self.missing_messages
            .fetch_add(u64::from(missing), Ordering::Relaxed);
    }

    pub fn inc_connects(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_disconnects(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_connect_failures(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the decoder's running totals
    pub fn sync_decoder(&self, stats: &DecoderStats) {
        self.frames.store(stats.frames, Ordering::Relaxed);
        self.trades.store(stats.trades, Ordering::Relaxed);
        self.quotes.store(stats.quotes, Ordering::Relaxed);
        self.heartbeats.store(stats.heartbeats, Ordering::Relaxed);
        self.resync_bytes.store(stats.bytes_dropped, Ordering::Relaxed);
        self.checksum_failures
            .store(stats.checksum_failures, Ordering::Relaxed);
        self.unknown_types.store(stats.unknown_types, Ordering::Relaxed);
        self.overflow_resets
            .store(stats.overflow_resets, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            receives: self.receives.load(Ordering::Relaxed),
            ticks_published: self.ticks_published.load(Ordering::Relaxed),
            rejected_ticks: self.rejected_ticks.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            missing_messages: self.missing_messages.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            quotes: self.quotes.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            resync_bytes: self.resync_bytes.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            unknown_types: self.unknown_types.load(Ordering::Relaxed),
            overflow_resets: self.overflow_resets.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `FeedMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub bytes_received: u64,
    pub receives: u64,
    pub ticks_published: u64,
    pub rejected_ticks: u64,
    pub sequence_gaps: u64,
    pub missing_messages: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub connect_failures: u64,
    pub frames: u64,
    pub trades: u64,
    pub quotes: u64,
    pub heartbeats: u64,
    pub resync_bytes: u64,
    pub checksum_failures: u64,
    pub unknown_types: u64,
    pub overflow_resets: u64,
}

impl MetricsSnapshot {
    /// Ticks per second between two snapshots taken `elapsed_secs` apart
    pub fn tick_rate_since(&self, earlier: &MetricsSnapshot, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.ticks_published.saturating_sub(earlier.ticks_published) as f64 / elapsed_secs
    }

    /// Average bytes per receive call
    pub fn avg_receive_size(&self) -> f64 {
        if self.receives > 0 {
            self.bytes_received as f64 / self.receives as f64
        } else {
            0.0
        }
    }
}
