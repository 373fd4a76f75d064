//! Performance plumbing for the ingestion thread
//!
//! - **CPU affinity**: pin the feed thread, optionally `SCHED_FIFO`
//! - **Counters**: cache-padded relaxed atomics shared with readers
//! - **Latency**: receive and tick-age percentiles behind `LatencySink`

pub mod cpu;
pub mod latency;
pub mod metrics;

pub use cpu::{num_cores, optimize_ingest_thread, pin_to_core, set_realtime_priority};
pub use latency::{LatencySeries, LatencySink, LatencySummary, LatencyTracker, NoopLatency};
pub use metrics::{FeedMetrics, MetricsSnapshot};
