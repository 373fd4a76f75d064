//! Tickfeed Core - Low-latency market data ingestion
//!
//! Binary frames arrive over TCP from an exchange feed, are decoded by a
//! resynchronizing codec and published into a fixed-size per-instrument
//! cache that any number of threads can read without locks.
//!
//! ## Architecture
//! - **One ingest thread** owns the socket, the readiness handle, the decoder
//!   and the cache writer
//! - **Seqlock cache** with one cache-line-padded record per instrument
//! - **Edge-triggered epoll**: every wakeup drains the socket to "would block"
//! - **Reconnect with exponential backoff** under a bounded attempt budget
//! - **Counters on the hot path, logging off it**
//!
//! ## Modules
//! - `protocol`: frame layout, checksum, stream decoder, subscription message
//! - `cache`: `SymbolCache` and its single `CacheWriter`
//! - `transport`: `Transport`/`Readiness` seams, TCP and epoll implementations
//! - `feed`: the `FeedHandler` orchestrator, stop handle, shared status
//! - `resilience`: backoff and sequence gap detection
//! - `perf`: counters, latency percentiles, CPU pinning
//! - `monitoring`: Prometheus export over HTTP
//! - `sim`: synthetic exchange for local runs and tests

pub mod cache;
pub mod config;
pub mod core;
pub mod feed;
pub mod monitoring;
pub mod perf;
pub mod protocol;
pub mod resilience;
pub mod sim;
pub mod transport;
pub mod utils;

pub use cache::{CacheWriter, SymbolCache};
pub use config::{FeedConfig, SimulatorConfig};
pub use core::{FeedError, InstrumentId, InstrumentState, Tick, TickPayload};
pub use feed::{FeedHandler, FeedReport, FeedStatus, StopHandle};
pub use protocol::FrameDecoder;

pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    // Core types
    pub use crate::core::{ConnectionPhase, InstrumentId, InstrumentState, Tick, TickPayload};

    // Pipeline
    pub use crate::cache::{CacheWriter, SymbolCache};
    pub use crate::feed::{FeedHandler, FeedReport, FeedStatus, StopHandle};
    pub use crate::protocol::{encode_tick, FrameDecoder};
    pub use crate::transport::{Readiness, RecvOutcome, Transport};

    // Observability
    pub use crate::perf::{FeedMetrics, LatencyTracker};

    // Configuration
    pub use crate::config::{FeedConfig, SimulatorConfig};

    // Error types
    pub use crate::core::FeedError;
    pub use crate::{Error, Result};
}
