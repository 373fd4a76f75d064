//! Centralized defaults for the feed pipeline
//!
//! Everything here is a compile-time constant. Runtime structs
//! (`FeedConfig`, `BackoffConfig`, `SimulatorConfig`) start from these
//! values and the binaries override them from the command line.

use std::time::Duration;

// ===== WIRE PROTOCOL =====

/// Fixed frame header: type (2) + sequence (4) + timestamp (8) + instrument (2)
pub const HEADER_SIZE: usize = 16;

/// Trailing XOR checksum
pub const CHECKSUM_SIZE: usize = 4;

/// Smallest possible frame (heartbeat, no payload)
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Trade payload: f64 price + u32 quantity
pub const TRADE_PAYLOAD_SIZE: usize = 12;

/// Quote payload: f64 bid + u32 bid qty + f64 ask + u32 ask qty
pub const QUOTE_PAYLOAD_SIZE: usize = 24;

/// Largest frame the decoder can see (quote)
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + QUOTE_PAYLOAD_SIZE + CHECKSUM_SIZE;

/// Marker byte opening a client subscription request
pub const SUBSCRIPTION_MARKER: u8 = 0xFF;

// ===== DECODER =====

/// Decode buffer capacity (1 MiB). Appending past this resets the decoder.
pub const MAX_DECODE_BUFFER: usize = 1 << 20;

/// Largest `recv` chunk that always fits beside a buffered partial frame
pub const MAX_RX_CHUNK_SIZE: usize = MAX_DECODE_BUFFER - MAX_FRAME_SIZE;

// ===== INGESTION =====

/// Size of the scratch buffer each `recv` fills (64 KiB)
pub const RX_CHUNK_SIZE: usize = 64 * 1024;

/// Kernel receive buffer requested on connect (4 MiB)
pub const SOCKET_RECV_BUFFER: usize = 4 * 1024 * 1024;

/// Connection attempts before a run is declared failed
pub const CONNECT_ATTEMPTS: u32 = 5;

/// First reconnect delay; doubles after each failed attempt
pub const BACKOFF_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on a single reconnect delay
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(5);

/// Timeout for a single connect attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on a readiness wait so housekeeping still runs on a silent feed
pub const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Interval between periodic stats log lines
pub const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Granularity of stop checks while sleeping between connect attempts
pub const STOP_CHECK_SLICE: Duration = Duration::from_millis(50);

// ===== ENDPOINT DEFAULTS =====

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9876;
pub const DEFAULT_INSTRUMENTS: usize = 500;

// ===== SIMULATOR =====

/// Ticks per second per instrument sweep
pub const DEFAULT_TICK_RATE: u32 = 10_000;

/// Outbound bytes a slow client may accumulate before being dropped (8 MiB)
pub const MAX_CLIENT_BACKLOG: usize = 8 * 1024 * 1024;

/// Heartbeat cadence on the simulator side
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

// ===== OBSERVABILITY =====

/// Samples retained per latency series before the oldest are overwritten
pub const LATENCY_SAMPLE_CAPACITY: usize = 100_000;
