use super::constants::*;
use crate::resilience::BackoffConfig;
use std::time::Duration;

/// Ingestion configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Exchange host (name or address)
    pub host: String,

    /// Exchange port
    pub port: u16,

    /// Number of instruments the cache holds; ids must be below this
    pub instruments: usize,

    /// Connection attempts per (re)connect cycle before the run fails
    pub connect_attempts: u32,

    /// Delay schedule between attempts
    pub backoff: BackoffConfig,

    /// Timeout for a single connect attempt
    pub connect_timeout: Duration,

    /// Bound on one readiness wait
    pub poll_timeout: Duration,

    /// Requested kernel receive buffer
    pub recv_buffer_size: usize,

    /// Bytes pulled per `recv`
    pub rx_chunk_size: usize,

    /// Instruments to request from the server; empty means everything
    pub subscription: Vec<u16>,

    /// Period of the stats log line
    pub stats_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            instruments: DEFAULT_INSTRUMENTS,
            connect_attempts: CONNECT_ATTEMPTS,
            backoff: BackoffConfig::default(),
            connect_timeout: CONNECT_TIMEOUT,
            poll_timeout: POLL_TIMEOUT,
            recv_buffer_size: SOCKET_RECV_BUFFER,
            rx_chunk_size: RX_CHUNK_SIZE,
            subscription: Vec::new(),
            stats_interval: STATS_LOG_INTERVAL,
        }
    }
}

impl FeedConfig {
    /// Config pointing at `host:port` with defaults for everything else
    pub fn new(host: impl Into<String>, port: u16, instruments: usize) -> Self {
        Self {
            host: host.into(),
            port,
            instruments,
            ..Default::default()
        }
    }

    /// `host:port` string used for resolution and logging
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instruments == 0 {
            anyhow::bail!("instruments must be positive");
        }

        if self.instruments > usize::from(u16::MAX) + 1 {
            anyhow::bail!(
                "instruments ({}) exceeds the u16 id space of the wire format",
                self.instruments
            );
        }

        if self.connect_attempts == 0 {
            anyhow::bail!("connect_attempts must be at least 1");
        }

        if self.rx_chunk_size == 0 {
            anyhow::bail!("rx_chunk_size must be positive");
        }

        // A chunk must fit beside one partial frame in the decode window
        if self.rx_chunk_size > MAX_RX_CHUNK_SIZE {
            anyhow::bail!(
                "rx_chunk_size ({}) exceeds the decoder window limit of {} bytes",
                self.rx_chunk_size,
                MAX_RX_CHUNK_SIZE
            );
        }

        self.backoff.validate()?;

        if self.poll_timeout.is_zero() {
            anyhow::bail!("poll_timeout must be non-zero");
        }

        if let Some(bad) = self
            .subscription
            .iter()
            .find(|&&id| usize::from(id) >= self.instruments)
        {
            anyhow::bail!(
                "subscription id {} is outside the {} configured instruments",
                bad,
                self.instruments
            );
        }

        Ok(())
    }
}

/// Exchange simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Listen port
    pub port: u16,

    /// Instruments to generate ticks for
    pub instruments: usize,

    /// Full sweeps over all instruments per second
    pub tick_rate: u32,

    /// Probability that an outgoing frame gets one byte corrupted
    pub fault_rate: f64,

    /// Seed for reproducible price paths
    pub seed: Option<u64>,

    /// Heartbeat cadence
    pub heartbeat_interval: Duration,

    /// Per-client outbound backlog limit in bytes
    pub max_client_backlog: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            instruments: 100,
            tick_rate: DEFAULT_TICK_RATE,
            fault_rate: 0.0,
            seed: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            max_client_backlog: MAX_CLIENT_BACKLOG,
        }
    }
}

impl SimulatorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instruments == 0 || self.instruments > usize::from(u16::MAX) + 1 {
            anyhow::bail!("instruments must be in 1..=65536, got {}", self.instruments);
        }

        if self.tick_rate == 0 {
            anyhow::bail!("tick_rate must be positive");
        }

        if !(0.0..=1.0).contains(&self.fault_rate) {
            anyhow::bail!("fault_rate must be within [0, 1], got {}", self.fault_rate);
        }

        Ok(())
    }
}
