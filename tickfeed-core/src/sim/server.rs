//! Exchange simulator: one listener, many clients, one tick stream
//!
//! Everything runs on the caller's thread with non-blocking sockets. Each
//! sweep generates one tick per instrument, encodes it once and appends the
//! frame to every client subscribed to that instrument. Clients whose
//! pending output exceeds `max_client_backlog`, or whose socket errors, are
//! dropped.

use super::TickGenerator;
use crate::config::constants::STOP_CHECK_SLICE;
use crate::config::SimulatorConfig;
use crate::core::now_ns;
use crate::feed::StopHandle;
use crate::protocol::{encode_heartbeat, encode_tick, Subscription};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sweeps allowed to fall behind before the schedule is reset
const MAX_SWEEP_LAG: u32 = 64;
const READ_CHUNK: usize = 1024;
const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulatorStats {
    pub sweeps: u64,
    pub frames_generated: u64,
    pub frames_corrupted: u64,
    pub heartbeats: u64,
    pub bytes_sent: u64,
    pub clients_accepted: u64,
    pub clients_dropped: u64,
}

struct Client {
    stream: TcpStream,
    addr: SocketAddr,
    /// `None` subscribes to every instrument
    filter: Option<Vec<bool>>,
    inbox: Vec<u8>,
    outbox: Vec<u8>,
}

impl Client {
    fn wants(&self, id: u16) -> bool {
        match &self.filter {
            None => true,
            Some(filter) => filter.get(usize::from(id)).copied().unwrap_or(false),
        }
    }

    fn apply(&mut self, subscription: Subscription, instruments: usize) {
        if subscription.is_all() {
            self.filter = None;
            info!("Client {} subscribed to all instruments", self.addr);
            return;
        }

        let mut filter = vec![false; instruments];
        for id in &subscription.instruments {
            if let Some(slot) = filter.get_mut(usize::from(*id)) {
                *slot = true;
            }
        }
        info!(
            "Client {} subscribed to {} instruments",
            self.addr,
            subscription.instruments.len()
        );
        self.filter = Some(filter);
    }

    /// Pull any control bytes; false once the client is gone or misbehaving
    fn poll_inbound(&mut self, instruments: usize) -> bool {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("Client {} closed", self.addr);
                    return false;
                }
                Ok(n) => self.inbox.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Client {} read error: {}", self.addr, e);
                    return false;
                }
            }
        }

        loop {
            match Subscription::decode(&self.inbox) {
                Ok(Some((subscription, used))) => {
                    self.inbox.drain(..used);
                    self.apply(subscription, instruments);
                }
                Ok(None) => return true,
                Err(e) => {
                    warn!("Client {} sent a bad control message: {}", self.addr, e);
                    return false;
                }
            }
        }
    }

    /// Write as much pending output as the socket takes
    fn flush(&mut self) -> Result<usize, io::Error> {
        let mut written = 0;
        while written < self.outbox.len() {
            match self.stream.write(&self.outbox[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.outbox.drain(..written);
        Ok(written)
    }
}

/// Synthetic exchange broadcasting encoded ticks to TCP clients
pub struct ExchangeSimulator {
    config: SimulatorConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    clients: Vec<Client>,
    generator: TickGenerator,
    stop: StopHandle,
    stats: SimulatorStats,
    heartbeat_seq: u32,
    frame: Vec<u8>,
}

impl ExchangeSimulator {
    /// Validate `config` and bind the listener (port 0 picks a free port)
    pub fn bind(config: SimulatorConfig) -> Result<Self> {
        config.validate().context("Invalid simulator configuration")?;

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .with_context(|| format!("Failed to bind simulator on port {}", config.port))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;
        let local_addr = listener.local_addr().context("Listener has no local address")?;

        let generator = TickGenerator::new(config.instruments, config.seed);

        Ok(Self {
            config,
            listener,
            local_addr,
            clients: Vec::new(),
            generator,
            stop: StopHandle::new(),
            stats: SimulatorStats::default(),
            heartbeat_seq: 0,
            frame: Vec::with_capacity(64),
        })
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Serve until the stop handle fires
    pub fn run(&mut self) -> Result<SimulatorStats> {
        let sweep_interval = Duration::from_secs(1) / self.config.tick_rate;
        info!(
            "Exchange simulator on {}: {} instruments, {} sweeps/s, fault rate {}",
            self.local_addr, self.config.instruments, self.config.tick_rate, self.config.fault_rate
        );

        let mut next_sweep = Instant::now();
        let mut next_heartbeat = Instant::now() + self.config.heartbeat_interval;
        let mut next_stats = Instant::now() + STATS_INTERVAL;

        while !self.stop.is_stopped() {
            self.accept_pending()?;
            self.poll_clients();

            let now = Instant::now();
            if now >= next_sweep {
                self.sweep();
                next_sweep += sweep_interval;
                if now.saturating_duration_since(next_sweep) > sweep_interval * MAX_SWEEP_LAG {
                    next_sweep = now + sweep_interval;
                }
            }
            if now >= next_heartbeat {
                self.heartbeat();
                next_heartbeat = now + self.config.heartbeat_interval;
            }
            if now >= next_stats {
                info!(
                    "Simulator: {} clients, {} frames, {} corrupted, {} bytes sent",
                    self.clients.len(),
                    self.stats.frames_generated,
                    self.stats.frames_corrupted,
                    self.stats.bytes_sent
                );
                next_stats = now + STATS_INTERVAL;
            }

            self.flush_clients();

            let idle = next_sweep
                .min(next_heartbeat)
                .saturating_duration_since(Instant::now());
            if !idle.is_zero() {
                std::thread::sleep(idle.min(STOP_CHECK_SLICE));
            }
        }

        info!(
            "Exchange simulator stopping ({}), {} clients connected",
            self.stop.reason().unwrap_or_default(),
            self.clients.len()
        );
        self.clients.clear();
        Ok(self.stats)
    }

    fn accept_pending(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("Rejecting {}: {}", addr, e);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    info!("Client connected: {}", addr);
                    self.stats.clients_accepted += 1;
                    self.clients.push(Client {
                        stream,
                        addr,
                        filter: None,
                        inbox: Vec::new(),
                        outbox: Vec::new(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Accept failed"),
            }
        }
    }

    fn poll_clients(&mut self) {
        let instruments = self.config.instruments;
        let before = self.clients.len();
        self.clients.retain_mut(|client| {
            let alive = client.poll_inbound(instruments);
            if !alive {
                info!("Client disconnected: {}", client.addr);
            }
            alive
        });
        self.stats.clients_dropped += (before - self.clients.len()) as u64;
    }

    fn sweep(&mut self) {
        self.stats.sweeps += 1;
        if self.clients.is_empty() {
            // Keep the paths moving without encoding for nobody
            self.generator.sweep();
            return;
        }

        for tick in self.generator.sweep() {
            self.frame.clear();
            encode_tick(&tick, &mut self.frame);
            self.stats.frames_generated += 1;
            if self
                .generator
                .maybe_corrupt(&mut self.frame, self.config.fault_rate)
            {
                self.stats.frames_corrupted += 1;
            }

            for client in self.clients.iter_mut() {
                if client.wants(tick.instrument_id) {
                    client.outbox.extend_from_slice(&self.frame);
                }
            }
        }
    }

    fn heartbeat(&mut self) {
        self.heartbeat_seq = self.heartbeat_seq.wrapping_add(1);
        self.frame.clear();
        encode_heartbeat(self.heartbeat_seq, now_ns(), 0, &mut self.frame);
        self.stats.heartbeats += 1;

        for client in self.clients.iter_mut() {
            client.outbox.extend_from_slice(&self.frame);
        }
    }

    fn flush_clients(&mut self) {
        let limit = self.config.max_client_backlog;
        let before = self.clients.len();
        let mut sent = 0u64;

        self.clients.retain_mut(|client| match client.flush() {
            Ok(n) => {
                sent += n as u64;
                if client.outbox.len() > limit {
                    warn!(
                        "Dropping slow client {}: {} bytes pending",
                        client.addr,
                        client.outbox.len()
                    );
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                info!("Client {} dropped: {}", client.addr, e);
                false
            }
        });

        self.stats.bytes_sent += sent;
        self.stats.clients_dropped += (before - self.clients.len()) as u64;
    }
}
