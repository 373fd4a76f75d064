//! Connection State Machine - Typestate Pattern
//!
//! Compile-time checked lifecycle of the feed connection.
//!
//! # State Diagram
//!
//! ```text
//!     DISCONNECTED ──begin_connect()──→ CONNECTING ◄──────┐
//!          ▲                               │    │          │
//!          │                        succeeded() failed()───┘ (budget left)
//!          │                               │    │
//!      peer_closed()                       ▼    └──→ FAILED (terminal)
//!          └────────────────────────── CONNECTED
//!                                          │
//!                                       drain()
//!                                          ▼
//!     DISCONNECTED ◄────finish()────── DRAINING
//! ```
//!
//! A reconnect after `peer_closed()` starts a fresh attempt budget; the
//! lifetime counters in [`ConnectionData`] carry across.
//!
//! # Usage
//!
//! ```
//! use tickfeed_core::core::connection_fsm::*;
//!
//! let conn = ConnectionDisconnected::new("127.0.0.1:9876".to_string(), 3);
//! let connecting = conn.begin_connect();
//!
//! match connecting.failed() {
//!     AttemptResult::Retry(connecting) => {
//!         assert_eq!(connecting.current_attempt(), 2);
//!         let connected = connecting.succeeded();
//!         let conn = connected.peer_closed();
//!         assert_eq!(conn.data().disconnect_count, 1);
//!     }
//!     AttemptResult::Exhausted(_) => unreachable!(),
//! }
//! ```

use std::time::SystemTime;

// ============================================================================
// Connection Data (shared by all states)
// ============================================================================

/// Bookkeeping carried through every state
#[derive(Debug, Clone)]
pub struct ConnectionData {
    /// `host:port` of the feed
    pub endpoint: String,
    pub created_at: SystemTime,
    pub last_connected_at: Option<SystemTime>,
    pub last_disconnected_at: Option<SystemTime>,
    /// Successful connects over the lifetime of the run
    pub connect_count: u64,
    /// Disconnects (peer close or drain) over the lifetime of the run
    pub disconnect_count: u64,
    /// Connect attempts over the lifetime of the run
    pub total_attempts: u64,
    /// Attempt budget per connect cycle
    pub max_attempts: u32,
    /// Attempt number within the current cycle (0 when not connecting)
    pub current_attempt: u32,
}

impl ConnectionData {
    pub fn new(endpoint: String, max_attempts: u32) -> Self {
        Self {
            endpoint,
            created_at: SystemTime::now(),
            last_connected_at: None,
            last_disconnected_at: None,
            connect_count: 0,
            disconnect_count: 0,
            total_attempts: 0,
            max_attempts,
            current_attempt: 0,
        }
    }
}

/// Flat discriminant, used to publish the state through an atomic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPhase {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Draining = 3,
    Failed = 4,
}

impl From<u8> for ConnectionPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Draining,
            4 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

impl ConnectionPhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Draining => "Draining",
            Self::Failed => "Failed",
        }
    }
}

// ============================================================================
// State: Disconnected
// ============================================================================

/// No socket open.
///
/// **Valid Transitions:**
/// - `begin_connect()` → ConnectionConnecting
#[derive(Debug, Clone)]
pub struct ConnectionDisconnected {
    data: ConnectionData,
}

impl ConnectionDisconnected {
    pub fn new(endpoint: String, max_attempts: u32) -> Self {
        Self {
            data: ConnectionData::new(endpoint, max_attempts),
        }
    }

    pub fn data(&self) -> &ConnectionData {
        &self.data
    }

    /// Transition: Disconnected → Connecting (attempt 1 of a fresh budget)
    pub fn begin_connect(mut self) -> ConnectionConnecting {
        self.data.current_attempt = 1;
        self.data.total_attempts += 1;
        ConnectionConnecting { data: self.data }
    }
}

// ============================================================================
// State: Connecting
// ============================================================================

/// A connect attempt is in flight or about to be retried.
///
/// **Valid Transitions:**
/// - `succeeded()` → ConnectionConnected
/// - `failed()` → ConnectionConnecting | ConnectionFailed
/// - `abandon()` → ConnectionDisconnected (stop requested)
#[derive(Debug, Clone)]
pub struct ConnectionConnecting {
    data: ConnectionData,
}

impl ConnectionConnecting {
    pub fn data(&self) -> &ConnectionData {
        &self.data
    }

    pub fn current_attempt(&self) -> u32 {
        self.data.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.data.max_attempts
    }

    /// Transition: Connecting → Connected
    pub fn succeeded(mut self) -> ConnectionConnected {
        self.data.last_connected_at = Some(SystemTime::now());
        self.data.connect_count += 1;
        self.data.current_attempt = 0;
        ConnectionConnected { data: self.data }
    }

    /// Transition: Connecting → Connecting | Failed
    pub fn failed(mut self) -> AttemptResult {
        if self.data.current_attempt >= self.data.max_attempts {
            AttemptResult::Exhausted(ConnectionFailed { data: self.data })
        } else {
            self.data.current_attempt += 1;
            self.data.total_attempts += 1;
            AttemptResult::Retry(self)
        }
    }

    /// Transition: Connecting → Disconnected without exhausting the budget
    pub fn abandon(mut self) -> ConnectionDisconnected {
        self.data.current_attempt = 0;
        ConnectionDisconnected { data: self.data }
    }
}

// ============================================================================
// State: Connected
// ============================================================================

/// Socket open and registered for readiness.
///
/// **Valid Transitions:**
/// - `peer_closed()` → ConnectionDisconnected
/// - `drain()` → ConnectionDraining
#[derive(Debug, Clone)]
pub struct ConnectionConnected {
    data: ConnectionData,
}

impl ConnectionConnected {
    pub fn data(&self) -> &ConnectionData {
        &self.data
    }

    /// Transition: Connected → Disconnected (EOF or transport error)
    pub fn peer_closed(mut self) -> ConnectionDisconnected {
        self.data.last_disconnected_at = Some(SystemTime::now());
        self.data.disconnect_count += 1;
        ConnectionDisconnected { data: self.data }
    }

    /// Transition: Connected → Draining (local stop)
    pub fn drain(self) -> ConnectionDraining {
        ConnectionDraining { data: self.data }
    }
}

// ============================================================================
// State: Draining
// ============================================================================

/// Stop requested; resources are being released.
///
/// **Valid Transitions:**
/// - `finish()` → ConnectionDisconnected
#[derive(Debug, Clone)]
pub struct ConnectionDraining {
    data: ConnectionData,
}

impl ConnectionDraining {
    pub fn data(&self) -> &ConnectionData {
        &self.data
    }

    /// Transition: Draining → Disconnected
    pub fn finish(mut self) -> ConnectionDisconnected {
        self.data.last_disconnected_at = Some(SystemTime::now());
        self.data.disconnect_count += 1;
        ConnectionDisconnected { data: self.data }
    }
}

// ============================================================================
// State: Failed (terminal)
// ============================================================================

/// Attempt budget exhausted. No transitions out; the run is over.
#[derive(Debug, Clone)]
pub struct ConnectionFailed {
    data: ConnectionData,
}

impl ConnectionFailed {
    pub fn data(&self) -> &ConnectionData {
        &self.data
    }
}

// ============================================================================
// Result types for state transitions
// ============================================================================

/// Result of `failed()` on Connecting
pub enum AttemptResult {
    Retry(ConnectionConnecting),
    Exhausted(ConnectionFailed),
}
