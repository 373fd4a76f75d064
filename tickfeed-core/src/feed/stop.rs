//! Cooperative stop signal for the ingestion loop
//!
//! ```no_run
//! use tickfeed_core::feed::StopHandle;
//!
//! let stop = StopHandle::new();
//! stop.register_signals().expect("signal handlers");
//!
//! while !stop.is_stopped() {
//!     // one loop iteration
//! }
//! ```
//!
//! The flag is only read at iteration boundaries; a drain in progress always
//! completes first. Signal handlers store into the same atomic, which is
//! async-signal-safe.

use crate::config::constants::STOP_CHECK_SLICE;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Cloneable, idempotent stop flag
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install SIGINT and SIGTERM handlers that set this flag
    pub fn register_signals(&self) -> io::Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.flag))?;
        }
        info!("SIGINT/SIGTERM handlers installed");
        Ok(())
    }

    /// Request a stop; later calls keep the first reason
    pub fn stop(&self, reason: &str) {
        // Reason is in place before any reader can observe the flag
        let mut slot = self.reason.lock();
        if !self.flag.swap(true, Ordering::AcqRel) {
            *slot = Some(reason.to_string());
            drop(slot);
            info!(reason, "Stop requested");
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Why the stop was requested; `None` for signals and while running
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Sleep for `duration` in short slices, returning early on stop
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(STOP_CHECK_SLICE));
        }
    }
}
