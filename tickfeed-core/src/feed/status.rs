//! Connection phase published for other threads

use crate::core::ConnectionPhase;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Shared view of the feed handler's connection lifecycle
#[derive(Debug, Default)]
pub struct FeedStatus {
    phase: AtomicU8,
    attempt: AtomicU32,
    connected_at_ns: AtomicU64,
}

impl FeedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase.load(Ordering::Acquire).into()
    }

    pub(crate) fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Attempt number within the current connect cycle (0 when not connecting)
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Relaxed)
    }

    pub(crate) fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Relaxed);
    }

    /// Wall-clock time of the last successful connect, 0 if never
    pub fn connected_at_ns(&self) -> u64 {
        self.connected_at_ns.load(Ordering::Relaxed)
    }

    pub(crate) fn set_connected_at(&self, ns: u64) {
        self.connected_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_roundtrip() {
        let status = FeedStatus::new();
        assert_eq!(status.phase(), ConnectionPhase::Disconnected);

        status.set_phase(ConnectionPhase::Connected);
        assert!(status.is_connected());

        status.set_phase(ConnectionPhase::Failed);
        assert_eq!(status.phase(), ConnectionPhase::Failed);
    }
}
