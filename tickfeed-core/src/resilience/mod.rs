//! Recovery primitives for the ingestion loop
//!
//! - Capped exponential backoff between connection attempts
//! - Per-instrument sequence gap detection

pub mod backoff;
pub mod gap_detector;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use gap_detector::{GapDetector, SequenceCheck, SequenceTracker};
