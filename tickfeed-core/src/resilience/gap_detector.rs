//! Sequence gap detection for per-instrument tick streams
//!
//! Producers number each instrument's stream with strictly increasing `u32`
//! sequence numbers. A jump means frames were lost, usually to
//! resynchronization after corruption.
//!
//! Comparison is wraparound-aware: the forward distance is
//! `current.wrapping_sub(last)`, and anything further than half the `u32`
//! range is read as a step backwards rather than an enormous gap.

use crate::core::InstrumentId;

const HALF_RANGE: u32 = 1 << 31;

/// Outcome of checking one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First message since creation or reset
    First,
    /// Exactly one ahead of the last message
    InOrder,
    /// Same as the last message
    Duplicate,
    /// Ahead by more than one; carries the number of missing messages
    Gap(u32),
    /// Behind the last message
    Regressed,
}

/// Gap detector for a single sequence stream
///
/// ```
/// use tickfeed_core::resilience::{GapDetector, SequenceCheck};
///
/// let mut detector = GapDetector::new();
/// assert_eq!(detector.check(1), SequenceCheck::First);
/// assert_eq!(detector.check(2), SequenceCheck::InOrder);
/// assert_eq!(detector.check(5), SequenceCheck::Gap(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    last_sequence: u32,
    ready: bool,
}

impl GapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a sequence number and advance
    ///
    /// A regressed sequence is reported but not adopted, so a single stale
    /// frame does not turn the next in-order frame into a gap.
    #[inline(always)]
    pub fn check(&mut self, current: u32) -> SequenceCheck {
        if !self.ready {
            self.last_sequence = current;
            self.ready = true;
            return SequenceCheck::First;
        }

        let distance = current.wrapping_sub(self.last_sequence);
        match distance {
            0 => SequenceCheck::Duplicate,
            1 => {
                self.last_sequence = current;
                SequenceCheck::InOrder
            }
            d if d < HALF_RANGE => {
                self.last_sequence = current;
                SequenceCheck::Gap(d - 1)
            }
            _ => SequenceCheck::Regressed,
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[inline]
    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    /// Forget the stream; the next message is treated as the first
    #[inline]
    pub fn reset(&mut self) {
        self.last_sequence = 0;
        self.ready = false;
    }
}

/// One `GapDetector` per instrument
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    detectors: Box<[GapDetector]>,
    gaps: u64,
    missing: u64,
    regressions: u64,
}

impl SequenceTracker {
    pub fn new(instruments: usize) -> Self {
        Self {
            detectors: vec![GapDetector::new(); instruments].into_boxed_slice(),
            gaps: 0,
            missing: 0,
            regressions: 0,
        }
    }

    /// Check `sequence` on `id`'s stream; `None` when `id` is not tracked
    #[inline(always)]
    pub fn observe(&mut self, id: InstrumentId, sequence: u32) -> Option<SequenceCheck> {
        let detector = self.detectors.get_mut(usize::from(id))?;
        let outcome = detector.check(sequence);

        match outcome {
            SequenceCheck::Gap(missing) => {
                self.gaps += 1;
                self.missing += u64::from(missing);
            }
            SequenceCheck::Regressed => self.regressions += 1,
            _ => {}
        }
        Some(outcome)
    }

    /// Number of gap events seen
    pub fn gaps(&self) -> u64 {
        self.gaps
    }

    /// Total messages missing across all gaps
    pub fn missing(&self) -> u64 {
        self.missing
    }

    pub fn regressions(&self) -> u64 {
        self.regressions
    }

    /// Reset every stream; counters are kept
    ///
    /// Called on reconnect, where the server may restart numbering.
    pub fn reset(&mut self) {
        self.detectors.iter_mut().for_each(GapDetector::reset);
    }
}
