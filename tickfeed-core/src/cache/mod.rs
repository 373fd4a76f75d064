//! Lock-free per-instrument state cache (seqlock)
//!
//! One record per instrument, allocated once. A single writer publishes
//! updates; any number of readers take consistent snapshots without locks
//! and without ever blocking the writer.
//!
//! ## Protocol
//!
//! Each record carries a guard counter, odd while a write is in flight.
//!
//! ```text
//! writer:  guard = s+1 (odd) ─ fence(Release) ─ store fields ─ guard = s+2 (Release)
//! reader:  s1 = guard (Acquire), odd? retry ─ load fields ─ fence(Acquire) ─ s2 = guard
//!          accept iff s1 == s2
//! ```
//!
//! Fields are individual atomics accessed with `Relaxed` ordering, so a copy
//! that races a write is merely stale or mixed (and then discarded), never a
//! data race.
//!
//! ## Starvation
//!
//! The read loop is unbounded in theory: a writer that keeps a record busy
//! forever starves its readers. Writes are a handful of stores, so under any
//! realistic feed rate a read completes within a few retries. Readers back
//! off with `crossbeam_utils::Backoff` (spin, then yield) between retries.

use crate::core::{CacheError, InstrumentId, InstrumentState};
use crossbeam_utils::{Backoff, CachePadded};
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// One instrument's record. `f64` fields are stored as their bit patterns.
#[derive(Default)]
struct Slot {
    guard: AtomicU64,
    best_bid: AtomicU64,
    bid_quantity: AtomicU32,
    best_ask: AtomicU64,
    ask_quantity: AtomicU32,
    last_traded_price: AtomicU64,
    last_traded_quantity: AtomicU32,
    last_update_ns: AtomicU64,
    update_count: AtomicU64,
}

impl Slot {
    #[inline(always)]
    fn load_fields(&self) -> InstrumentState {
        InstrumentState {
            best_bid: f64::from_bits(self.best_bid.load(Ordering::Relaxed)),
            bid_quantity: self.bid_quantity.load(Ordering::Relaxed),
            best_ask: f64::from_bits(self.best_ask.load(Ordering::Relaxed)),
            ask_quantity: self.ask_quantity.load(Ordering::Relaxed),
            last_traded_price: f64::from_bits(self.last_traded_price.load(Ordering::Relaxed)),
            last_traded_quantity: self.last_traded_quantity.load(Ordering::Relaxed),
            last_update_ns: self.last_update_ns.load(Ordering::Relaxed),
            update_count: self.update_count.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-capacity table of instrument records
pub struct SymbolCache {
    slots: Box<[CachePadded<Slot>]>,
    writer_claimed: AtomicBool,
}

impl SymbolCache {
    /// Allocate `instruments` zeroed records
    pub fn new(instruments: usize) -> Arc<Self> {
        let slots = (0..instruments)
            .map(|_| CachePadded::new(Slot::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Arc::new(Self {
            slots,
            writer_claimed: AtomicBool::new(false),
        })
    }

    /// Claim the single writer role
    ///
    /// Fails with `WriterClaimed` while another `CacheWriter` is alive.
    pub fn writer(self: &Arc<Self>) -> Result<CacheWriter, CacheError> {
        self.writer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CacheError::WriterClaimed)?;

        Ok(CacheWriter {
            cache: Arc::clone(self),
        })
    }

    /// Number of records; fixed at construction
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn slot(&self, id: usize) -> Result<&Slot, CacheError> {
        self.slots
            .get(id)
            .map(|padded| &**padded)
            .ok_or(CacheError::InstrumentOutOfRange {
                id,
                size: self.slots.len(),
            })
    }

    /// Consistent copy of one record
    ///
    /// Never blocks the writer; retries while a write is in flight or when
    /// the copy raced one.
    pub fn read_snapshot(&self, id: usize) -> Result<InstrumentState, CacheError> {
        let slot = self.slot(id)?;
        let backoff = Backoff::new();

        loop {
            let before = slot.guard.load(Ordering::Acquire);
            if before & 1 == 1 {
                backoff.snooze();
                continue;
            }

            let state = slot.load_fields();

            fence(Ordering::Acquire);
            let after = slot.guard.load(Ordering::Relaxed);

            if before == after {
                return Ok(state);
            }
            backoff.snooze();
        }
    }

    /// Consistent snapshots of every record, in id order
    pub fn snapshots(&self) -> impl Iterator<Item = (usize, InstrumentState)> + '_ {
        (0..self.size()).filter_map(move |id| self.read_snapshot(id).ok().map(|s| (id, s)))
    }

    /// Sum of update counters over all records
    pub fn total_updates(&self) -> u64 {
        self.snapshots().map(|(_, s)| s.update_count).sum()
    }
}

impl fmt::Debug for SymbolCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolCache")
            .field("size", &self.size())
            .field("writer_claimed", &self.writer_claimed.load(Ordering::Relaxed))
            .finish()
    }
}

/// The unique write handle of a `SymbolCache`
///
/// Methods take `&mut self`, so the writer can never race itself. Not
/// `Clone`; dropping it releases the claim.
pub struct CacheWriter {
    cache: Arc<SymbolCache>,
}

impl CacheWriter {
    /// Run `mutate` on a record inside a guarded write
    #[inline(always)]
    fn write<F>(&mut self, id: InstrumentId, timestamp_ns: u64, mutate: F) -> Result<(), CacheError>
    where
        F: FnOnce(&Slot),
    {
        let slot = self.cache.slot(usize::from(id))?;

        // Only this writer ever stores to the guard
        let seq = slot.guard.load(Ordering::Relaxed);
        slot.guard.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        mutate(slot);
        slot.last_update_ns.store(timestamp_ns, Ordering::Relaxed);
        let count = slot.update_count.load(Ordering::Relaxed);
        slot.update_count.store(count + 1, Ordering::Relaxed);

        slot.guard.store(seq.wrapping_add(2), Ordering::Release);
        Ok(())
    }

    /// Record a trade: last traded price and quantity
    pub fn write_trade(
        &mut self,
        id: InstrumentId,
        price: f64,
        quantity: u32,
        timestamp_ns: u64,
    ) -> Result<(), CacheError> {
        self.write(id, timestamp_ns, |slot| {
            slot.last_traded_price.store(price.to_bits(), Ordering::Relaxed);
            slot.last_traded_quantity.store(quantity, Ordering::Relaxed);
        })
    }

    /// Record the best bid
    pub fn write_bid(
        &mut self,
        id: InstrumentId,
        price: f64,
        quantity: u32,
        timestamp_ns: u64,
    ) -> Result<(), CacheError> {
        self.write(id, timestamp_ns, |slot| {
            slot.best_bid.store(price.to_bits(), Ordering::Relaxed);
            slot.bid_quantity.store(quantity, Ordering::Relaxed);
        })
    }

    /// Record the best ask
    pub fn write_ask(
        &mut self,
        id: InstrumentId,
        price: f64,
        quantity: u32,
        timestamp_ns: u64,
    ) -> Result<(), CacheError> {
        self.write(id, timestamp_ns, |slot| {
            slot.best_ask.store(price.to_bits(), Ordering::Relaxed);
            slot.ask_quantity.store(quantity, Ordering::Relaxed);
        })
    }

    /// The cache this writer publishes into
    pub fn cache(&self) -> &Arc<SymbolCache> {
        &self.cache
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        self.cache.writer_claimed.store(false, Ordering::Release);
    }
}

impl fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWriter")
            .field("size", &self.cache.size())
            .finish()
    }
}
