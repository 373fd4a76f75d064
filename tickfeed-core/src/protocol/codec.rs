//! Resynchronizing stream decoder
//!
//! Raw transport bytes go in, `Tick`s come out through a callback invoked
//! synchronously before `consume` returns. Corruption never surfaces as an
//! error: an unknown message type or a checksum mismatch drops exactly one
//! byte and parsing retries from the next offset, so a single bad byte costs
//! at most the frame it sits in.
//!
//! ```text
//!   buffer: [ consumed | unconsumed ........ | free ]
//!           0        read_pos            write_pos  capacity
//! ```
//!
//! Every pass ends with a compaction, so between calls `read_pos == 0` and
//! at most one partial frame is retained.

use crate::config::constants::{
    CHECKSUM_SIZE, HEADER_SIZE, MAX_DECODE_BUFFER, MAX_FRAME_SIZE, MIN_FRAME_SIZE,
};
use crate::core::{MessageType, Tick};
use serde::Serialize;
use tracing::warn;

use super::frame::{decode_payload, frame_len, read_u32, xor_checksum, FrameHeader};

/// Counters describing what the decoder has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Valid frames of any type
    pub frames: u64,
    pub trades: u64,
    pub quotes: u64,
    pub heartbeats: u64,
    /// Bytes skipped while resynchronizing
    pub bytes_dropped: u64,
    /// Rejections due to an unknown message type
    pub unknown_types: u64,
    /// Rejections due to a checksum mismatch
    pub checksum_failures: u64,
    /// Times the buffer was discarded because an append would overflow it
    pub overflow_resets: u64,
}

/// Stateful frame decoder
pub struct FrameDecoder {
    buffer: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Decoder with the default 1 MiB window
    pub fn new() -> Self {
        Self::with_capacity(MAX_DECODE_BUFFER)
    }

    /// Decoder with a custom window; never smaller than one maximal frame
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MAX_FRAME_SIZE);
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            stats: DecoderStats::default(),
        }
    }

    /// Append `bytes` and deliver every complete, valid frame to `on_tick`
    ///
    /// Returns the number of ticks delivered. Heartbeats advance the stream
    /// but are not delivered.
    pub fn consume<F>(&mut self, bytes: &[u8], mut on_tick: F) -> usize
    where
        F: FnMut(Tick),
    {
        if bytes.is_empty() {
            return 0;
        }

        if bytes.len() > self.buffer.len() - self.write_pos {
            warn!(
                buffered = self.write_pos - self.read_pos,
                incoming = bytes.len(),
                capacity = self.buffer.len(),
                "Decode buffer would overflow, discarding and resetting"
            );
            self.stats.overflow_resets += 1;
            self.reset();
            return 0;
        }

        self.buffer[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();

        let delivered = self.parse_loop(&mut on_tick);
        self.compact();
        delivered
    }

    fn parse_loop<F>(&mut self, on_tick: &mut F) -> usize
    where
        F: FnMut(Tick),
    {
        let mut delivered = 0;

        loop {
            let available = self.write_pos - self.read_pos;
            if available < MIN_FRAME_SIZE {
                return delivered;
            }

            let window = &self.buffer[self.read_pos..self.write_pos];
            let header = FrameHeader::parse(window);

            let Some(msg_type) = MessageType::from_wire(header.raw_type) else {
                self.stats.unknown_types += 1;
                self.drop_byte();
                continue;
            };

            let len = frame_len(msg_type);
            if available < len {
                return delivered;
            }

            let body_len = len - CHECKSUM_SIZE;
            if xor_checksum(&window[..body_len]) != read_u32(window, body_len) {
                self.stats.checksum_failures += 1;
                self.drop_byte();
                continue;
            }

            let tick = decode_payload(msg_type, &header, &window[HEADER_SIZE..body_len]);
            self.read_pos += len;
            self.stats.frames += 1;

            match msg_type {
                MessageType::Trade => self.stats.trades += 1,
                MessageType::Quote => self.stats.quotes += 1,
                MessageType::Heartbeat => self.stats.heartbeats += 1,
            }

            if let Some(tick) = tick {
                on_tick(tick);
                delivered += 1;
            }
        }
    }

    #[inline(always)]
    fn drop_byte(&mut self) {
        self.read_pos += 1;
        self.stats.bytes_dropped += 1;
    }

    /// Move unconsumed bytes to the front of the buffer
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }

        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
            return;
        }

        self.buffer.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Discard all buffered bytes. Counters are kept.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Unconsumed bytes currently held (a partial frame, at most)
    pub fn buffered_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
