//! Decoded events and cached per-instrument state
//!
//! Both types are `Copy` and small: a `Tick` lives only between the decoder
//! callback and the cache write, an `InstrumentState` is what a reader gets
//! back from a consistent snapshot.

use serde::Serialize;

/// Instrument identifier as carried on the wire
pub type InstrumentId = u16;

/// Wire message type discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Trade = 1,
    Quote = 2,
    Heartbeat = 3,
}

impl MessageType {
    /// Map a raw header value to a known type
    #[inline(always)]
    pub fn from_wire(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Trade),
            2 => Some(Self::Quote),
            3 => Some(Self::Heartbeat),
            _ => None,
        }
    }

    /// Payload bytes between header and checksum
    #[inline(always)]
    pub fn payload_size(self) -> usize {
        use crate::config::constants::{QUOTE_PAYLOAD_SIZE, TRADE_PAYLOAD_SIZE};
        match self {
            Self::Trade => TRADE_PAYLOAD_SIZE,
            Self::Quote => QUOTE_PAYLOAD_SIZE,
            Self::Heartbeat => 0,
        }
    }
}

/// Type-specific fields of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickPayload {
    Trade {
        price: f64,
        quantity: u32,
    },
    Quote {
        bid_price: f64,
        bid_quantity: u32,
        ask_price: f64,
        ask_quantity: u32,
    },
}

/// One decoded market event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// Exchange timestamp, nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    pub instrument_id: InstrumentId,
    /// Stream sequence number, strictly increasing per instrument
    pub sequence: u32,
    pub payload: TickPayload,
}

impl Tick {
    pub fn trade(
        timestamp_ns: u64,
        instrument_id: InstrumentId,
        sequence: u32,
        price: f64,
        quantity: u32,
    ) -> Self {
        Self {
            timestamp_ns,
            instrument_id,
            sequence,
            payload: TickPayload::Trade { price, quantity },
        }
    }

    pub fn quote(
        timestamp_ns: u64,
        instrument_id: InstrumentId,
        sequence: u32,
        bid: (f64, u32),
        ask: (f64, u32),
    ) -> Self {
        Self {
            timestamp_ns,
            instrument_id,
            sequence,
            payload: TickPayload::Quote {
                bid_price: bid.0,
                bid_quantity: bid.1,
                ask_price: ask.0,
                ask_quantity: ask.1,
            },
        }
    }

    /// Wire type this tick encodes as
    pub fn message_type(&self) -> MessageType {
        match self.payload {
            TickPayload::Trade { .. } => MessageType::Trade,
            TickPayload::Quote { .. } => MessageType::Quote,
        }
    }

    pub fn is_trade(&self) -> bool {
        matches!(self.payload, TickPayload::Trade { .. })
    }
}

/// Latest known state of one instrument
///
/// `Default` is the all-zero state an instrument has before its first update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct InstrumentState {
    pub best_bid: f64,
    pub bid_quantity: u32,
    pub best_ask: f64,
    pub ask_quantity: u32,
    pub last_traded_price: f64,
    pub last_traded_quantity: u32,
    /// Timestamp of the most recent write, ns since epoch
    pub last_update_ns: u64,
    /// Number of writes applied to this record
    pub update_count: u64,
}

impl InstrumentState {
    /// Mid price, if both sides of the book are populated
    pub fn mid_price(&self) -> Option<f64> {
        if self.best_bid > 0.0 && self.best_ask > 0.0 {
            Some((self.best_bid + self.best_ask) / 2.0)
        } else {
            None
        }
    }

    /// Spread in basis points of the bid, if both sides are populated
    pub fn spread_bps(&self) -> Option<f64> {
        if self.best_bid > 0.0 && self.best_ask > 0.0 {
            Some((self.best_ask - self.best_bid) / self.best_bid * 10_000.0)
        } else {
            None
        }
    }

    /// True until the first write lands
    pub fn is_empty(&self) -> bool {
        self.update_count == 0
    }
}

/// Wall-clock nanoseconds since the Unix epoch
#[inline]
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_message_type_from_wire() {
        assert_eq!(MessageType::from_wire(1), Some(MessageType::Trade));
        assert_eq!(MessageType::from_wire(2), Some(MessageType::Quote));
        assert_eq!(MessageType::from_wire(3), Some(MessageType::Heartbeat));
        assert_eq!(MessageType::from_wire(0), None);
        assert_eq!(MessageType::from_wire(0x0100), None);
    }

    #[test]
    fn test_payload_sizes() {
        assert_eq!(MessageType::Trade.payload_size(), 12);
        assert_eq!(MessageType::Quote.payload_size(), 24);
        assert_eq!(MessageType::Heartbeat.payload_size(), 0);
    }

    #[test]
    fn test_default_state_is_zero() {
        let state = InstrumentState::default();
        assert!(state.is_empty());
        assert_eq!(state.best_bid, 0.0);
        assert_eq!(state.mid_price(), None);
    }

    #[test]
    fn test_mid_and_spread() {
        let state = InstrumentState {
            best_bid: 100.0,
            best_ask: 100.1,
            update_count: 2,
            ..Default::default()
        };
        assert_relative_eq!(state.mid_price().unwrap(), 100.05, epsilon = 1e-9);
        assert_relative_eq!(state.spread_bps().unwrap(), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_tick_constructors() {
        let trade = Tick::trade(1, 2, 3, 99.5, 10);
        assert!(trade.is_trade());
        assert_eq!(trade.message_type(), MessageType::Trade);

        let quote = Tick::quote(1, 2, 4, (99.0, 5), (100.0, 6));
        assert!(!quote.is_trade());
        assert_eq!(quote.message_type(), MessageType::Quote);
    }
}
