//! Wire frame layout
//!
//! ```text
//! offset 0   : u16  message_type   (1=trade, 2=quote, 3=heartbeat)
//! offset 2   : u32  sequence_number
//! offset 6   : u64  timestamp_ns
//! offset 14  : u16  instrument_id
//! offset 16  : payload (12 trade, 24 quote, 0 heartbeat)
//! offset 16+payload : u32 checksum
//! ```
//!
//! All integers and floats are little-endian. The checksum is the XOR of
//! every preceding byte of the frame, header included, each byte widened
//! to `u32`.

use crate::config::constants::{CHECKSUM_SIZE, HEADER_SIZE};
use crate::core::{InstrumentId, MessageType, Tick, TickPayload};

/// Running XOR over a byte slice
#[inline(always)]
pub fn xor_checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc ^ u32::from(b))
}

/// Total frame length for a message type
#[inline(always)]
pub fn frame_len(msg_type: MessageType) -> usize {
    HEADER_SIZE + msg_type.payload_size() + CHECKSUM_SIZE
}

#[inline(always)]
fn read_array<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

#[inline(always)]
pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(read_array(buf, at))
}

#[inline(always)]
pub(crate) fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(read_array(buf, at))
}

#[inline(always)]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(read_array(buf, at))
}

#[inline(always)]
fn read_f64(buf: &[u8], at: usize) -> f64 {
    f64::from_le_bytes(read_array(buf, at))
}

/// Fixed header fields, parsed before the type is known to be valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub raw_type: u16,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub instrument_id: InstrumentId,
}

impl FrameHeader {
    /// Parse the header at the front of `buf`; caller guarantees `HEADER_SIZE` bytes
    #[inline(always)]
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            raw_type: read_u16(buf, 0),
            sequence: read_u32(buf, 2),
            timestamp_ns: read_u64(buf, 6),
            instrument_id: read_u16(buf, 14),
        }
    }
}

/// Decode the payload that follows `header`. Heartbeats carry none.
#[inline(always)]
pub(crate) fn decode_payload(
    msg_type: MessageType,
    header: &FrameHeader,
    payload: &[u8],
) -> Option<Tick> {
    let payload = match msg_type {
        MessageType::Trade => TickPayload::Trade {
            price: read_f64(payload, 0),
            quantity: read_u32(payload, 8),
        },
        MessageType::Quote => TickPayload::Quote {
            bid_price: read_f64(payload, 0),
            bid_quantity: read_u32(payload, 8),
            ask_price: read_f64(payload, 12),
            ask_quantity: read_u32(payload, 20),
        },
        MessageType::Heartbeat => return None,
    };

    Some(Tick {
        timestamp_ns: header.timestamp_ns,
        instrument_id: header.instrument_id,
        sequence: header.sequence,
        payload,
    })
}

fn write_header(
    out: &mut Vec<u8>,
    msg_type: MessageType,
    sequence: u32,
    timestamp_ns: u64,
    instrument_id: InstrumentId,
) {
    out.extend_from_slice(&(msg_type as u16).to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&timestamp_ns.to_le_bytes());
    out.extend_from_slice(&instrument_id.to_le_bytes());
}

fn seal(out: &mut Vec<u8>, frame_start: usize) {
    let checksum = xor_checksum(&out[frame_start..]);
    out.extend_from_slice(&checksum.to_le_bytes());
}

/// Append the frame for `tick` to `out`
pub fn encode_tick(tick: &Tick, out: &mut Vec<u8>) {
    let start = out.len();
    write_header(
        out,
        tick.message_type(),
        tick.sequence,
        tick.timestamp_ns,
        tick.instrument_id,
    );

    match tick.payload {
        TickPayload::Trade { price, quantity } => {
            out.extend_from_slice(&price.to_le_bytes());
            out.extend_from_slice(&quantity.to_le_bytes());
        }
        TickPayload::Quote {
            bid_price,
            bid_quantity,
            ask_price,
            ask_quantity,
        } => {
            out.extend_from_slice(&bid_price.to_le_bytes());
            out.extend_from_slice(&bid_quantity.to_le_bytes());
            out.extend_from_slice(&ask_price.to_le_bytes());
            out.extend_from_slice(&ask_quantity.to_le_bytes());
        }
    }

    seal(out, start);
}

/// Append a heartbeat frame to `out`
pub fn encode_heartbeat(
    sequence: u32,
    timestamp_ns: u64,
    instrument_id: InstrumentId,
    out: &mut Vec<u8>,
) {
    let start = out.len();
    write_header(out, MessageType::Heartbeat, sequence, timestamp_ns, instrument_id);
    seal(out, start);
}

/// Encode a single tick into a fresh buffer
pub fn tick_to_bytes(tick: &Tick) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame_len(tick.message_type()));
    encode_tick(tick, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_checksum() {
        assert_eq!(xor_checksum(&[]), 0);
        assert_eq!(xor_checksum(&[0xAA]), 0xAA);
        assert_eq!(xor_checksum(&[0xAA, 0xAA]), 0);
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x04]), 0x07);
    }

    #[test]
    fn test_trade_layout() {
        let tick = Tick::trade(0x0102_0304_0506_0708, 7, 42, 101.25, 50);
        let bytes = tick_to_bytes(&tick);

        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..2], &[1, 0]);
        assert_eq!(read_u32(&bytes, 2), 42);
        assert_eq!(read_u64(&bytes, 6), 0x0102_0304_0506_0708);
        assert_eq!(read_u16(&bytes, 14), 7);
        assert_eq!(read_f64(&bytes, 16), 101.25);
        assert_eq!(read_u32(&bytes, 24), 50);
        assert_eq!(read_u32(&bytes, 28), xor_checksum(&bytes[..28]));
    }

    #[test]
    fn test_quote_layout() {
        let tick = Tick::quote(1, 3, 9, (99.5, 100), (100.5, 200));
        let bytes = tick_to_bytes(&tick);

        assert_eq!(bytes.len(), 44);
        assert_eq!(read_u16(&bytes, 0), MessageType::Quote as u16);
        assert_eq!(read_f64(&bytes, 16), 99.5);
        assert_eq!(read_u32(&bytes, 24), 100);
        assert_eq!(read_f64(&bytes, 28), 100.5);
        assert_eq!(read_u32(&bytes, 36), 200);
        assert_eq!(read_u32(&bytes, 40), xor_checksum(&bytes[..40]));
    }

    #[test]
    fn test_heartbeat_layout() {
        let mut bytes = Vec::new();
        encode_heartbeat(5, 10, 0, &mut bytes);
        assert_eq!(bytes.len(), 20);
        assert_eq!(read_u16(&bytes, 0), 3);
        assert_eq!(read_u32(&bytes, 16), xor_checksum(&bytes[..16]));
    }

    #[test]
    fn test_header_parse() {
        let tick = Tick::trade(77, 12, 3, 1.0, 1);
        let header = FrameHeader::parse(&tick_to_bytes(&tick));
        assert_eq!(
            header,
            FrameHeader {
                raw_type: 1,
                sequence: 3,
                timestamp_ns: 77,
                instrument_id: 12,
            }
        );
    }

    #[test]
    fn test_encode_appends() {
        let mut out = vec![0xEE];
        encode_tick(&Tick::trade(1, 1, 1, 1.0, 1), &mut out);
        assert_eq!(out.len(), 33);
        assert_eq!(out[0], 0xEE);
        // Checksum covers only the new frame
        assert_eq!(read_u32(&out, 29), xor_checksum(&out[1..29]));
    }
}
