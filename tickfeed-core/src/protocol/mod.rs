//! Binary wire protocol
//!
//! - `frame`: layout, checksum, encoders
//! - `codec`: the resynchronizing stream decoder
//! - `subscription`: optional client → server control message

pub mod codec;
pub mod frame;
pub mod subscription;

pub use codec::{DecoderStats, FrameDecoder};
pub use frame::{encode_heartbeat, encode_tick, frame_len, tick_to_bytes, xor_checksum, FrameHeader};
pub use subscription::{Subscription, SubscriptionError};
