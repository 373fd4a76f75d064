//! Core types shared by every stage of the pipeline
//!
//! - `Tick`: one decoded trade or quote
//! - `InstrumentState`: the cached per-instrument record readers see
//! - Connection lifecycle state machine
//! - Error types

pub mod connection_fsm;
pub mod errors;
pub mod types;

pub use connection_fsm::ConnectionPhase;
pub use errors::{CacheError, FeedError, TransportError};
pub use types::{now_ns, InstrumentId, InstrumentState, MessageType, Tick, TickPayload};
