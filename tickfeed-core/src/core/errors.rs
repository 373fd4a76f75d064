//! Error types for the ingestion pipeline
//!
//! Decode-level corruption is never an error: the decoder resynchronizes and
//! counts it. What surfaces here is what a caller can act on.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the symbol cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("instrument {id} out of range (cache holds {size})")]
    InstrumentOutOfRange { id: usize, size: usize },

    #[error("cache already has a live writer")]
    WriterClaimed,
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("socket option {option} failed: {source}")]
    SocketOption {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("transport is not connected")]
    NotConnected,

    #[error("send timed out after {timeout:?} with {written} of {total} bytes written")]
    SendTimeout {
        timeout: Duration,
        written: usize,
        total: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that end an ingestion run
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connection to {endpoint} failed after {attempts} attempts")]
    RetriesExhausted { endpoint: String, attempts: u32 },

    #[error("readiness notification failed: {0}")]
    Readiness(#[source] io::Error),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("feed handler already shut down")]
    ShutDown,
}
