//! Ingestion orchestration
//!
//! - `FeedHandler`: connect, drain, decode, publish, reconnect
//! - `StopHandle`: cooperative stop, optionally wired to SIGINT/SIGTERM
//! - `FeedStatus`: connection phase readable from other threads

pub mod handler;
pub mod status;
pub mod stop;

pub use handler::{FeedHandler, FeedReport};
pub use status::FeedStatus;
pub use stop::StopHandle;
