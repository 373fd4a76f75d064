//! Synthetic exchange for local runs and tests
//!
//! - `generator`: GBM tick source with optional fault injection
//! - `server`: TCP fan-out of encoded frames to subscribed clients

pub mod generator;
pub mod server;

pub use generator::TickGenerator;
pub use server::{ExchangeSimulator, SimulatorStats};
