pub mod constants;
pub mod types;

pub use types::{FeedConfig, SimulatorConfig};
