use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `log_level` when set. Fails if the level
/// does not parse or a subscriber is already installed.
pub fn init_logger(log_level: &str, json_logs: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .map_err(|e| anyhow!("Invalid log level {:?}: {}", log_level, e))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json_logs {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
