//! Capped exponential backoff between connection attempts
//!
//! Only computes delays. The attempt budget belongs to the connection state
//! machine (`ConnectionConnecting::failed`), so there is a single place that
//! decides when to give up.

use crate::config::constants::{BACKOFF_INITIAL_DELAY, BACKOFF_MAX_DELAY};
use rand::Rng;
use std::time::Duration;

/// Configuration for exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor applied after each failure (typically 2.0)
    pub multiplier: f64,
    /// Randomization around each delay, 0.0 to 1.0 (0 = deterministic)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: BACKOFF_INITIAL_DELAY,
            max_delay: BACKOFF_MAX_DELAY,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Short delays for tests and local loopback
    pub fn aggressive() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Default schedule with 10% jitter, for fleets reconnecting to one server
    pub fn jittered() -> Self {
        Self {
            jitter_factor: 0.1,
            ..Default::default()
        }
    }

    /// Reject schedules that shrink, go negative or are not finite
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            anyhow::bail!("backoff multiplier must be finite and >= 1.0, got {}", self.multiplier);
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            anyhow::bail!(
                "backoff jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            );
        }

        if self.initial_delay > self.max_delay {
            anyhow::bail!(
                "backoff initial_delay ({:?}) exceeds max_delay ({:?})",
                self.initial_delay,
                self.max_delay
            );
        }

        Ok(())
    }
}

/// `base * factor`, capped at `max`; out-of-range products saturate to `max`
fn scaled(base: Duration, factor: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .map_or(max, |d| d.min(max))
}

/// Exponential backoff state
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_attempt: usize,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            current_attempt: 0,
            config,
        }
    }

    /// Next delay; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.calculate_delay_with_jitter();

        self.current_attempt += 1;
        self.current_delay = scaled(
            self.current_delay,
            self.config.multiplier,
            self.config.max_delay,
        );

        delay
    }

    fn calculate_delay_with_jitter(&self) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return self.current_delay;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen::<f64>() * self.config.jitter_factor;
        let jitter_multiplier = 1.0 + (jitter - self.config.jitter_factor / 2.0);

        scaled(self.current_delay, jitter_multiplier, self.config.max_delay)
    }

    /// Back to `initial_delay`; called after a successful connect
    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    /// Delays handed out since the last reset
    pub fn attempt_number(&self) -> usize {
        self.current_attempt
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
