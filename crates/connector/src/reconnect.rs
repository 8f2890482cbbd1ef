//! Reconnect backoff
//!
//! Exponential backoff with symmetric jitter between sessions.

use std::time::Duration;

use rand::Rng;
use trade_producer_metadata::ReconnectConfig;

/// ±10 % randomization on every delay
pub const DEFAULT_JITTER: f64 = 0.1;

#[derive(Debug)]
pub struct ReconnectPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    /// 0 = unlimited
    max_attempts: u32,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter,
            max_attempts,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
            DEFAULT_JITTER,
            config.max_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts > 0 && self.attempt_count >= self.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);

        let scaled = (self.current_delay.as_millis() as f64 * self.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            scaled as u128
        } else {
            0
        };
        let capped = next_millis.min(self.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Back to the initial delay after a productive session
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return duration;
        }

        let base_millis = duration.as_millis() as f64;
        let range = base_millis * self.jitter;
        let offset: f64 = rand::rng().random_range(-range..=range);
        Duration::from_millis((base_millis + offset).max(1.0) as u64)
    }
}
