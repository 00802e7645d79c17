//! Exponential backoff shared by the retry executor and the WebSocket session.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff parameters: `initial * factor^attempt`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Fraction of the delay (0.0..=1.0) replaced by a random component.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max delay must be >= initial delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Delay before the retry following `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(*self, attempt)
    }
}

/// Compute `min(initial * factor^attempt, max)`, blended with jitter.
///
/// With `jitter == 0.0` the result is deterministic. The result always lies in
/// `0..=max_delay`, whatever the parameters.
pub fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = config.factor.powf(f64::from(attempt));
    let base = initial * exponent;
    let base = if base.is_nan() { 0.0 } else { base.clamp(0.0, max) };

    if config.jitter == 0.0 || base == 0.0 {
        return to_delay(base, config.max_delay);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    to_delay(blended, config.max_delay)
}

fn to_delay(secs: f64, max: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).map_or(max, |delay| delay.min(max))
}
