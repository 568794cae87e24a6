use rand::Rng;
use std::time::Duration;
use tracing::trace;

use super::RetryConfig;

/// Trait defining backoff behavior
pub trait Backoff: Send + Sync {
    /// Calculate the next backoff delay
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Reset any internal state
    fn reset(&mut self);
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn next_delay(&self, attempt: u32) -> Duration {
        (**self).next_delay(attempt)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Exponential backoff with jitter, doubling from the initial delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl ExponentialBackoff {
    const MULTIPLIER: f64 = 2.0;

    /// Backoff matching the delays and jitter of a [`RetryConfig`]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: config.initial_backoff,
            max_delay: config.max_backoff,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let exp_delay = base * Self::MULTIPLIER.powi(attempt as i32);

        // jitter applies to the capped delay
        let max_ms = self.max_delay.as_millis() as f64;
        let capped_delay = exp_delay.min(max_ms);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).clamp(0.0, max_ms);

        trace!(
            attempt = attempt,
            base_delay_ms = capped_delay,
            jitter_ms = jitter,
            final_delay_ms = final_delay,
            "Calculated backoff delay"
        );

        Duration::from_millis(final_delay as u64)
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        self.calculate_delay(attempt)
    }

    fn reset(&mut self) {}
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        trace!(attempt = attempt, delay_ms = ?self.delay.as_millis(), "Fixed backoff delay");
        self.delay
    }

    fn reset(&mut self) {}
}
