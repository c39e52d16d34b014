//! Launch Backoff
//!
//! Exponential backoff with jitter for retrying browser session launches.
//! A launch is attempted up to `max_attempts` times; the policy hands out
//! the pause before each retry.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::BrowserSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Pause before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any pause.
    pub max_delay: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the pause (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Total attempts including the first one (at least 1).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 3,
        }
    }
}

impl From<&BrowserSettings> for BackoffConfig {
    fn from(settings: &BrowserSettings) -> Self {
        Self {
            initial_delay: settings.launch_delay_initial,
            max_delay: settings.launch_delay_max,
            max_attempts: settings.launch_max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Stateful backoff for one launch sequence.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ticker_watch::application::services::backoff::{BackoffConfig, BackoffPolicy};
///
/// let mut policy = BackoffPolicy::new(BackoffConfig {
///     jitter_factor: 0.0,
///     max_attempts: 2,
///     ..BackoffConfig::default()
/// });
///
/// // One retry is allowed after the first attempt fails
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
/// assert_eq!(policy.next_delay(), None);
/// ```
#[derive(Debug)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current_delay: Duration,
    retries: u32,
}

impl BackoffPolicy {
    /// Start a fresh sequence.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            current_delay,
            retries: 0,
        }
    }

    /// Pause before the next retry, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries + 1 >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let delay = self.jittered(self.current_delay);
        self.current_delay = self
            .current_delay
            .mul_f64(self.config.multiplier.max(1.0))
            .min(self.config.max_delay);

        Some(delay)
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let base = delay.as_secs_f64();
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.001))
    }
}
