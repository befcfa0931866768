//! Restart Backoff
//!
//! Exponential backoff with jitter between failed session attempts. A
//! clean remote close restarts without consulting the backoff; reaching
//! `OPEN` resets it.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive failures.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Consecutive failures tolerated before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl BackoffConfig {
    /// Build from configured restart settings.
    #[must_use]
    pub const fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay_initial,
            max_delay: settings.delay_max,
            multiplier: settings.delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_attempts,
        }
    }

    /// Disable jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Tracks consecutive failed attempts and the delay before the next one.
#[derive(Debug)]
pub struct RestartBackoff {
    config: BackoffConfig,
    next: Duration,
    failures: u32,
}

impl RestartBackoff {
    /// Create a backoff at its initial delay.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let next = config.initial_delay;
        Self {
            config,
            next,
            failures: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the next
    /// one, or `None` once the failure budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.failures >= self.config.max_attempts {
            return None;
        }
        self.failures += 1;

        let delay = jitter(self.next, self.config.jitter_factor);
        let grown = self.next.as_secs_f64() * self.config.multiplier;
        self.next = if grown.is_finite() && grown > 0.0 {
            Duration::from_secs_f64(grown.min(self.config.max_delay.as_secs_f64()))
        } else {
            self.config.max_delay
        };

        Some(delay)
    }

    /// Forget previous failures.
    pub const fn reset(&mut self) {
        self.next = self.config.initial_delay;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

fn jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    let base = delay.as_secs_f64();
    let spread = base * factor;
    let offset: f64 = rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64((base + offset).max(0.001))
}
