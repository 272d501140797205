//! Exponential backoff for retrying a failed dequeue

use std::time::Duration;

use rand::Rng;

use crate::config::NotifierConfig;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl From<&NotifierConfig> for BackoffConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            initial_delay_ms: config.backoff_initial_delay_ms,
            max_delay_ms: config.backoff_max_delay_ms,
            ..Self::default()
        }
    }
}

/// Exponential backoff calculator with jitter.
///
/// The first delay equals `initial_delay_ms`; each following one grows by
/// `multiplier` until it reaches `max_delay_ms`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(32) as i32;
        self.attempt = self.attempt.saturating_add(1);

        let base = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay_ms as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let delay = if jitter_range > 0.0 {
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped + jitter).clamp(1.0, self.config.max_delay_ms.max(1) as f64)
        } else {
            capped.max(1.0)
        };

        Duration::from_millis(delay as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(initial: u64, max: u64, multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::new(BackoffConfig {
            initial_delay_ms: initial,
            max_delay_ms: max,
            multiplier,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_exponential_backoff_increases() {
        let mut backoff = no_jitter(100, 10_000, 2.0);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let mut backoff = no_jitter(1000, 5000, 10.0);

        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter_factor: 0.5,
        });

        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = no_jitter(100, 10_000, 2.0);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_notifier_config() {
        let notifier = NotifierConfig::default();
        let config = BackoffConfig::from(&notifier);
        assert_eq!(config.initial_delay_ms, notifier.backoff_initial_delay_ms);
        assert_eq!(config.max_delay_ms, notifier.backoff_max_delay_ms);
    }
}
