// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff with jitter for transient failures.

use std::time::Duration;

use ferry_config::model::RetryConfig;
use rand::Rng;

/// Backoff schedule shared by the session manager and the publisher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Random jitter as a fraction of the delay (0.1 = +/-10%).
    pub jitter_percent: f64,
    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor.max(1.0),
            jitter_percent: config.jitter_percent.clamp(0.0, 1.0),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Same schedule with a different attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        // 2^31 is already far past any sane max_delay.
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            jitter_percent: 0.0,
            max_attempts: 5,
        }
    }

    #[test]
    fn delay_doubles_until_cap() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy {
            jitter_percent: 0.1,
            ..no_jitter()
        };
        for _ in 0..100 {
            let d = policy.delay_for_attempt(1).as_millis();
            assert!((180..=220).contains(&d), "{d}ms out of band");
        }
    }

    #[test]
    fn config_values_are_clamped() {
        let config = RetryConfig {
            backoff_factor: 0.5,
            jitter_percent: 3.0,
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.backoff_factor, 1.0);
        assert_eq!(policy.jitter_percent, 1.0);
        assert_eq!(policy.max_attempts, 1);
    }
}
