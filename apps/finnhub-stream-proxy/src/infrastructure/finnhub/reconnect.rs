//! Reconnection Policy
//!
//! Exponential backoff for the upstream link. The delay before attempt
//! `n + 1` after `n` consecutive failures is
//! `min(initial * multiplier^n, max)`, optionally randomized by a jitter
//! fraction. The link never gives up; a successful connect resets the
//! failure count.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables it.
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: settings.reconnect_jitter,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures,
    /// without jitter.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let max_millis = self.max_delay.as_millis();
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);

        #[allow(clippy::cast_precision_loss)]
        let scaled = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let millis = if scaled.is_finite() && scaled >= 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (scaled.round() as u128).min(max_millis)
            }
        } else {
            max_millis
        };

        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Tracks consecutive failures and hands out backoff delays.
///
/// # Example
///
/// ```rust
/// use finnhub_stream_proxy::infrastructure::finnhub::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// assert_eq!(policy.next_delay(), Duration::from_secs(2));
///
/// // Successful connection
/// policy.reset();
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    failures: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.apply_jitter(delay)
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.failures
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if !(self.config.jitter_factor.is_finite() && self.config.jitter_factor > 0.0) {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = adjusted_millis as u64;
        Duration::from_millis(adjusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config() -> ReconnectConfig {
        ReconnectConfig::default()
    }

    #[test]
    fn default_config_values() {
        let config = config();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test_case(0, 1 ; "first retry")]
    #[test_case(1, 2 ; "second retry")]
    #[test_case(2, 4 ; "third retry")]
    #[test_case(5, 32 ; "sixth retry")]
    #[test_case(6, 60 ; "capped")]
    #[test_case(40, 60 ; "stays capped")]
    #[test_case(u32::MAX, 60 ; "overflow saturates to cap")]
    fn delay_schedule(failures: u32, expected_secs: u64) {
        assert_eq!(config().delay_for(failures), Duration::from_secs(expected_secs));
    }

    #[test]
    fn policy_walks_schedule_and_resets() {
        let mut policy = ReconnectPolicy::new(config());

        let delays: Vec<_> = (0..8).map(|_| policy.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.attempt_count(), 8);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn custom_multiplier_and_cap() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            multiplier: 4.0,
            jitter_factor: 0.0,
        };

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(400));
        assert_eq!(config.delay_for(2), Duration::from_millis(1600));
        assert_eq!(config.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..config()
            });

            let millis = policy.next_delay().as_millis();

            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    #[test_case(-0.5 ; "negative")]
    fn unusable_jitter_leaves_delay_unchanged(jitter_factor: f64) {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            jitter_factor,
            ..config()
        });

        assert_eq!(policy.next_delay(), Duration::from_secs(1));
        assert_eq!(policy.next_delay(), Duration::from_secs(2));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delays_are_monotonic_and_bounded(
                initial_ms in 1u64..5_000,
                max_ms in 1u64..120_000,
                failures in 0u32..64,
            ) {
                let config = ReconnectConfig {
                    initial_delay: Duration::from_millis(initial_ms),
                    max_delay: Duration::from_millis(max_ms),
                    ..ReconnectConfig::default()
                };

                let current = config.delay_for(failures);
                let next = config.delay_for(failures + 1);

                prop_assert!(current <= config.max_delay);
                prop_assert!(next >= current);
            }
        }
    }
}
