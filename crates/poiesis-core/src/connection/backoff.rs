//! Reconnect backoff policy.
//!
//! Fixed-interval by default; exponential (with optional jitter) when the
//! config asks for it. The attempt cap is enforced by the manager, this type
//! only answers "how long until the next attempt".

use crate::config::{BackoffStrategy, ClientConfig};
use rand::Rng;
use std::time::Duration;

/// Delay calculator for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum number of failed attempts before giving up.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
}

impl ReconnectPolicy {
    /// Build the policy from the reconnect fields of `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: config.reconnect_interval(),
            max_attempts: config.max_reconnect_attempts,
            strategy: config.backoff.clone(),
        }
    }

    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    /// Delay before the attempt that follows `failed_attempts` failures.
    ///
    /// `failed_attempts` is 0 when scheduling the first retry after an
    /// unsolicited connection loss.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match &self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential {
                max_delay_ms,
                jitter,
            } => {
                let max_secs = Duration::from_millis(*max_delay_ms).as_secs_f64();
                let exponent = failed_attempts.saturating_sub(1).min(32) as i32;
                let delay_secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
                let capped_secs = delay_secs.min(max_secs);

                let final_secs = if *jitter {
                    // Scale by 0.5..1.5 so the mean stays on the curve without
                    // ever collapsing to a near-zero delay.
                    let factor = rand::rng().random_range(0.5..1.5);
                    (capped_secs * factor).min(max_secs)
                } else {
                    capped_secs
                };

                Duration::from_secs_f64(final_secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(base_ms: u64, max_ms: u64, jitter: bool) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_attempts: 5,
            strategy: BackoffStrategy::Exponential {
                max_delay_ms: max_ms,
                jitter,
            },
        }
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let config = ClientConfig::new("localhost:1").with_reconnect_interval(Duration::from_millis(3000));
        let policy = ReconnectPolicy::from_config(&config);

        assert_eq!(policy.delay_for(0), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1), Duration::from_secs(3));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_delay_doubles() {
        let policy = exponential(1000, 60_000, false);

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = exponential(10_000, 30_000, false);
        // 10s * 2^3 = 80s, capped at 30s
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_jitter_bounds() {
        let policy = exponential(2000, 60_000, true);
        for _ in 0..20 {
            let delay = policy.delay_for(1);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[test]
    fn test_allows_retry_below_cap() {
        let config = ClientConfig::new("localhost:1").with_max_reconnect_attempts(2);
        let policy = ReconnectPolicy::from_config(&config);

        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let config = ClientConfig::new("localhost:1").with_max_reconnect_attempts(0);
        let policy = ReconnectPolicy::from_config(&config);
        assert!(!policy.allows_retry(0));
    }
}
