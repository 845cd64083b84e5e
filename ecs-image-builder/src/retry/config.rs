//! Retry policy values: attempt budgets, delays, backoff and jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval between polls of the control plane.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Attempt budget for ordinary operations.
pub const DEFAULT_RETRY_TIMES: usize = 12;
/// Attempt budget for status transitions that take a few minutes.
pub const SHORT_RETRY_TIMES: usize = 36;
/// Attempt budget for long-running waits such as image creation.
pub const LONG_RETRY_TIMES: usize = 1_000;
/// Attempt budget for local consistency reads.
pub const PRIVATE_IP_RETRY_TIMES: usize = 2;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    #[default]
    Constant,
}

/// Jitter strategy to spread out concurrent pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for one poll-retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of requests issued (including the first).
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
    /// Optional overall deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_TIMES,
            base_delay_ms: DEFAULT_POLL_INTERVAL_MS,
            max_delay_ms: 60_000,
            backoff_strategy: BackoffStrategy::Constant,
            jitter_strategy: JitterStrategy::None,
            timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with the default profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Profile for status transitions that take a few minutes.
    #[must_use]
    pub fn short() -> Self {
        Self::default().with_max_attempts(SHORT_RETRY_TIMES)
    }

    /// Profile for long-running waits.
    #[must_use]
    pub fn long() -> Self {
        Self::default().with_max_attempts(LONG_RETRY_TIMES)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Sets an overall deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the overall deadline, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Calculates the delay to sleep after the given zero-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exponent)).min(max)
            }
            BackoffStrategy::Linear => {
                let factor = u64::try_from(attempt).unwrap_or(u64::MAX).saturating_add(1);
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// The named retry profiles steps choose from.
///
/// Steps never hard-code attempt counts; they pick the profile matching the
/// expected latency of the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryProfiles {
    /// Ordinary submissions and transitions.
    #[serde(default)]
    pub default: RetryConfig,
    /// Transitions that take a few minutes.
    #[serde(default = "RetryConfig::short")]
    pub short: RetryConfig,
    /// Long-running waits.
    #[serde(default = "RetryConfig::long")]
    pub long: RetryConfig,
    /// Local consistency reads of described attributes.
    #[serde(default = "private_ip_profile")]
    pub private_ip: RetryConfig,
}

fn private_ip_profile() -> RetryConfig {
    RetryConfig::default().with_max_attempts(PRIVATE_IP_RETRY_TIMES)
}

impl Default for RetryProfiles {
    fn default() -> Self {
        Self {
            default: RetryConfig::default(),
            short: RetryConfig::short(),
            long: RetryConfig::long(),
            private_ip: private_ip_profile(),
        }
    }
}

impl RetryProfiles {
    /// Uses the same poll interval for every profile.
    #[must_use]
    pub fn with_interval_ms(mut self, interval: u64) -> Self {
        for profile in [
            &mut self.default,
            &mut self.short,
            &mut self.long,
            &mut self.private_ip,
        ] {
            profile.base_delay_ms = interval;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_strategy_default() {
        assert_eq!(BackoffStrategy::default(), BackoffStrategy::Constant);
    }

    #[test]
    fn test_retry_config_default_profile() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 12);
        assert_eq!(config.base_delay_ms, 5_000);
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_named_profiles() {
        assert_eq!(RetryConfig::short().max_attempts, SHORT_RETRY_TIMES);
        assert_eq!(RetryConfig::long().max_attempts, LONG_RETRY_TIMES);
        assert_eq!(RetryProfiles::default().private_ip.max_attempts, 2);
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay_ms(500)
            .with_max_delay_ms(10_000)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None)
            .with_timeout(Duration::from_secs(30));

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_delay_exponential() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Exponential);

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_linear() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear);

        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(300));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1_000)
            .with_max_delay_ms(5_000)
            .with_backoff(BackoffStrategy::Exponential);

        assert_eq!(config.delay_for(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_delay_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::Full);

        for _ in 0..20 {
            assert!(config.delay_for(0) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_profiles_with_interval() {
        let profiles = RetryProfiles::default().with_interval_ms(10);
        assert_eq!(profiles.default.base_delay_ms, 10);
        assert_eq!(profiles.long.base_delay_ms, 10);
        assert_eq!(profiles.long.max_attempts, LONG_RETRY_TIMES);
    }
}
