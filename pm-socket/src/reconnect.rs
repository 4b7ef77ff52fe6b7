//! Reconnection controller.
//!
//! Pure delay computation for the retry schedule. The state machine owns the
//! attempt counter and the timer; this type only answers "how long until
//! attempt N".

use std::time::Duration;

use serde::{Deserialize, Serialize};

use pm_core::constants;

/// Configuration for reconnection behavior. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive attempts before entering `Failed`.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the computed delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::RECONNECT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(constants::RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(constants::RECONNECT_MAX_DELAY_MS),
            backoff_factor: constants::RECONNECT_BACKOFF_FACTOR,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    ///
    /// Computed as `min(base_delay * backoff_factor^attempt, max_delay)`.
    /// With the default policy this yields 1000ms, 1500ms, 2250ms, 3375ms,
    /// 5062ms, 7593ms, then 10000ms capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let delay = (base * self.backoff_factor.powi(attempt as i32)).min(max);
        Duration::from_secs_f64(delay)
    }

    /// Whether another attempt is allowed after `failures` consecutive
    /// failures.
    pub fn attempts_remain(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay_sequence() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(3375));
        assert_eq!(policy.delay_for(4), Duration::from_micros(5_062_500));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(100), Duration::from_millis(10_000));
    }

    #[test]
    fn test_attempts_remain() {
        let policy = ReconnectPolicy::default();
        assert!(policy.attempts_remain(0));
        assert!(policy.attempts_remain(9));
        assert!(!policy.attempts_remain(10));
        assert!(!policy.attempts_remain(11));
    }

    #[test]
    fn test_custom_policy() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
        assert!(!policy.attempts_remain(3));
    }
}
