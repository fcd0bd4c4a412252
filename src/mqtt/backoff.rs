use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential reconnect policy with a bounded attempt count.
///
/// The delay before attempt `n` is `base_delay_ms * 2^n`, clamped to `max_delay_ms`.
/// With the defaults this yields 2s, 4s, 8s, 16s and 30s for attempts 1 to 5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (1-based) reconnect attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn huge_attempt_numbers_stay_at_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn attempt_budget() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }

    #[test]
    fn custom_base_and_cap() {
        let policy = ReconnectPolicy {
            base_delay_ms: 5,
            max_delay_ms: 50,
            max_attempts: 3,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(50));
    }
}
