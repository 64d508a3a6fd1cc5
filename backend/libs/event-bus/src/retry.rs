//! Retry policy for failed handler invocations and producer publishes.

use std::time::Duration;

/// Capped exponential backoff: `min(base_delay * 2^attempt, max_delay)`,
/// with `max_attempts` total invocations before dead-lettering.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before redelivering attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }

    /// Whether an attempt numbered `attempt` (0-based) was the last one.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
        // Large attempt numbers must not overflow
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(1));
        assert!(policy.is_exhausted(2));
    }
}
