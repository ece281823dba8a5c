//! The retry/backoff policy.
//!
//! Expressed as data rather than nested control flow so the transfer loop
//! stays linear and the policy tests without sleeping: given the number of
//! failures so far, the policy answers "wait this long and try again" or
//! "give up".

use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Back off for this long, then attempt again.
    RetryAfter(Duration),
    /// Attempts are exhausted; the failure is permanent.
    GiveUp,
}

/// Bounded exponential backoff: `initial * 2^(n-1)`, capped at `max_backoff`,
/// for at most `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Decide the next step after `failed_attempts` attempts have failed.
    pub fn after_failure(&self, failed_attempts: u32) -> RetryStep {
        if failed_attempts >= self.max_attempts {
            return RetryStep::GiveUp;
        }
        let exponent = failed_attempts.saturating_sub(1).min(31);
        let backoff = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        RetryStep::RetryAfter(backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(600),
        };
        assert_eq!(
            policy.after_failure(1),
            RetryStep::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.after_failure(2),
            RetryStep::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            policy.after_failure(3),
            RetryStep::RetryAfter(Duration::from_millis(400))
        );
        // Capped from here on.
        assert_eq!(
            policy.after_failure(4),
            RetryStep::RetryAfter(Duration::from_millis(600))
        );
        assert_eq!(
            policy.after_failure(9),
            RetryStep::RetryAfter(Duration::from_millis(600))
        );
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(matches!(policy.after_failure(1), RetryStep::RetryAfter(_)));
        assert!(matches!(policy.after_failure(2), RetryStep::RetryAfter(_)));
        assert_eq!(policy.after_failure(3), RetryStep::GiveUp);
        assert_eq!(policy.after_failure(4), RetryStep::GiveUp);
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: u32::MAX,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(
            policy.after_failure(64),
            RetryStep::RetryAfter(Duration::from_secs(30))
        );
    }
}
