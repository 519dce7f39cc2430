//! Placement retry policy.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::VenueError;

/// Decision after a failed placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Register a cooldown (venue hint or default) and try again once it expires.
    Cooldown(Option<Duration>),
    /// Sleep, then try again.
    Backoff(Duration),
    /// Surface the error.
    GiveUp,
}

/// Bounded retries with exponential backoff for transient errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at the maximum delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let multiplier = 2u32.saturating_pow(exponent);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// What to do after `attempt` (1-based) failed with `error`.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &VenueError) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match error {
            VenueError::RateLimited { retry_after, .. } => RetryDecision::Cooldown(*retry_after),
            e if e.is_transient() => RetryDecision::Backoff(self.delay_for(attempt)),
            _ => RetryDecision::GiveUp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(15));
        assert_eq!(policy.delay_for(40), Duration::from_secs(15));
    }

    #[test]
    fn test_decide_by_error_kind() {
        let policy = RetryPolicy::default();
        let throttled = VenueError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(1)),
        };

        assert_eq!(
            policy.decide(1, &throttled),
            RetryDecision::Cooldown(Some(Duration::from_secs(1)))
        );
        assert_eq!(
            policy.decide(1, &VenueError::Network("reset".into())),
            RetryDecision::Backoff(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(1, &VenueError::ReduceOnly("invalid reduce only mode".into())),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(1, &VenueError::Rejected("insufficient margin".into())),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_decide_stops_at_max_attempts() {
        let policy = RetryPolicy::default();
        let err = VenueError::Timeout("slow".into());
        assert!(matches!(policy.decide(2, &err), RetryDecision::Backoff(_)));
        assert_eq!(policy.decide(3, &err), RetryDecision::GiveUp);
    }
}
