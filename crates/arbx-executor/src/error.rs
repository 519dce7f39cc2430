//! Executor error types.
//!
//! [`VenueError`] is the normalized taxonomy every venue adapter reports.
//! Classification of raw venue messages happens once, at the adapter
//! boundary, through [`VenueError::classify`]; the engine only matches on
//! variants.

use std::time::Duration;

use arbx_core::{CoreError, FailureKind};
use thiserror::Error;

// ============================================================================
// VenueError
// ============================================================================

/// Error returned by a venue adapter call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VenueError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Venue-suggested wait before retrying, if it gave one.
        retry_after: Option<Duration>,
    },

    #[error("Reduce-only restriction: {0}")]
    ReduceOnly(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Order not found or already closed: {0}")]
    OrderNotFound(String),

    #[error("Duplicate client order id: {0}")]
    DuplicateClientId(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

pub type VenueResult<T> = Result<T, VenueError>;

const RATE_LIMIT_KEYWORDS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "too many requests",
    "429",
    "max request",
    "retryafter",
    "retry_after",
    "retry after",
    "burst limit",
    "ops per",
    "per second",
];

const REDUCE_ONLY_KEYWORDS: &[&str] = &[
    "invalid reduce only mode",
    "reduce only mode",
    "reduce-only mode",
    "code=21740",
];

const NETWORK_KEYWORDS: &[&str] = &[
    "temporarily unavailable",
    "cannot connect",
    "connection reset",
    "connection refused",
    "network is unreachable",
    "name or service not known",
    "dns",
    "ssl",
];

const TIMEOUT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline_exceeded",
    "deadline exceeded",
];

const ORDER_MISSING_KEYWORDS: &[&str] = &[
    "order not found",
    "order does not exist",
    "unknown order",
    "already closed",
    "order is closed",
    "order_is_closed",
    "already filled",
    "order already done",
    "already cancelled",
    "already canceled",
    "cannot find order",
    "failed_order_not_found",
    "cannot cancel closed order",
    "order status is done",
];

const DUPLICATE_KEYWORDS: &[&str] = &["duplicate client", "duplicate cloid", "duplicate order id"];

impl VenueError {
    /// Classify a raw venue error message.
    ///
    /// Intended for adapters that only receive free-form error text. Checks run
    /// from most to least specific; anything unrecognized is a rejection, which
    /// is never retried.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if has(REDUCE_ONLY_KEYWORDS) {
            Self::ReduceOnly(message)
        } else if has(RATE_LIMIT_KEYWORDS) {
            let retry_after = parse_retry_hint(&lower);
            Self::RateLimited {
                message,
                retry_after,
            }
        } else if has(DUPLICATE_KEYWORDS) {
            Self::DuplicateClientId(message)
        } else if has(ORDER_MISSING_KEYWORDS) {
            Self::OrderNotFound(message)
        } else if has(TIMEOUT_KEYWORDS) {
            Self::Timeout(message)
        } else if has(NETWORK_KEYWORDS) {
            Self::Network(message)
        } else {
            Self::Rejected(message)
        }
    }

    /// Transient network and timeout failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Errors worth another attempt after a wait.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, Self::RateLimited { .. })
    }

    #[must_use]
    pub fn is_reduce_only(&self) -> bool {
        matches!(self, Self::ReduceOnly(_))
    }

    /// Classification recorded in an execution result.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network(_) | Self::Timeout(_) => FailureKind::Transient,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::ReduceOnly(_) => FailureKind::ReduceOnly,
            Self::Rejected(_)
            | Self::OrderNotFound(_)
            | Self::DuplicateClientId(_)
            | Self::Unsupported(_) => FailureKind::Rejected,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::ReduceOnly(_) => "reduce_only",
            Self::Rejected(_) => "rejected",
            Self::OrderNotFound(_) => "not_found",
            Self::DuplicateClientId(_) => "duplicate",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Extract a suggested wait from a lowercase throttling message.
///
/// Understands `retry after 2.5`, `retry_after: 3`, `"retryAfterSeconds": 1`
/// and `N ops per M seconds` (waits M/N seconds).
fn parse_retry_hint(lower: &str) -> Option<Duration> {
    for marker in ["retry after", "retry_after", "retryafter"] {
        if let Some(pos) = lower.find(marker) {
            let mut rest = &lower[pos + marker.len()..];
            rest = rest.strip_prefix("seconds").unwrap_or(rest);
            let rest =
                rest.trim_start_matches(|c: char| matches!(c, '\'' | '"' | ':' | '=' | ' '));
            if let Some(secs) = leading_number(rest) {
                return Duration::try_from_secs_f64(secs).ok();
            }
        }
    }

    let ops_pos = lower.find("ops per").or_else(|| lower.find("op per"))?;
    let ops: f64 = lower[..ops_pos]
        .trim_end()
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|s| s.parse().ok())?;
    let after = lower[ops_pos..].split_once("per")?.1.trim_start();
    let window = leading_number(after)?;
    if ops > 0.0 {
        Duration::try_from_secs_f64(window / ops).ok()
    } else {
        None
    }
}

fn leading_number(s: &str) -> Option<f64> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map_or(s.len(), |(i, _)| i);
    s[..end].parse().ok()
}

// ============================================================================
// ExecutorError
// ============================================================================

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("Unknown venue: {0}")]
    UnknownVenue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limiter closed for venue: {0}")]
    LimiterClosed(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_with_hint() {
        let err = VenueError::classify("HTTP 429 Too Many Requests, retry after 2.5");
        assert_eq!(
            err,
            VenueError::RateLimited {
                message: "HTTP 429 Too Many Requests, retry after 2.5".to_string(),
                retry_after: Some(Duration::from_millis(2500)),
            }
        );
    }

    #[test]
    fn test_classify_rate_limit_json_hint() {
        let err = VenueError::classify(r#"{"error":"rate limit","retryAfterSeconds": 3}"#);
        match err {
            VenueError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_ops_per_window() {
        let err = VenueError::classify("limit exceeded: 4 ops per 2 seconds");
        match err {
            VenueError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_millis(500)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_reduce_only_before_other_keywords() {
        let err = VenueError::classify("code=21740 invalid reduce only mode (timeout)");
        assert!(err.is_reduce_only());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_network_and_missing() {
        assert!(VenueError::classify("connection reset by peer").is_transient());
        assert!(VenueError::classify("deadline exceeded").is_transient());
        assert!(matches!(
            VenueError::classify("Order already canceled"),
            VenueError::OrderNotFound(_)
        ));
    }

    #[test]
    fn test_classify_unknown_is_rejection() {
        let err = VenueError::classify("insufficient margin");
        assert!(matches!(err, VenueError::Rejected(_)));
        assert_eq!(err.failure_kind(), FailureKind::Rejected);
        assert!(!err.is_retryable());
    }
}
