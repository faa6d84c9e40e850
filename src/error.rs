//! Error taxonomy shared by the fetch, retry and extraction layers.
//!
//! Transient failures are retried locally by [`crate::retry`]; permanent ones
//! short-circuit. Neither is ever raised past the aggregator: callers get a
//! [`RetryError`] value back and decide how to degrade.

use std::fmt;

/// One failed network interaction (feed, page or image).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("dns resolution failed for {url}: {message}")]
    Dns { url: String, message: String },

    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("connection error for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed reading body of {url}: {message}")]
    Body { url: String, message: String },

    #[error("malformed document at {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("body of {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. }
            | FetchError::Connect { .. }
            | FetchError::Body { .. }
            | FetchError::Malformed { .. } => true,
            FetchError::Status { status, .. } => is_transient_status(*status),
            FetchError::InvalidUrl { .. } | FetchError::Dns { .. } | FetchError::TooLarge { .. } => {
                false
            }
        }
    }

    /// Short stable label for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::Dns { .. } => "dns",
            FetchError::Timeout { .. } => "timeout",
            FetchError::Connect { .. } => "connect",
            FetchError::Status { .. } => "status",
            FetchError::Body { .. } => "body",
            FetchError::Malformed { .. } => "malformed",
            FetchError::TooLarge { .. } => "too_large",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::InvalidUrl { url, .. }
            | FetchError::Dns { url, .. }
            | FetchError::Timeout { url }
            | FetchError::Connect { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Body { url, .. }
            | FetchError::Malformed { url, .. }
            | FetchError::TooLarge { url, .. } => url,
        }
    }
}

/// 5xx, request timeout and rate limiting are worth another attempt.
pub fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Classifies an error for the retry loop.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        FetchError::is_transient(self)
    }
}

/// Terminal result of a retried operation that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed transiently.
    Exhausted { attempts: u32, last: E },
    /// A permanent failure stopped the loop early.
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    /// The last underlying cause.
    pub fn cause(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }

    pub fn into_cause(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Aborted { attempt, error } => {
                write!(f, "permanent failure on attempt {attempt}: {error}")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let st = |s| FetchError::Status {
            url: "u".into(),
            status: s,
        };
        assert!(st(503).is_transient());
        assert!(st(429).is_transient());
        assert!(st(408).is_transient());
        assert!(!st(404).is_transient());
        assert!(!st(410).is_transient());
        assert!(!st(403).is_transient());
    }

    #[test]
    fn dns_and_invalid_url_are_permanent() {
        let dns = FetchError::Dns {
            url: "http://nope.invalid".into(),
            message: "no such host".into(),
        };
        let bad = FetchError::InvalidUrl {
            url: "::".into(),
            reason: "relative URL without a base".into(),
        };
        assert!(!dns.is_transient());
        assert!(!bad.is_transient());
        assert_eq!(dns.kind(), "dns");
    }

    #[test]
    fn retry_error_exposes_last_cause() {
        let e = RetryError::Exhausted {
            attempts: 3,
            last: FetchError::Timeout { url: "x".into() },
        };
        assert_eq!(e.attempts(), 3);
        assert_eq!(e.cause().kind(), "timeout");
        assert!(e.to_string().contains("3 attempts"));
    }
}
