//! Inference error classification and retry policy.

use std::fmt;
use std::time::Duration;

/// Coarse error category used to decide whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 from the provider; honor Retry-After when present.
    RateLimited,
    /// 5xx from the provider; transient.
    ServerError,
    /// 4xx other than 429; retrying will not help.
    ClientError,
    /// Connection, DNS, or timeout failure before a response arrived.
    NetworkError,
    /// The response arrived but could not be decoded.
    ParseError,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LlmErrorKind::RateLimited => "rate limited",
            LlmErrorKind::ServerError => "server error",
            LlmErrorKind::ClientError => "client error",
            LlmErrorKind::NetworkError => "network error",
            LlmErrorKind::ParseError => "parse error",
        };
        f.write_str(s)
    }
}

/// Map an HTTP status code onto an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Error from the inference service.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            message,
            status: Some(429),
            retry_after,
        }
    }

    pub fn server_error(status: u16, message: String) -> Self {
        Self {
            kind: LlmErrorKind::ServerError,
            message,
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn client_error(status: u16, message: String) -> Self {
        Self {
            kind: LlmErrorKind::ClientError,
            message,
            status: Some(status),
            retry_after: None,
        }
    }

    pub fn network_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            message,
            status: None,
            retry_after: None,
        }
    }

    pub fn parse_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            message,
            status: None,
            retry_after: None,
        }
    }

    /// Delay before the next attempt: Retry-After when the server sent one,
    /// otherwise exponential backoff capped at 8s.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(d) = self.retry_after {
            return d;
        }
        let backoff = Duration::from_millis(500) * 2u32.saturating_pow(attempt);
        backoff.min(Duration::from_secs(8))
    }
}

/// Retry policy for transient inference errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn should_retry(&self, error: &LlmError) -> bool {
        matches!(
            error.kind,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(400), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(404), LlmErrorKind::ClientError);
    }

    #[test]
    fn retry_only_transient_kinds() {
        let cfg = RetryConfig::default();
        assert!(cfg.should_retry(&LlmError::rate_limited("slow down".into(), None)));
        assert!(cfg.should_retry(&LlmError::server_error(502, "bad gateway".into())));
        assert!(cfg.should_retry(&LlmError::network_error("reset".into())));
        assert!(!cfg.should_retry(&LlmError::client_error(400, "bad request".into())));
        assert!(!cfg.should_retry(&LlmError::parse_error("garbage".into())));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let err = LlmError::rate_limited("slow down".into(), Some(Duration::from_secs(3)));
        assert_eq!(err.suggested_delay(0), Duration::from_secs(3));
        let err = LlmError::server_error(500, "oops".into());
        assert_eq!(err.suggested_delay(0), Duration::from_millis(500));
        assert_eq!(err.suggested_delay(10), Duration::from_secs(8));
    }
}
