use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur when fetching activity from a forge.
///
/// Clone is derived so partial failures can be both retained on a result
/// (pagination truncation) and itemized in a run's failure list.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Credential rejected: 401, or 403 without a rate-limit signal.
    #[error("authentication rejected")]
    Auth,

    /// Resource not found (repo, user, etc.).
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Network, transport, or unexpected server error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Rate limit exceeded and the retry budget ran out.
    #[error("rate limit exceeded{}", fmt_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// A pagination walk hit the page safety bound; counts are partial.
    #[error("pagination stopped at the {pages}-page safety bound")]
    PaginationExhausted { pages: u32 },

    /// The run deadline expired while this unit was in flight.
    #[error("cancelled by run deadline")]
    Cancelled,
}

fn fmt_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(", resets at {at}"),
        None => String::new(),
    }
}

impl FetchError {
    /// Create a not found error.
    #[inline]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Check if a fresh attempt could plausibly succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::RateLimited { .. })
    }
}

/// One itemized failure from a run.
///
/// `subject` is the repository path for stats units and the username for
/// discovery units.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub forge: String,
    pub subject: String,
    pub error: FetchError,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.forge, self.subject, self.error)
    }
}

/// Trim a response body down to something loggable: first line, capped.
pub(crate) fn short_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let line = text.lines().next().unwrap_or("").trim();
    let mut out: String = line.chars().take(200).collect();
    if line.chars().count() > 200 {
        out.push('…');
    }
    out
}

/// Result type for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn display_messages_are_single_line() {
        let reset = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let cases = vec![
            FetchError::Auth,
            FetchError::not_found("acme/widget"),
            FetchError::network("connection refused"),
            FetchError::RateLimited {
                reset_at: Some(reset),
            },
            FetchError::RateLimited { reset_at: None },
            FetchError::PaginationExhausted { pages: 100 },
            FetchError::Cancelled,
        ];
        for err in cases {
            let msg = err.to_string();
            assert!(!msg.contains('\n'), "multi-line message: {msg:?}");
            assert!(!msg.is_empty());
        }
    }

    #[test]
    fn rate_limited_display_includes_reset_when_known() {
        let reset = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let with = FetchError::RateLimited {
            reset_at: Some(reset),
        };
        let without = FetchError::RateLimited { reset_at: None };
        assert!(with.to_string().contains("resets at"));
        assert!(!without.to_string().contains("resets at"));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::network("boom").is_transient());
        assert!(FetchError::RateLimited { reset_at: None }.is_transient());
        assert!(!FetchError::Auth.is_transient());
        assert!(!FetchError::not_found("x").is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        assert!(FetchError::RateLimited { reset_at: None }.is_rate_limited());
        assert!(!FetchError::Auth.is_rate_limited());
    }

    #[test]
    fn failure_display_names_forge_and_subject() {
        let failure = FetchFailure {
            forge: "github".to_string(),
            subject: "acme/widget".to_string(),
            error: FetchError::not_found("acme/widget"),
        };
        assert_eq!(failure.to_string(), "github acme/widget: not found: acme/widget");
    }

    #[test]
    fn short_body_takes_first_line_and_caps_length() {
        assert_eq!(short_body(b"plain message"), "plain message");
        assert_eq!(short_body(b"first\nsecond"), "first");
        assert_eq!(short_body(b""), "");
        let long = "x".repeat(300);
        let out = short_body(long.as_bytes());
        assert_eq!(out.chars().count(), 201);
        assert!(out.ends_with('…'));
    }
}
