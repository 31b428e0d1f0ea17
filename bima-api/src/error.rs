//! Provider error type and retryability categories.

use std::fmt;

use thiserror::Error;

/// The category of a provider failure. Retry policy hangs off this: a
/// [`transient`](Self::is_transient) error may be retried with backoff, a
/// permanent one must not be.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ProviderErrorKind {
    /// Couldn't reach the provider at all (DNS, connect, TLS).
    Network,
    /// The provider didn't answer within the deadline.
    Timeout,
    /// The provider asked us to slow down.
    RateLimited,
    /// The provider answered with a 5xx or equivalent.
    Unavailable,
    /// The recipient address / phone number was rejected.
    InvalidRecipient,
    /// The recipient has blocked or been blocked from this channel.
    Blacklisted,
    /// Our sender id / short code was rejected.
    InvalidSender,
    /// Credentials were rejected.
    AuthFailed,
    /// The provider rejected the request for some other permanent reason.
    Rejected,
    /// Anything we couldn't classify. Treated as permanent.
    Other,
}

impl ProviderErrorKind {
    /// Whether an error of this kind may be retried against the same
    /// provider.
    pub fn is_transient(self) -> bool {
        use ProviderErrorKind::*;
        match self {
            Network | Timeout | RateLimited | Unavailable => true,
            InvalidRecipient | Blacklisted | InvalidSender | AuthFailed
            | Rejected | Other => false,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate limited",
            Self::Unavailable => "unavailable",
            Self::InvalidRecipient => "invalid recipient",
            Self::Blacklisted => "blacklisted",
            Self::InvalidSender => "invalid sender",
            Self::AuthFailed => "auth failed",
            Self::Rejected => "rejected",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// An error returned from any outbound provider call.
#[derive(Clone, Debug, Error)]
#[error("provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Rejected, message)
    }

    /// Whether the caller may retry this call against the same provider.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_connect() {
            ProviderErrorKind::Network
        } else if let Some(status) = err.status() {
            status_error_kind(status)
        } else {
            ProviderErrorKind::Network
        };
        Self::new(kind, format!("{err:#}"))
    }
}

/// Classify an HTTP error status from a provider.
pub fn status_error_kind(status: reqwest::StatusCode) -> ProviderErrorKind {
    use reqwest::StatusCode;
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN =>
            ProviderErrorKind::AuthFailed,
        s if s.is_server_error() => ProviderErrorKind::Unavailable,
        _ => ProviderErrorKind::Rejected,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_categories() {
        use ProviderErrorKind::*;
        for kind in [Network, Timeout, RateLimited, Unavailable] {
            assert!(kind.is_transient());
        }
        for kind in
            [InvalidRecipient, Blacklisted, InvalidSender, AuthFailed, Other]
        {
            assert!(!kind.is_transient());
        }
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert_eq!(
            status_error_kind(StatusCode::SERVICE_UNAVAILABLE),
            ProviderErrorKind::Unavailable,
        );
        assert_eq!(
            status_error_kind(StatusCode::TOO_MANY_REQUESTS),
            ProviderErrorKind::RateLimited,
        );
        assert_eq!(
            status_error_kind(StatusCode::BAD_REQUEST),
            ProviderErrorKind::Rejected,
        );
    }
}
