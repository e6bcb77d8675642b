use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while delivering a payload through a transport.
///
/// HTTP status failures and body decode failures are distinct variants so
/// callers can classify retries correctly: transport-level failures are
/// transient, decode failures are permanent.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport did not respond within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or connection-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote endpoint answered with a non-success HTTP status.
    #[error("http status {status}")]
    Http { status: u16 },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The payload could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The transport failed for a reason of its own.
    #[error("delivery failed: {0}")]
    Failed(String),
}

impl TransportError {
    /// Returns `true` if the failure is transient and the delivery may
    /// succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Http { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(TransportError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(TransportError::Connection("reset".into()).is_retryable());
        assert!(TransportError::Http { status: 503 }.is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!TransportError::Decode("bad json".into()).is_retryable());
        assert!(!TransportError::Serialization("x".into()).is_retryable());
        assert!(!TransportError::Failed("x".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = TransportError::Http { status: 404 };
        assert_eq!(err.to_string(), "http status 404");

        let err = TransportError::Decode("unexpected eof".into());
        assert_eq!(err.to_string(), "decode error: unexpected eof");
    }
}
