//! Bouncer error types with retry classification.
//!
//! [`BouncerError`] is the central error type. Backend-local variants are
//! absorbed by the relay workers (see [`BouncerError::is_retryable`]); the
//! client-caused variants surface to the client as a `NOTICE` (see
//! [`BouncerError::notice`]).

/// Result alias used across the crate.
pub type BouncerResult<T> = Result<T, BouncerError>;

/// Failure taxonomy for sessions, relay workers and the wire boundary.
///
/// | Variant              | Origin  | Handling                        |
/// |----------------------|---------|---------------------------------|
/// | `DialTransport`      | backend | retry after fixed delay         |
/// | `DialTimeout`        | backend | retry after fixed delay         |
/// | `BackendServerError` | backend | retry after fixed delay         |
/// | `BackendRejected`    | backend | worker stops for that relay     |
/// | `StreamRead`         | backend | disconnect, then retry          |
/// | `StreamWrite`        | backend | logged; read side reconnects    |
/// | `MalformedMessage`   | either  | dropped, NOTICE if from client  |
/// | `MalformedPublish`   | client  | NOTICE, no broadcast            |
/// | `InvalidConfig`      | startup | process exits                   |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BouncerError {
    /// Network, TLS or protocol failure while dialing a relay.
    #[error("dial failed: {0}")]
    DialTransport(String),

    /// The dial did not complete within the configured timeout.
    #[error("dial timed out after {0} s")]
    DialTimeout(u64),

    /// The relay answered the handshake with a 5xx status.
    #[error("relay server error (status {0})")]
    BackendServerError(u16),

    /// The relay answered the handshake with a non-retryable status.
    #[error("relay rejected connection (status {0})")]
    BackendRejected(u16),

    /// An established relay stream failed while reading.
    #[error("relay stream read failed: {0}")]
    StreamRead(String),

    /// Writing to an established relay stream failed.
    #[error("relay stream write failed: {0}")]
    StreamWrite(String),

    /// A frame could not be decoded into a protocol message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A published event carried no usable `id`.
    #[error("invalid: event object has no id")]
    MalformedPublish,

    /// Startup configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BouncerError {
    /// Returns `true` when a relay worker should sleep and dial again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DialTransport(_)
                | Self::DialTimeout(_)
                | Self::BackendServerError(_)
                | Self::StreamRead(_)
                | Self::StreamWrite(_)
        )
    }

    /// Returns the `NOTICE` text for errors caused by the client, or `None`
    /// for failures that must not reach the client.
    #[must_use]
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::MalformedMessage(_) | Self::MalformedPublish => Some(self.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_transport_failures_are_retryable() {
        assert!(BouncerError::BackendServerError(503).is_retryable());
        assert!(BouncerError::DialTransport("refused".into()).is_retryable());
        assert!(BouncerError::DialTimeout(20).is_retryable());
        assert!(BouncerError::StreamRead("reset".into()).is_retryable());
    }

    #[test]
    fn rejection_is_permanent() {
        assert!(!BouncerError::BackendRejected(403).is_retryable());
        assert!(!BouncerError::MalformedPublish.is_retryable());
    }

    #[test]
    fn only_client_errors_produce_notices() {
        assert_eq!(
            BouncerError::MalformedPublish.notice().as_deref(),
            Some("invalid: event object has no id")
        );
        assert!(BouncerError::MalformedMessage("x".into()).notice().is_some());
        assert_eq!(BouncerError::BackendRejected(401).notice(), None);
        assert_eq!(BouncerError::StreamRead("eof".into()).notice(), None);
    }
}
