//! Error types for consuming and settling messages.

use strum::Display;
use thiserror::Error;

/// Error returned by a [`MessageConsumer`](crate::MessageConsumer).
///
/// Returning `Err` from `consume` is the sole application-level failure
/// signal; the worker reacts by abandoning the delivery so the broker can
/// redeliver it. The error carries a human-readable message plus an
/// optional source for logging.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConsumeError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConsumeError {
    /// Create a consume error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a consume error wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<String> for ConsumeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ConsumeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Error returned by broker settlement operations (complete, abandon,
/// dead-letter).
///
/// A settlement error leaves the lifecycle guard `Pending`: the terminal
/// action did not reach the broker, so the caller may retry or let the
/// message redeliver when its lock expires.
#[derive(Debug, Error)]
#[error("settlement failed: {message}")]
pub struct SettleError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SettleError {
    /// Create a settlement error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a settlement error wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Reason attached to a dead-lettered message.
///
/// The two deserialization variants render exactly as
/// `DeserializationFailed` and `DeserializationReturnedNull` on the
/// dead-letter channel; `Other` carries an application-chosen reason
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DeadLetterReason {
    /// The raw payload could not be parsed into the expected type.
    DeserializationFailed,
    /// The payload parsed but yielded an empty (null) result.
    DeserializationReturnedNull,
    /// Application-supplied reason.
    #[strum(to_string = "{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_reason_rendering() {
        assert_eq!(
            DeadLetterReason::DeserializationFailed.to_string(),
            "DeserializationFailed"
        );
        assert_eq!(
            DeadLetterReason::DeserializationReturnedNull.to_string(),
            "DeserializationReturnedNull"
        );
        assert_eq!(
            DeadLetterReason::Other("HandlerRejected".to_string()).to_string(),
            "HandlerRejected"
        );
    }

    #[test]
    fn test_consume_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timed out");
        let err = ConsumeError::with_source("downstream call failed", io);

        assert_eq!(err.to_string(), "downstream call failed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_settle_error_message() {
        let err = SettleError::new("lock lost");
        assert_eq!(err.to_string(), "settlement failed: lock lost");
        assert!(std::error::Error::source(&err).is_none());
    }
}
