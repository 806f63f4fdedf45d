//! Error types for broker and worker operations.

use thiserror::Error;

/// Error from the broker boundary (connections, subscriptions, senders).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker is unreachable or refused the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Creating or starting a subscription failed.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Transmitting an outbound message failed.
    #[error("send error: {0}")]
    Send(String),

    /// The addressed queue or topic does not exist.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// Serializing an outbound payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A settlement primitive failed at the broker.
    #[error(transparent)]
    Settle(#[from] messaging::SettleError),
}

impl BrokerError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a subscription error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::Subscription(message.into())
    }

    /// Create a send error.
    pub fn send(message: impl Into<String>) -> Self {
        Self::Send(message.into())
    }
}

/// Error from the worker loop itself.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A broker operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Settling a delivery failed.
    #[error(transparent)]
    Settle(#[from] messaging::SettleError),

    /// The restart budget was exhausted without recovering the
    /// subscription. The processor is left stopped; the host keeps
    /// running.
    #[error("restart budget exhausted after {attempts} attempts")]
    RecoveryExhausted { attempts: u32 },
}
