//! Mail error types.

use thiserror::Error;

/// Error from composing or delivering a mail message.
#[derive(Debug, Error)]
pub enum MailError {
    /// A sender or recipient address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Assembling the MIME message failed.
    #[error("message build error: {0}")]
    Build(String),

    /// The transport rejected or failed the send.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service is misconfigured (e.g. no default sender available).
    #[error("configuration error: {0}")]
    Config(String),
}
