//! Mail delivery contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::MailError;
use crate::message::MailMessage;

/// Contract for delivering composed mail messages.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Deliver one message through the underlying infrastructure.
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// A mail service that captures messages instead of sending them.
///
/// For tests: captured messages can be inspected, and the next send can
/// be made to fail.
#[derive(Clone, Default)]
pub struct MockMailService {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockMailService {
    /// Create an empty capturing service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages captured so far.
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    /// Make the next send fail with a transport error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailService for MockMailService {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(MailError::Transport("injected send failure".to_string()));
        }
        self.sent
            .lock()
            .expect("sent lock poisoned")
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MailAddress;

    #[tokio::test]
    async fn test_mock_captures_messages() {
        let service = MockMailService::new();
        let message = MailMessage::new("Hi", "<p>x</p>").to(MailAddress::new("a@example.com"));

        service.send(&message).await.unwrap();

        let sent = service.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Hi");
    }

    #[tokio::test]
    async fn test_mock_fail_next() {
        let service = MockMailService::new();
        service.fail_next();

        let message = MailMessage::new("Hi", "<p>x</p>");
        assert!(service.send(&message).await.is_err());

        // The failure budget is spent; the next send succeeds.
        service.send(&message).await.unwrap();
        assert_eq!(service.sent().len(), 1);
    }
}
