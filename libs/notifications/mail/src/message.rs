//! Mail message abstractions.

use serde::{Deserialize, Serialize};

/// An email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAddress {
    /// The address itself (e.g. `user@example.com`).
    pub address: String,
    /// Optional friendly name (e.g. `Jo Doe`).
    pub display_name: Option<String>,
}

impl MailAddress {
    /// Create an address without a display name.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }

    /// Attach a display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// An attachment carried with a mail message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPart {
    /// Full MIME type of the content (e.g. `application/pdf`).
    pub content_type: String,
    /// File name shown to the recipient.
    pub file_name: String,
    /// Raw content bytes.
    pub content: Vec<u8>,
}

/// An email message: sender, recipients, subject, HTML body and optional
/// attachments.
///
/// When `from` is `None` the delivering service falls back to its
/// configured default sender.
///
/// # Example
///
/// ```rust
/// use mail::{MailAddress, MailMessage};
///
/// let message = MailMessage::new("Welcome", "<p>Hello!</p>")
///     .to(MailAddress::new("jo@example.com").with_display_name("Jo"))
///     .from(MailAddress::new("noreply@example.com"));
///
/// assert_eq!(message.to.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Sender; `None` defers to the service's configured default.
    pub from: Option<MailAddress>,
    /// Recipients.
    pub to: Vec<MailAddress>,
    /// Subject line.
    pub subject: String,
    /// HTML body content.
    pub body: String,
    /// Attachments.
    pub parts: Vec<MailPart>,
}

impl MailMessage {
    /// Create a message with a subject and HTML body.
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: None,
            to: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            parts: Vec::new(),
        }
    }

    /// Set the sender.
    pub fn from(mut self, from: MailAddress) -> Self {
        self.from = Some(from);
        self
    }

    /// Add a recipient.
    pub fn to(mut self, to: MailAddress) -> Self {
        self.to.push(to);
        self
    }

    /// Add an attachment.
    pub fn part(mut self, part: MailPart) -> Self {
        self.parts.push(part);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let message = MailMessage::new("Hi", "<b>body</b>")
            .from(MailAddress::new("noreply@example.com").with_display_name("Notifications"))
            .to(MailAddress::new("a@example.com"))
            .to(MailAddress::new("b@example.com"))
            .part(MailPart {
                content_type: "application/pdf".to_string(),
                file_name: "invoice.pdf".to_string(),
                content: vec![1, 2, 3],
            });

        assert_eq!(message.subject, "Hi");
        assert_eq!(message.to.len(), 2);
        assert_eq!(message.parts.len(), 1);
        assert_eq!(
            message.from.as_ref().unwrap().display_name.as_deref(),
            Some("Notifications")
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let message = MailMessage::new("Hi", "<p>x</p>").to(MailAddress::new("a@example.com"));

        let json = serde_json::to_string(&message).unwrap();
        let back: MailMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
