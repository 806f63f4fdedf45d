//! Mail composition and delivery.
//!
//! [`MailMessage`] is the provider-agnostic abstraction for composing an
//! email (HTML body, multiple recipients, optional attachments);
//! [`MailService`] is the delivery contract. [`SmtpMailService`] delivers
//! over SMTP via `lettre`; [`MockMailService`] captures messages for
//! tests.

mod error;
mod message;
mod service;
mod smtp;

pub use error::MailError;
pub use message::{MailAddress, MailMessage, MailPart};
pub use service::{MailService, MockMailService};
pub use smtp::{SmtpMailService, SmtpSettings};
