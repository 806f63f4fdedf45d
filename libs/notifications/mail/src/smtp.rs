//! SMTP implementation of [`MailService`] using lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::info;

use crate::error::MailError;
use crate::message::{MailAddress, MailMessage};
use crate::service::MailService;

fn default_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

/// SMTP server settings, bound from the host's configuration source as a
/// flat section.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    /// SMTP server hostname or IP address.
    pub host: String,
    /// SMTP server port (25, 587 or 465). Default: 587.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username for SMTP authentication; empty disables authentication
    /// (local relays like Mailpit).
    #[serde(default)]
    pub username: String,
    /// Password for SMTP authentication.
    #[serde(default)]
    pub password: String,
    /// Default sender address used when a message carries none.
    #[serde(default)]
    pub from: Option<String>,
    /// Default sender display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Negotiate TLS with the server. Default: true.
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

impl SmtpSettings {
    /// Create settings for a host with defaults for everything else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            from: None,
            display_name: None,
            use_tls: default_use_tls(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the authentication credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the default sender.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the default sender display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Enable or disable TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Read settings from `SMTP_*` environment variables.
    pub fn from_env() -> Result<Self, MailError> {
        let host = std::env::var("SMTP_HOST")
            .map_err(|_| MailError::Config("SMTP_HOST not set".to_string()))?;
        let port = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| default_port().to_string())
            .parse()
            .map_err(|_| MailError::Config("invalid SMTP_PORT".to_string()))?;

        Ok(Self {
            host,
            port,
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: std::env::var("SMTP_FROM").ok(),
            display_name: std::env::var("SMTP_DISPLAY_NAME").ok(),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }
}

/// SMTP [`MailService`] delivering over an async lettre transport.
///
/// Supports HTML bodies, multiple recipients and MIME attachments. The
/// sender address and display name fall back to the configured defaults
/// when a message does not carry its own.
pub struct SmtpMailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    settings: SmtpSettings,
}

impl SmtpMailService {
    /// Create a service over the configured SMTP server.
    pub fn new(settings: SmtpSettings) -> Result<Self, MailError> {
        let transport = if settings.use_tls {
            let credentials =
                Credentials::new(settings.username.clone(), settings.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Config(e.to_string()))?
                .credentials(credentials)
                .port(settings.port)
                .build()
        } else if !settings.username.is_empty() {
            let credentials =
                Credentials::new(settings.username.clone(), settings.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .credentials(credentials)
                .port(settings.port)
                .build()
        } else {
            // No auth (local relays).
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
                .build()
        };

        Ok(Self {
            transport,
            settings,
        })
    }

    /// Resolve the effective sender: the message's own, or the configured
    /// default.
    fn resolved_from(&self, request: &MailMessage) -> Result<MailAddress, MailError> {
        if let Some(from) = &request.from {
            let mut from = from.clone();
            if from.display_name.is_none() {
                from.display_name = self.settings.display_name.clone();
            }
            return Ok(from);
        }

        let address = self
            .settings
            .from
            .clone()
            .ok_or_else(|| MailError::Config("no sender address configured".to_string()))?;
        Ok(MailAddress {
            address,
            display_name: self.settings.display_name.clone(),
        })
    }

    fn mailbox(address: &MailAddress) -> Result<Mailbox, MailError> {
        let parsed: Address = address
            .address
            .parse()
            .map_err(|_| MailError::InvalidAddress(address.address.clone()))?;
        Ok(Mailbox::new(address.display_name.clone(), parsed))
    }

    fn build_message(&self, request: &MailMessage) -> Result<Message, MailError> {
        let from = self.resolved_from(request)?;

        let mut builder = Message::builder()
            .from(Self::mailbox(&from)?)
            .subject(&request.subject);

        for recipient in &request.to {
            builder = builder.to(Self::mailbox(recipient)?);
        }

        let html = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(request.body.clone());

        let message = if request.parts.is_empty() {
            builder
                .singlepart(html)
                .map_err(|e| MailError::Build(e.to_string()))?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(html);
            for part in &request.parts {
                let content_type = ContentType::parse(&part.content_type)
                    .map_err(|e| MailError::Build(e.to_string()))?;
                multipart = multipart.singlepart(
                    Attachment::new(part.file_name.clone())
                        .body(part.content.clone(), content_type),
                );
            }
            builder
                .multipart(multipart)
                .map_err(|e| MailError::Build(e.to_string()))?
        };

        Ok(message)
    }
}

#[async_trait]
impl MailService for SmtpMailService {
    async fn send(&self, request: &MailMessage) -> Result<(), MailError> {
        let message = self.build_message(request)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        info!(
            subject = %request.subject,
            recipients = request.to.len(),
            "Mail sent"
        );

        Ok(())
    }
}
