//! Outbound mail.
//!
//! Handlers talk to a `MailTransport`; the default implementation sends over
//! SMTP with lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::error::ActionError;

/// Connection settings for one send.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: String,
    pub tls: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// HTML body.
    pub body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, smtp: &SmtpSettings, message: &EmailMessage) -> Result<(), ActionError>;
}

/// SMTP transport built per send from the action's settings.
pub struct SmtpMailer;

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, smtp: &SmtpSettings, message: &EmailMessage) -> Result<(), ActionError> {
        let builder = if smtp.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| ActionError::UpstreamFailure(format!("SMTP setup failed: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        let mut builder = builder.port(smtp.port).timeout(Some(smtp.timeout));
        if let Some(user) = &smtp.username {
            builder = builder.credentials(Credentials::new(user.clone(), smtp.password.clone()));
        }
        let transport = builder.build();

        let email = Message::builder()
            .from(message.from.parse().map_err(|e| {
                ActionError::ParameterResolution(format!("invalid from address: {}", e))
            })?)
            .to(message.to.parse().map_err(|e| {
                ActionError::ParameterResolution(format!("invalid to address: {}", e))
            })?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())
            .map_err(|e| ActionError::UpstreamFailure(format!("failed to build email: {}", e)))?;

        let send = transport.send(email);
        match tokio::time::timeout(smtp.timeout, send).await {
            Ok(Ok(_)) => {
                debug!(host = %smtp.host, to = %message.to, "Email sent");
                Ok(())
            }
            Ok(Err(e)) if e.is_timeout() => Err(ActionError::UpstreamTimeout(format!("SMTP: {}", e))),
            Ok(Err(e)) => Err(ActionError::UpstreamFailure(format!("SMTP: {}", e))),
            Err(_) => Err(ActionError::UpstreamTimeout(format!(
                "SMTP send exceeded {}s",
                smtp.timeout.as_secs()
            ))),
        }
    }
}
