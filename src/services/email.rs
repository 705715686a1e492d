// src/services/email.rs

//! SMTP email transport (STARTTLS, async lettre).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::{AppError, Result};
use crate::models::SmtpSettings;
use crate::services::notifier::{EmailMessage, MailTransport};

/// Display name used in the `From` header.
const SENDER_NAME: &str = "WebWatch";

/// Sends HTML email through an SMTP relay.
#[derive(Debug, Clone, Default)]
pub struct SmtpMailer;

impl SmtpMailer {
    pub fn new() -> Self {
        Self
    }

    /// Build the MIME message.
    pub fn build_message(smtp: &SmtpSettings, email: &EmailMessage) -> Result<Message> {
        let from: Mailbox = format!("{SENDER_NAME} <{}>", smtp.sender)
            .parse()
            .map_err(|e| AppError::notification("email", format!("invalid sender: {e}")))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| AppError::notification("email", format!("invalid recipient: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())
            .map_err(|e| AppError::notification("email", format!("build email: {e}")))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send_email(&self, smtp: &SmtpSettings, email: &EmailMessage) -> Result<()> {
        let message = Self::build_message(smtp, email)?;
        let credentials = Credentials::new(smtp.username.clone(), smtp.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| AppError::notification("email", format!("SMTP relay: {e}")))?
            .port(smtp.port)
            .credentials(credentials)
            .build();

        mailer
            .send(message)
            .await
            .map_err(|e| AppError::notification("email", format!("SMTP send: {e}")))?;

        log::info!("Email notification sent to {}", email.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: "bot@example.com".into(),
            password: "pw".into(),
            sender: "bot@example.com".into(),
        }
    }

    #[test]
    fn test_build_message_headers() {
        let email = EmailMessage {
            to: "ana@example.com".into(),
            subject: "Change Detected".into(),
            html_body: "<p>hi</p>".into(),
        };
        let message = SmtpMailer::build_message(&smtp(), &email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("From: WebWatch <bot@example.com>"));
        assert!(raw.contains("To: ana@example.com"));
        assert!(raw.contains("Content-Type: text/html"));
    }

    #[test]
    fn test_invalid_recipient_is_notification_error() {
        let email = EmailMessage {
            to: "not an address".into(),
            subject: "x".into(),
            html_body: String::new(),
        };
        let err = SmtpMailer::build_message(&smtp(), &email).unwrap_err();
        assert!(matches!(err, AppError::Notification { .. }));
    }
}
