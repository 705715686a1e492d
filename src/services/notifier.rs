// src/services/notifier.rs

//! Change and error alerts over the chat-bot and email channels.
//!
//! Both channels are optional. A channel without credentials is skipped, a
//! channel that fails or hangs is logged, and neither outcome reaches the
//! caller: [`Notifier::notify`] never returns an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{AppError, Result};
use crate::models::{NotificationsConfig, SmtpSettings, User};
use crate::utils::truncate_graphemes;

/// Abstract "send message to chat/bot endpoint" operation.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, token: &str, chat_id: &str, text: &str) -> Result<()>;
}

/// Abstract "send email" operation.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_email(&self, smtp: &SmtpSettings, email: &EmailMessage) -> Result<()>;
}

/// An email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Bot channel credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotTarget {
    pub token: String,
    pub chat_id: String,
}

/// Email channel target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTarget {
    pub to: String,
    pub smtp: SmtpSettings,
}

/// Resolved channels for one run. `None` disables the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierConfig {
    pub bot: Option<BotTarget>,
    pub email: Option<EmailTarget>,
}

impl NotifierConfig {
    /// No channels at all.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Channels for the legacy global trigger: global bot only, never email.
    pub fn global(config: &NotificationsConfig) -> Self {
        Self {
            bot: bot_target(
                config.telegram_bot_token.as_deref(),
                config.telegram_chat_id.as_deref(),
            ),
            email: None,
        }
    }

    /// Channels for a user. Bot credentials fall back to the global ones.
    pub fn for_user(user: &User, config: &NotificationsConfig) -> Self {
        let settings = &user.settings;
        let token = non_blank(settings.telegram_bot_token.as_deref())
            .or(non_blank(config.telegram_bot_token.as_deref()));
        let chat_id = non_blank(settings.telegram_chat_id.as_deref())
            .or(non_blank(config.telegram_chat_id.as_deref()));

        let email = if settings.email_notifications_enabled {
            match (user.notification_address(), config.smtp.complete()) {
                (Some(to), Some(smtp)) => Some(EmailTarget {
                    to: to.to_string(),
                    smtp,
                }),
                (None, _) => {
                    log::warn!("Email alerts enabled for {} but no address is set", user.username);
                    None
                }
                (_, None) => {
                    log::warn!("Email alerts enabled for {} but SMTP is not configured", user.username);
                    None
                }
            }
        } else {
            None
        };

        Self {
            bot: bot_target(token, chat_id),
            email,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn bot_target(token: Option<&str>, chat_id: Option<&str>) -> Option<BotTarget> {
    Some(BotTarget {
        token: non_blank(token)?.to_string(),
        chat_id: non_blank(chat_id)?.to_string(),
    })
}

/// What happened on a site that is worth an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEvent {
    Changed { url: String },
    Failed { url: String, error: String },
}

impl SiteEvent {
    pub fn url(&self) -> &str {
        match self {
            SiteEvent::Changed { url } | SiteEvent::Failed { url, .. } => url,
        }
    }
}

/// Outcome of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Not configured
    Skipped,
    Sent,
    Failed(String),
}

/// Per-channel result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub bot: ChannelOutcome,
    pub email: ChannelOutcome,
}

impl DispatchReport {
    pub fn skipped() -> Self {
        Self {
            bot: ChannelOutcome::Skipped,
            email: ChannelOutcome::Skipped,
        }
    }
}

/// Renders alerts and dispatches them with a per-channel timeout.
#[derive(Clone)]
pub struct Notifier {
    chat: Arc<dyn ChatTransport>,
    mail: Arc<dyn MailTransport>,
    timeout: Duration,
    display_tz: Tz,
    error_limit: usize,
}

impl Notifier {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        mail: Arc<dyn MailTransport>,
        config: &NotificationsConfig,
    ) -> Result<Self> {
        Ok(Self {
            chat,
            mail,
            timeout: Duration::from_secs(config.timeout_secs),
            display_tz: config.display_timezone()?,
            error_limit: config.error_message_limit,
        })
    }

    /// Send `event` on every configured channel. Never fails.
    pub async fn notify(&self, target: &NotifierConfig, event: &SiteEvent) -> DispatchReport {
        // Rendered at send time, not taken from the check.
        let at = Utc::now();

        let (bot, email) = futures::join!(
            self.send_bot(target.bot.as_ref(), event, at),
            self.send_email(target.email.as_ref(), event, at),
        );

        DispatchReport { bot, email }
    }

    async fn send_bot(
        &self,
        target: Option<&BotTarget>,
        event: &SiteEvent,
        at: DateTime<Utc>,
    ) -> ChannelOutcome {
        let Some(target) = target else {
            log::info!("Telegram notification skipped - bot not configured");
            return ChannelOutcome::Skipped;
        };
        let text = self.chat_text(event, at);
        let send = self.chat.send_message(&target.token, &target.chat_id, &text);
        self.finish("telegram", event, self.bounded("telegram", send).await)
    }

    async fn send_email(
        &self,
        target: Option<&EmailTarget>,
        event: &SiteEvent,
        at: DateTime<Utc>,
    ) -> ChannelOutcome {
        let Some(target) = target else {
            log::debug!("Email notification skipped - not enabled or not configured");
            return ChannelOutcome::Skipped;
        };
        let email = self.email_message(&target.to, event, at);
        let send = self.mail.send_email(&target.smtp, &email);
        self.finish("email", event, self.bounded("email", send).await)
    }

    async fn bounded<F>(&self, channel: &str, send: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(AppError::notification(
                channel,
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }

    fn finish(&self, channel: &str, event: &SiteEvent, result: Result<()>) -> ChannelOutcome {
        match result {
            Ok(()) => {
                log::info!("{channel} notification sent for {}", event.url());
                ChannelOutcome::Sent
            }
            Err(e) => {
                log::error!("Error sending {channel} notification for {}: {e}", event.url());
                ChannelOutcome::Failed(e.to_string())
            }
        }
    }

    fn display_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.display_tz)
            .format("%Y-%m-%d %I:%M:%S %p %Z")
            .to_string()
    }

    /// Chat message body (HTML parse mode).
    pub fn chat_text(&self, event: &SiteEvent, at: DateTime<Utc>) -> String {
        let time = self.display_time(at);
        match event {
            SiteEvent::Changed { url } => {
                format!("🔔 Change detected on {}\nTime: {time}", escape_html(url))
            }
            SiteEvent::Failed { url, error } => format!(
                "❌ Error checking {}\nTime: {time}\nError: {}",
                escape_html(url),
                escape_html(&truncate_graphemes(error, self.error_limit))
            ),
        }
    }

    /// Email subject and HTML body.
    pub fn email_message(&self, to: &str, event: &SiteEvent, at: DateTime<Utc>) -> EmailMessage {
        let time = self.display_time(at);
        let url = escape_html(event.url());
        let (subject, heading, details) = match event {
            SiteEvent::Changed { url: raw } => (
                format!("🔔 Change Detected on {raw}"),
                "Website Change Alert",
                "<p>Please visit the website to review the changes.</p>".to_string(),
            ),
            SiteEvent::Failed { url: raw, error } => (
                format!("❌ Error checking {raw}"),
                "Website Check Failed",
                format!(
                    "<p><strong>Error:</strong> {}</p>",
                    escape_html(&truncate_graphemes(error, self.error_limit))
                ),
            ),
        };

        let html_body = format!(
            r#"<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px; border: 1px solid #e0e0e0; border-radius: 5px;">
    <h2 style="color: #2c3e50;">{heading}</h2>
    <p><strong>Website:</strong> <a href="{url}">{url}</a></p>
    <p><strong>Detected:</strong> {time}</p>
    {details}
    <p style="font-size: 12px; color: #777;">This is an automated message from WebWatch. Please do not reply.</p>
  </div>
</body>
</html>"#
        );

        EmailMessage {
            to: to.to_string(),
            subject,
            html_body,
        }
    }
}

/// Escape text for HTML bodies and Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
