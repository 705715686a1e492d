//! Service layer for the monitoring engine.
//!
//! This module contains the outbound integrations:
//! - Page fetching and text extraction (`ContentFetcher`, `ContentExtractor`)
//! - Alert rendering and dispatch (`Notifier`)
//! - Channel transports (`TelegramTransport`, `SmtpMailer`)

pub mod email;
pub mod extract;
pub mod fetcher;
pub mod notifier;
pub mod telegram;

pub use email::SmtpMailer;
pub use extract::ContentExtractor;
pub use fetcher::{ContentFetcher, PageSource};
pub use notifier::{
    BotTarget, ChannelOutcome, ChatTransport, DispatchReport, EmailMessage, EmailTarget,
    MailTransport, Notifier, NotifierConfig, SiteEvent,
};
pub use telegram::TelegramTransport;
