//! Application configuration structures.

use std::fs;
use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::scheduler::CronSchedule;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP fetch behavior
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Trigger timing and batch pacing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Global notification credentials and limits
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Check history retention
    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        if self.notifications.timeout_secs == 0 {
            return Err(AppError::validation(
                "notifications.timeout_secs must be > 0",
            ));
        }
        if self.notifications.error_message_limit == 0 {
            return Err(AppError::validation(
                "notifications.error_message_limit must be > 0",
            ));
        }
        if self.scheduler.reload_interval_secs == 0 {
            return Err(AppError::validation(
                "scheduler.reload_interval_secs must be > 0",
            ));
        }
        if self.retention.keep_recent == 0 {
            return Err(AppError::validation("retention.keep_recent must be > 0"));
        }
        self.scheduler.timezone()?;
        self.notifications.display_timezone()?;
        if let Some(expression) = self
            .scheduler
            .global_schedule
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            CronSchedule::parse(expression)?;
        }
        Ok(())
    }
}

/// HTTP client settings for page fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header; a desktop browser identity by default
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::accept")]
    pub accept: String,

    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept: defaults::accept(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::fetch_timeout(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone cron expressions are evaluated in
    #[serde(default = "defaults::timezone")]
    pub timezone: String,

    /// Legacy trigger covering every site; `None` disables it
    #[serde(default = "defaults::global_schedule")]
    pub global_schedule: Option<String>,

    /// Pause between sites within one run, in milliseconds
    #[serde(default = "defaults::site_pause")]
    pub site_pause_ms: u64,

    /// How late a missed fire may still run, in seconds
    #[serde(default = "defaults::misfire_grace")]
    pub misfire_grace_secs: u64,

    /// How often a running scheduler re-reads users from the store, in seconds
    #[serde(default = "defaults::reload_interval")]
    pub reload_interval_secs: u64,
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone("scheduler.timezone", &self.timezone)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: defaults::timezone(),
            global_schedule: defaults::global_schedule(),
            site_pause_ms: defaults::site_pause(),
            misfire_grace_secs: defaults::misfire_grace(),
            reload_interval_secs: defaults::reload_interval(),
        }
    }
}

/// Global notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Bot token used when a user has none
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    /// Chat used by the global trigger and by users without one
    #[serde(default)]
    pub telegram_chat_id: Option<String>,

    /// Per-channel send timeout in seconds
    #[serde(default = "defaults::notify_timeout")]
    pub timeout_secs: u64,

    /// Timezone detection times are rendered in
    #[serde(default = "defaults::timezone")]
    pub display_timezone: String,

    /// Maximum characters of an error message included in alerts
    #[serde(default = "defaults::error_message_limit")]
    pub error_message_limit: usize,

    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl NotificationsConfig {
    pub fn display_timezone(&self) -> Result<Tz> {
        parse_timezone("notifications.display_timezone", &self.display_timezone)
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            timeout_secs: defaults::notify_timeout(),
            display_timezone: defaults::timezone(),
            error_message_limit: defaults::error_message_limit(),
            smtp: SmtpConfig::default(),
        }
    }
}

/// SMTP server settings. Every field must be present for email to be sent.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender address; falls back to the username
    #[serde(default)]
    pub sender: Option<String>,
}

/// SMTP settings with every field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

impl SmtpConfig {
    /// Return the settings only if nothing is missing.
    pub fn complete(&self) -> Option<SmtpSettings> {
        fn present(value: &Option<String>) -> Option<String> {
            value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from)
        }

        let username = present(&self.username)?;
        Some(SmtpSettings {
            host: present(&self.host)?,
            port: self.port.filter(|p| *p > 0)?,
            sender: present(&self.sender).unwrap_or_else(|| username.clone()),
            password: present(&self.password)?,
            username,
        })
    }
}

/// Check history retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Most recent records kept per site, besides the latest change
    #[serde(default = "defaults::keep_recent")]
    pub keep_recent: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_recent: defaults::keep_recent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

fn parse_timezone(field: &str, name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| AppError::validation(format!("{field} '{name}' is not a known timezone: {e}")))
}

mod defaults {
    // Fetcher defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".into()
    }
    pub fn accept() -> String {
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".into()
    }
    pub fn accept_language() -> String {
        "en-US,en;q=0.5".into()
    }
    pub fn fetch_timeout() -> u64 {
        30
    }

    // Scheduler defaults
    pub fn timezone() -> String {
        "America/Los_Angeles".into()
    }
    pub fn global_schedule() -> Option<String> {
        Some("0 8,15,19 * * *".into())
    }
    pub fn site_pause() -> u64 {
        1000
    }
    pub fn misfire_grace() -> u64 {
        600
    }
    pub fn reload_interval() -> u64 {
        30
    }

    // Notification defaults
    pub fn notify_timeout() -> u64 {
        10
    }
    pub fn error_message_limit() -> usize {
        300
    }

    pub fn keep_recent() -> usize {
        3
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
