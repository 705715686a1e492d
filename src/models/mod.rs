// src/models/mod.rs

//! Domain models for the monitoring engine.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod check;
mod config;
mod site;
mod user;

// Re-export all public types
pub use check::{CheckRecord, CheckStatus};
pub use config::{
    Config, FetcherConfig, LoggingConfig, NotificationsConfig, RetentionConfig, SchedulerConfig,
    SmtpConfig, SmtpSettings,
};
pub use site::{MonitoredSite, SiteStatus};
pub use user::{DEFAULT_SCHEDULE, NotificationSettings, SCHEDULE_SLOTS, ScheduleSlots, User};

/// Identifier of a user account.
pub type UserId = i64;
