// src/config.rs

//! Configuration loading utilities.
//!
//! Loads `config.toml` from the storage directory and overlays credentials
//! from the environment, so secrets never have to live in the file.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Environment variables read by [`apply_env_overrides`].
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
pub const ENV_SMTP_SERVER: &str = "SMTP_SERVER";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";
pub const ENV_SMTP_USERNAME: &str = "SMTP_USERNAME";
pub const ENV_SMTP_PASSWORD: &str = "SMTP_PASSWORD";
pub const ENV_SENDER_EMAIL: &str = "SENDER_EMAIL";

/// Load configuration from a TOML file.
///
/// Falls back to defaults if loading fails.
pub fn load_config(path: &Path) -> Config {
    Config::load_or_default(path)
}

/// Load configuration, overlay the process environment and validate.
pub fn load_all(storage_dir: &Path) -> Result<Config> {
    let mut config = load_config(&storage_dir.join("config.toml"));
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Overlay notification credentials from an environment lookup.
///
/// Blank values are ignored. An unparsable `SMTP_PORT` is logged and skipped.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let notifications = &mut config.notifications;

    if let Some(token) = get(ENV_TELEGRAM_BOT_TOKEN) {
        notifications.telegram_bot_token = Some(token);
    }
    if let Some(chat_id) = get(ENV_TELEGRAM_CHAT_ID) {
        notifications.telegram_chat_id = Some(chat_id);
    }

    let smtp = &mut notifications.smtp;
    if let Some(host) = get(ENV_SMTP_SERVER) {
        smtp.host = Some(host);
    }
    if let Some(port) = get(ENV_SMTP_PORT) {
        match port.trim().parse::<u16>() {
            Ok(port) => smtp.port = Some(port),
            Err(e) => log::warn!("Ignoring {ENV_SMTP_PORT}={port:?}: {e}"),
        }
    }
    if let Some(username) = get(ENV_SMTP_USERNAME) {
        smtp.username = Some(username);
    }
    if let Some(password) = get(ENV_SMTP_PASSWORD) {
        smtp.password = Some(password);
    }
    if let Some(sender) = get(ENV_SENDER_EMAIL) {
        smtp.sender = Some(sender);
    }
}
