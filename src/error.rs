// src/error.rs

//! Unified error handling for the monitoring engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for webwatch operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request failed outside a site fetch
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Page could not be fetched or yielded no text
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Extracted content was empty after normalization
    #[error("Hash error: {0}")]
    Hash(String),

    /// Commit or transaction failure in the history store
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A single notification channel failed
    #[error("{channel} notification failed: {message}")]
    Notification { channel: String, message: String },

    /// Malformed cron expression
    #[error("Invalid schedule '{expression}': {message}")]
    ScheduleConfig { expression: String, message: String },
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a fetch error for a URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Create a notification error for a channel.
    pub fn notification(channel: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Notification {
            channel: channel.into(),
            message: message.to_string(),
        }
    }

    /// Create a schedule configuration error.
    pub fn schedule(expression: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::ScheduleConfig {
            expression: expression.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error is recorded against a site instead of propagated.
    pub fn is_check_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Hash(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_message() {
        let err = AppError::fetch("https://example.com", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "Fetch failed for https://example.com: HTTP 503"
        );
        assert!(err.is_check_failure());
    }

    #[test]
    fn test_persistence_is_not_check_failure() {
        assert!(!AppError::persistence("disk full").is_check_failure());
        assert!(AppError::Hash("empty".into()).is_check_failure());
    }
}
