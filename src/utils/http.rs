// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::FetcherConfig;

/// Build the browser-like header set sent with every page fetch.
pub fn browser_headers(config: &FetcherConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, header_value("accept", &config.accept)?);
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header_value("accept_language", &config.accept_language)?,
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    Ok(headers)
}

/// Create a configured asynchronous HTTP client for page fetches.
pub fn create_async_client(config: &FetcherConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(browser_headers(config)?)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Create a client for outbound notification APIs.
pub fn create_api_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("webwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::config(format!("fetcher.{field} is not a valid header: {e}")))
}
