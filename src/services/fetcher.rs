// src/services/fetcher.rs

//! Page fetcher service.
//!
//! Downloads a monitored page with a browser identity and reduces it to
//! readable text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::FetcherConfig;
use crate::services::extract::ContentExtractor;
use crate::utils::http;

/// Source of page text for the check pipeline.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch `url` and return its readable text.
    ///
    /// Every failure is reported as [`AppError::Fetch`].
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// HTTP implementation of [`PageSource`].
pub struct ContentFetcher {
    client: Client,
    extractor: ContentExtractor,
    timeout: Duration,
}

impl ContentFetcher {
    /// Create a fetcher with the given configuration.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_async_client(config)?,
            extractor: ContentExtractor::new()?,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Download the raw HTML, failing on transport errors and non-2xx statuses.
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::fetch(url, format!("HTTP status {status}")));
        }

        response.text().await.map_err(|e| self.request_error(url, e))
    }

    fn request_error(&self, url: &str, error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::fetch(
                url,
                format!("timeout after {}s: {error}", self.timeout.as_secs()),
            )
        } else {
            AppError::fetch(url, error)
        }
    }
}

#[async_trait]
impl PageSource for ContentFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        log::info!("Fetching content from {url}");
        let html = self.fetch_html(url).await?;

        let content = self
            .extractor
            .extract(&html)
            .ok_or_else(|| AppError::fetch(url, "no text content could be extracted"))?;

        log::info!(
            "Fetched content from {url} (length: {})",
            content.chars().count()
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve exactly one HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{addr}/page")
    }

    /// Accept a connection and never answer.
    async fn serve_silence() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        format!("http://{addr}/slow")
    }

    fn fetcher(timeout_secs: u64) -> ContentFetcher {
        ContentFetcher::new(&FetcherConfig {
            timeout_secs,
            ..FetcherConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_extracts_text() {
        let url = serve_once("200 OK", "<html><body><h1>Menu</h1><p>Soup of the day</p></body></html>").await;
        let text = fetcher(5).fetch_text(&url).await.unwrap();
        assert_eq!(text, "Menu Soup of the day");
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let url = serve_once("503 Service Unavailable", "<p>down</p>").await;
        let err = fetcher(5).fetch_text(&url).await.unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_empty_page_is_fetch_error() {
        let url = serve_once("200 OK", "<html><body><script>x()</script></body></html>").await;
        let err = fetcher(5).fetch_text(&url).await.unwrap_err();
        assert!(err.to_string().contains("no text content"));
    }

    #[tokio::test]
    async fn test_timeout_names_the_timeout() {
        let url = serve_silence().await;
        let err = fetcher(1).fetch_text(&url).await.unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
        assert!(err.to_string().contains("timeout after 1s"));
    }
}
