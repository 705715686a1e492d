// src/services/telegram.rs

//! Telegram Bot API transport.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::services::notifier::ChatTransport;

const API_BASE: &str = "https://api.telegram.org";

/// Sends messages through the Bot API `sendMessage` method.
#[derive(Clone)]
pub struct TelegramTransport {
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramTransport {
    pub fn new(client: Client) -> Self {
        Self::with_api_base(client, API_BASE)
    }

    /// Point the transport at a different API host.
    pub fn with_api_base(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, token, method)
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.method_url(token, "sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::notification("telegram", format!("sendMessage failed: {e}")))?;

        let status = response.status();
        let result: ApiResponse = response.json().await.map_err(|e| {
            AppError::notification("telegram", format!("invalid response ({status}): {e}"))
        })?;

        if !result.ok {
            return Err(AppError::notification(
                "telegram",
                result
                    .description
                    .unwrap_or_else(|| format!("API returned {status}")),
            ));
        }
        Ok(())
    }
}
