use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::alerts::{OutboundMessage, ParseMode};

pub const DEFAULT_TELEGRAM_API_BASE_URL: &str = "https://api.telegram.org";

/// Delivers formatted alerts to a chat channel
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, message: &OutboundMessage) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API client (`sendMessage` only)
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    bot_token: String,
}

impl TelegramClient {
    pub fn new(client: Client, base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: &message.chat_id,
            text: &message.text,
            parse_mode: match message.parse_mode {
                ParseMode::Markdown => "Markdown",
            },
        };

        // The bot token is part of the URL, so reqwest errors are stripped of it
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("Failed to send request to Telegram")?;

        let status = response.status();
        let body: Option<ApiResponse> = response.json().await.ok();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = body
                .as_ref()
                .and_then(|b| b.parameters.as_ref())
                .and_then(|p| p.retry_after);
            warn!(retry_after_secs = ?retry_after, "Rate limited by Telegram API");
            return Err(anyhow!("Rate limited by Telegram API"));
        }

        match body {
            Some(body) if status.is_success() && body.ok => {
                debug!(chat_id = %message.chat_id, "Telegram message sent");
                Ok(())
            }
            Some(body) => Err(anyhow!(
                "Telegram API error {}: {}",
                status,
                body.description.unwrap_or_default()
            )),
            None => Err(anyhow!("Telegram API error {}: unreadable response", status)),
        }
    }
}
