//! Telegram channel: one Bot API `sendMessage` call per chunk.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{ChannelConnector, ChannelKind};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Stateless Telegram connector backed by the Bot API.
pub struct TelegramChannel {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the connector at a different Bot API host (local stub, proxy).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn transport_failure(reason: impl Into<String>) -> ChannelError {
        ChannelError::TransportFailure {
            name: ChannelKind::Telegram.to_string(),
            reason: reason.into(),
        }
    }

    /// Check the bot token with `getMe`.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| Self::transport_failure(e.without_url().to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::transport_failure(format!(
                "getMe returned {}",
                resp.status()
            )))
        }
    }

    /// Send a single message chunk, Markdown first with plain-text fallback.
    async fn send_message_chunk(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| Self::transport_failure(e.without_url().to_string()))?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| Self::transport_failure(e.without_url().to_string()))?;

        if !plain_resp.status().is_success() {
            let plain_status = plain_resp.status();
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(Self::transport_failure(format!(
                "sendMessage failed (markdown: {markdown_status}, plain: {plain_status} {plain_err})"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ChannelConnector for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        let chat_id = parse_chat_id(destination)?;
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        tracing::debug!(chat_id, "Telegram message delivered");
        Ok(())
    }
}

/// Chat ids are integers; group chats are negative.
fn parse_chat_id(destination: &str) -> Result<i64, ChannelError> {
    destination
        .trim()
        .parse::<i64>()
        .map_err(|_| ChannelError::InvalidDestination {
            name: ChannelKind::Telegram.to_string(),
            destination: destination.to_string(),
        })
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset of the max_len-th char, so cuts never land inside a code point.
        let Some((limit, _)) = remaining.char_indices().nth(max_len) else {
            chunks.push(remaining.to_string());
            break;
        };

        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
