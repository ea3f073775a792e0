//! Telegram Bot API client: `sendMessage` and `getUpdates` long polling.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::Notifier;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Seconds the server holds a `getUpdates` request open.
pub const LONG_POLL_SECS: u64 = 30;

/// Envelope around every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Bot API client bound to one bot token and one chat.
pub struct TelegramClient {
    client: Client,
    base_url: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(token: &str, chat_id: impl Into<String>) -> Result<Self> {
        Self::with_base_url(format!("{TELEGRAM_API_BASE}/bot{token}"), chat_id)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String, chat_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            chat_id: chat_id.into(),
        })
    }

    /// Chat the bot reports to and accepts commands from.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/sendMessage", self.base_url);
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let _: serde_json::Value = Self::parse(response, "sendMessage").await?;
        Ok(())
    }

    /// Updates after `offset`, waiting up to [`LONG_POLL_SECS`] for new ones.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let url = format!("{}/getUpdates", self.base_url);
        let mut query = vec![("timeout".to_string(), LONG_POLL_SECS.to_string())];
        if let Some(offset) = offset {
            query.push(("offset".to_string(), offset.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .timeout(Duration::from_secs(LONG_POLL_SECS) + DEFAULT_TIMEOUT)
            .send()
            .await
            .context("Failed to poll Telegram updates")?;

        let updates: Vec<Update> = Self::parse(response, "getUpdates").await?;
        debug!(count = updates.len(), "Telegram updates received");
        Ok(updates)
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, method: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read {method} response"))?;

        let parsed: ApiResponse<T> = serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse {method} response ({status})"))?;

        if !parsed.ok {
            anyhow::bail!(
                "Telegram {} failed: {} - {}",
                method,
                status,
                parsed.description.unwrap_or_default()
            );
        }
        parsed
            .result
            .with_context(|| format!("Telegram {method} returned no result"))
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, text: &str) -> bool {
        match self.send_message(&self.chat_id, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Telegram notification failed");
                false
            }
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_envelope_parses() {
        let body = r#"{"ok":true,"result":[
            {"update_id":101,"message":{"message_id":1,"chat":{"id":42,"type":"private"},"text":"/status"}},
            {"update_id":102,"edited_message":{}}
        ]}"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        assert!(parsed.ok);
        let updates = parsed.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 42);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/status"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_error_envelope_parses() {
        let body = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.description.as_deref(), Some("Unauthorized"));
    }

    #[tokio::test]
    async fn test_unreachable_api_reports_failure() {
        let client = TelegramClient::with_base_url("http://127.0.0.1:9".to_string(), "42").unwrap();
        assert!(!client.send("hello").await);
        assert_eq!(client.chat_id(), "42");
    }
}
