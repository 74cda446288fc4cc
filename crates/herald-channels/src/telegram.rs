//! Telegram channel adapter for Herald.
//!
//! Uses the Bot API long-polling (`getUpdates` with `timeout=25`) to receive
//! messages, `sendMessage` (HTML parse mode) for text and `sendPhoto` for
//! images by URL. Messages are split into 4096-character chunks to comply
//! with Telegram's limit.

use std::time::Duration;

use async_trait::async_trait;
use herald_core::{Outbox, SendMessage, SendPhoto};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::traits::{Channel, ChannelMessage};

const MAX_MESSAGE_LEN: usize = 4096;

/// Split a long message into ≤4096-character chunks, preferring newline
/// boundaries.
pub fn split_message(text: &str) -> Vec<String> {
    if text.chars().count() <= MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + MAX_MESSAGE_LEN).min(chars.len());
        let window = &chars[start..end];
        let split_at = if end < chars.len() {
            window
                .iter()
                .rposition(|c| *c == '\n')
                .map(|p| p + 1)
                .unwrap_or(window.len())
        } else {
            window.len()
        };
        chunks.push(chars[start..start + split_at].iter().collect());
        start += split_at;
    }
    chunks
}

pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> anyhow::Result<Self> {
        Ok(Self {
            bot_token: config.bot_token,
            api_base: config.api_base,
            client: Client::builder().timeout(Duration::from_secs(35)).build()?,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call(&self, method: &str, body: &Value) -> anyhow::Result<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() || json.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = json
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| preview(&text));
            anyhow::bail!("telegram {method} failed ({status}): {description}");
        }
        Ok(json)
    }

    /// The bot's own `@username`, without the `@`, from `getMe`.
    pub async fn bot_username(&self) -> anyhow::Result<String> {
        let json = self.call("getMe", &serde_json::json!({})).await?;
        username_from_get_me(&json).ok_or_else(|| anyhow::anyhow!("getMe returned no username"))
    }
}

fn username_from_get_me(json: &Value) -> Option<String> {
    json.get("result")?
        .get("username")?
        .as_str()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Attach `reply_to_message_id` when the id is numeric.
fn with_reply(mut body: Value, reply_to: Option<&str>) -> Value {
    if let Some(id) = reply_to.and_then(|id| id.parse::<i64>().ok()) {
        body["reply_to_message_id"] = Value::from(id);
        body["allow_sending_without_reply"] = Value::from(true);
    }
    body
}

fn preview(body: &str) -> String {
    if body.chars().count() > 320 {
        let truncated: String = body.chars().take(320).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

/// Convert one `getUpdates` entry into a [`ChannelMessage`]. Non-text
/// updates yield `None`.
fn parse_update(update: &Value) -> Option<ChannelMessage> {
    let msg = update.get("message")?;
    let text = msg.get("text").and_then(Value::as_str)?;
    if text.trim().is_empty() {
        return None;
    }

    let chat_id = msg["chat"]["id"].as_i64()?.to_string();
    let message_id = msg["message_id"].as_i64().unwrap_or(0).to_string();

    // Sender (display/trace identity) prefers @username, then first_name, then numeric ID.
    let sender = msg["from"]["username"]
        .as_str()
        .map(|u| format!("@{u}"))
        .or_else(|| msg["from"]["first_name"].as_str().map(str::to_string))
        .or_else(|| msg["from"]["id"].as_i64().map(|id| id.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let timestamp = msg["date"]
        .as_i64()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(chrono::Utc::now);

    Some(ChannelMessage {
        id: message_id,
        sender,
        reply_target: chat_id,
        content: text.to_string(),
        channel: "telegram".to_string(),
        timestamp,
    })
}

#[async_trait]
impl Outbox for TelegramChannel {
    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        let mut reply_to = message.reply_to.as_deref();
        for chunk in split_message(&message.content) {
            let body = serde_json::json!({
                "chat_id": message.recipient,
                "text": chunk,
                "parse_mode": "HTML",
            });
            // Only the first chunk threads under the original message.
            self.call("sendMessage", &with_reply(body, reply_to.take()))
                .await?;
        }
        debug!("telegram: sent message to {}", message.recipient);
        Ok(())
    }

    async fn send_photo(&self, photo: &SendPhoto) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": photo.recipient,
            "photo": photo.url,
        });
        self.call("sendPhoto", &with_reply(body, photo.reply_to.as_deref()))
            .await?;
        debug!("telegram: sent photo to {}", photo.recipient);
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;
        loop {
            let resp = self
                .client
                .get(self.api_url("getUpdates"))
                .query(&[
                    ("timeout", "25"),
                    ("offset", &offset.to_string()),
                    ("allowed_updates", r#"["message"]"#),
                ])
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    warn!("telegram poll error: {e:?}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!("telegram getUpdates failed ({status}): {}", preview(&body));
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }

            let json: Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    warn!("telegram json parse error: {e}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            let updates = match json.get("result").and_then(|r| r.as_array()) {
                Some(u) => u.clone(),
                None => {
                    debug!("telegram: no result array");
                    continue;
                }
            };

            for update in &updates {
                let update_id = update["update_id"].as_i64().unwrap_or(0);
                offset = offset.max(update_id + 1);

                let Some(channel_msg) = parse_update(update) else {
                    continue;
                };

                if tx.send(channel_msg).await.is_err() {
                    return Ok(()); // receiver dropped, shutting down
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self.call("getMe", &serde_json::json!({})).await {
            Ok(_) => true,
            Err(e) => {
                warn!("telegram health check failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_message() {
        let msg = "Hello, world!";
        assert_eq!(split_message(msg), vec![msg.to_string()]);
    }

    #[test]
    fn test_split_long_message() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= MAX_MESSAGE_LEN);
        }
        assert_eq!(chunks.join(""), msg);
    }

    #[test]
    fn test_split_prefers_newlines_and_respects_multibyte() {
        let line = format!("{}\n", "é".repeat(99));
        let msg = line.repeat(60);
        let chunks = split_message(&msg);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= MAX_MESSAGE_LEN);
            assert!(chunk.ends_with('\n'));
        }
        assert_eq!(chunks.concat(), msg);
    }

    #[test]
    fn api_url_uses_configured_base() {
        let channel = TelegramChannel::new(TelegramConfig {
            bot_token: "123:abc".to_string(),
            api_base: "http://localhost:8081".to_string(),
        })
        .unwrap();
        assert_eq!(
            channel.api_url("sendMessage"),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn reply_id_is_attached_only_when_numeric() {
        let body = with_reply(serde_json::json!({"chat_id": "-1"}), Some("17"));
        assert_eq!(body["reply_to_message_id"], 17);

        let body = with_reply(serde_json::json!({"chat_id": "-1"}), Some("abc"));
        assert!(body.get("reply_to_message_id").is_none());

        let body = with_reply(serde_json::json!({"chat_id": "-1"}), None);
        assert!(body.get("reply_to_message_id").is_none());
    }

    #[test]
    fn parse_update_extracts_text_messages() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 55,
                "date": 1735689600,
                "chat": {"id": -1009876543210_i64, "type": "supergroup"},
                "from": {"id": 7, "first_name": "Rina", "username": "rina"},
                "text": "berapa harga?"
            }
        });
        let msg = parse_update(&update).unwrap();
        assert_eq!(msg.id, "55");
        assert_eq!(msg.reply_target, "-1009876543210");
        assert_eq!(msg.sender, "@rina");
        assert_eq!(msg.content, "berapa harga?");
        assert_eq!(msg.timestamp.timestamp(), 1735689600);
    }

    #[test]
    fn parse_update_skips_non_text() {
        let photo_only = serde_json::json!({
            "update_id": 11,
            "message": {"message_id": 56, "chat": {"id": 1}, "photo": []}
        });
        assert!(parse_update(&photo_only).is_none());

        let edited = serde_json::json!({"update_id": 12, "edited_message": {"text": "x"}});
        assert!(parse_update(&edited).is_none());
    }

    #[test]
    fn username_is_read_from_get_me() {
        let me = serde_json::json!({
            "ok": true,
            "result": {"id": 42, "is_bot": true, "username": "herald_bot"}
        });
        assert_eq!(username_from_get_me(&me).as_deref(), Some("herald_bot"));

        let anonymous = serde_json::json!({"ok": true, "result": {"id": 42}});
        assert_eq!(username_from_get_me(&anonymous), None);
    }
}
