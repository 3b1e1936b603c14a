//! Telegram provider: send messages via Bot API and receive commands via getUpdates.

use crate::models::{DestinationId, NotificationPayload, DEFAULT_PARSE_MODE};
use crate::server::providers::{ChatCommand, CommandSource, NotificationSink, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use thiserror::Error;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT_SECS: u64 = 30;

/// Errors returned by Bot API calls
#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Transport(reqwest::Error),

    #[error("Telegram API error {error_code}: {description}{}", retry_hint(.retry_after))]
    Api {
        error_code: i64,
        description: String,
        /// Seconds Telegram asks us to wait (flood control)
        retry_after: Option<u64>,
    },

    #[error("Unexpected Telegram response (HTTP {status}): {body}")]
    Unexpected { status: u16, body: String },
}

fn retry_hint(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    }
}

impl From<reqwest::Error> for TelegramError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL embeds the bot token
        TelegramError::Transport(err.without_url())
    }
}

/// Bot account returned by getMe
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

// --- Bot API envelopes ---

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Deserialize)]
struct SentMessage {
    #[allow(dead_code)]
    message_id: i64,
}

#[derive(Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
}

/// Bot API client. Shared by the delivery engine (sendMessage) and the
/// discovery responder (getUpdates + sendMessage). Never logs the token.
pub struct TelegramClient {
    token: String,
    poll_timeout: Duration,
    client: Client,
    /// Next offset for getUpdates (last_update_id + 1).
    next_offset: AtomicI64,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            poll_timeout: Duration::from_secs(LONG_POLL_TIMEOUT_SECS),
            client: Client::new(),
            next_offset: AtomicI64::new(0),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(params)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        parse_response(status.as_u16(), &body)
    }

    /// Fetch the bot's own account.
    pub async fn get_me(&self) -> Result<BotIdentity, TelegramError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Send one message built from `sendMessage` parameters.
    pub async fn send_message(&self, params: &serde_json::Value) -> Result<(), TelegramError> {
        let _sent: SentMessage = self.call("sendMessage", params).await?;
        Ok(())
    }

    /// Long poll getUpdates, advancing the offset past everything returned.
    async fn get_updates(&self) -> Result<Vec<ChatCommand>, TelegramError> {
        let offset = self.next_offset.load(Ordering::Relaxed);
        let params = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message"],
        });
        let updates: Vec<TelegramUpdate> = self.call("getUpdates", &params).await?;
        if let Some(last) = updates.last() {
            self.next_offset.store(last.update_id + 1, Ordering::Relaxed);
        }
        Ok(commands_from_updates(updates))
    }
}

fn parse_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, TelegramError> {
    let envelope: ApiResponse<T> =
        serde_json::from_str(body).map_err(|_| TelegramError::Unexpected {
            status,
            body: body.chars().take(200).collect(),
        })?;

    match (envelope.ok, envelope.result) {
        (true, Some(result)) => Ok(result),
        (true, None) => Err(TelegramError::Unexpected {
            status,
            body: "ok response without result".to_string(),
        }),
        (false, _) => Err(TelegramError::Api {
            error_code: envelope.error_code.unwrap_or(i64::from(status)),
            description: envelope
                .description
                .unwrap_or_else(|| "no description".to_string()),
            retry_after: envelope.parameters.and_then(|p| p.retry_after),
        }),
    }
}

fn commands_from_updates(updates: Vec<TelegramUpdate>) -> Vec<ChatCommand> {
    updates
        .into_iter()
        .filter_map(|update| update.message)
        .filter_map(|message| {
            message.text.map(|text| ChatCommand {
                chat_id: message.chat.id,
                text,
            })
        })
        .collect()
}

#[async_trait]
impl NotificationSink for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(
        &self,
        destination: &DestinationId,
        payload: &NotificationPayload,
    ) -> Result<(), ProviderError> {
        self.send_message(&payload.send_message_params(destination))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CommandSource for TelegramClient {
    async fn next_commands(&self) -> Result<Vec<ChatCommand>, ProviderError> {
        Ok(self.get_updates().await?)
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), ProviderError> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": DEFAULT_PARSE_MODE,
        });
        self.send_message(&params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_response() {
        let me: BotIdentity = parse_response(
            200,
            r#"{"ok":true,"result":{"id":42,"is_bot":true,"first_name":"Pinger","username":"pinger_bot"}}"#,
        )
        .unwrap();
        assert_eq!(me.id, 42);
        assert_eq!(me.username.as_deref(), Some("pinger_bot"));
    }

    #[test]
    fn test_parse_api_error() {
        let err = parse_response::<BotIdentity>(
            429,
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#,
        )
        .unwrap_err();
        match err {
            TelegramError::Api {
                error_code,
                retry_after,
                ..
            } => {
                assert_eq!(error_code, 429);
                assert_eq!(retry_after, Some(5));
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_api_error_display_mentions_flood_wait() {
        let err = TelegramError::Api {
            error_code: 429,
            description: "Too Many Requests".to_string(),
            retry_after: Some(7),
        };
        assert_eq!(
            err.to_string(),
            "Telegram API error 429: Too Many Requests (retry after 7s)"
        );

        let err = TelegramError::Api {
            error_code: 400,
            description: "Bad Request: can't parse entities".to_string(),
            retry_after: None,
        };
        assert_eq!(
            err.to_string(),
            "Telegram API error 400: Bad Request: can't parse entities"
        );
    }

    #[test]
    fn test_parse_non_json_response() {
        let err = parse_response::<BotIdentity>(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, TelegramError::Unexpected { status: 502, .. }));
    }

    #[test]
    fn test_commands_from_updates_skips_non_text() {
        let updates: Vec<TelegramUpdate> = serde_json::from_str(
            r#"[
                {"update_id": 1, "message": {"message_id": 10, "chat": {"id": 7, "type": "private"}, "text": "/start"}},
                {"update_id": 2, "message": {"message_id": 11, "chat": {"id": 7, "type": "private"}}},
                {"update_id": 3, "edited_message": {"message_id": 12}}
            ]"#,
        )
        .unwrap();
        let commands = commands_from_updates(updates);
        assert_eq!(
            commands,
            vec![ChatCommand {
                chat_id: 7,
                text: "/start".to_string()
            }]
        );
    }

    #[test]
    fn test_method_url_and_name() {
        let client = TelegramClient::new("123:abc".into());
        assert_eq!(
            client.method_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
        assert_eq!(client.name(), "telegram");
    }
}
