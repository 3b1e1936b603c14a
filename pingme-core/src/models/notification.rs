//! Notification data structures: destination handle and payloads

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Parse mode applied when a payload does not choose its own.
pub const DEFAULT_PARSE_MODE: &str = "HTML";

/// Longest payload preview written to logs.
const PREVIEW_CHARS: usize = 64;

/// Errors that can occur while parsing a destination identifier
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DestinationError {
    #[error("Destination identifier is empty")]
    Empty,

    #[error("Destination identifier must be a numeric chat id or an @username: {0}")]
    Malformed(String),
}

/// Chat the relay delivers into.
///
/// Telegram addresses a chat either by its numeric id (negative for groups)
/// or, for public channels, by `@username`.
///
/// Deserializes from a JSON/TOML integer or from a string, which goes
/// through the same validation as the `CHAT_ID` environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum DestinationId {
    Chat(i64),
    Username(String),
}

impl<'de> Deserialize<'de> for DestinationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Chat(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Chat(id) => Ok(DestinationId::Chat(id)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

impl DestinationId {
    /// Returns true for handles Telegram can never resolve (`0`, bare `@`).
    pub fn is_unset(&self) -> bool {
        match self {
            DestinationId::Chat(id) => *id == 0,
            DestinationId::Username(name) => name.trim_start_matches('@').is_empty(),
        }
    }
}

impl FromStr for DestinationId {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DestinationError::Empty);
        }

        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(DestinationId::Chat(id));
        }

        let valid_username = trimmed.len() > 1
            && trimmed.starts_with('@')
            && trimmed[1..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid_username {
            Ok(DestinationId::Username(trimmed.to_string()))
        } else {
            Err(DestinationError::Malformed(trimmed.to_string()))
        }
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationId::Chat(id) => write!(f, "{}", id),
            DestinationId::Username(name) => f.write_str(name),
        }
    }
}

/// One element of an ingestion batch.
///
/// The relay does not validate payload shape. A JSON string is the message
/// text, a JSON object is used as the `sendMessage` parameter set, and any
/// other value is forwarded as `text` untouched so the API decides whether
/// it is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPayload(Value);

impl NotificationPayload {
    /// Plain text payload rendered with the default parse mode.
    pub fn text(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    /// Build the `sendMessage` parameters for this payload.
    ///
    /// `chat_id` always comes from the configured destination; a payload
    /// cannot redirect delivery elsewhere.
    pub fn send_message_params(&self, destination: &DestinationId) -> Value {
        let mut params = match &self.0 {
            Value::Object(fields) => fields.clone(),
            other => {
                let mut fields = Map::new();
                fields.insert("text".to_string(), other.clone());
                fields
            }
        };
        params
            .entry("parse_mode")
            .or_insert_with(|| Value::String(DEFAULT_PARSE_MODE.to_string()));
        params.insert(
            "chat_id".to_string(),
            serde_json::to_value(destination).unwrap_or(Value::Null),
        );
        Value::Object(params)
    }

    /// Short single-line rendering for log fields.
    pub fn preview(&self) -> String {
        let text = match &self.0 {
            Value::String(s) => s.clone(),
            Value::Object(fields) => match fields.get("text") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => self.0.to_string(),
            },
            other => other.to_string(),
        };
        let single_line = text.replace('\n', " ");
        if single_line.chars().count() > PREVIEW_CHARS {
            let cut: String = single_line.chars().take(PREVIEW_CHARS).collect();
            format!("{}…", cut)
        } else {
            single_line
        }
    }
}

impl From<&str> for NotificationPayload {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for NotificationPayload {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_payload(value: Value) -> NotificationPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_destination() {
        assert_eq!(
            "123456".parse::<DestinationId>(),
            Ok(DestinationId::Chat(123456))
        );
        assert_eq!(
            " -1001234567890 ".parse::<DestinationId>(),
            Ok(DestinationId::Chat(-1001234567890))
        );
        assert_eq!(
            "@build_alerts".parse::<DestinationId>(),
            Ok(DestinationId::Username("@build_alerts".to_string()))
        );

        assert_eq!("".parse::<DestinationId>(), Err(DestinationError::Empty));
        assert!(matches!(
            "build alerts".parse::<DestinationId>(),
            Err(DestinationError::Malformed(_))
        ));
        assert!(matches!(
            "@".parse::<DestinationId>(),
            Err(DestinationError::Malformed(_))
        ));
    }

    #[test]
    fn test_destination_unset() {
        assert!(DestinationId::Chat(0).is_unset());
        assert!(DestinationId::Username("@".to_string()).is_unset());
        assert!(!DestinationId::Chat(-42).is_unset());
    }

    #[test]
    fn test_destination_serializes_as_telegram_expects() {
        assert_eq!(serde_json::to_value(DestinationId::Chat(42)).unwrap(), json!(42));
        assert_eq!(
            serde_json::to_value(DestinationId::Username("@ops".into())).unwrap(),
            json!("@ops")
        );
        let parsed: DestinationId = serde_json::from_value(json!(-7)).unwrap();
        assert_eq!(parsed, DestinationId::Chat(-7));
    }

    #[test]
    fn test_destination_strings_are_validated() {
        let numeric: DestinationId = serde_json::from_value(json!("-100123")).unwrap();
        assert_eq!(numeric, DestinationId::Chat(-100123));

        let channel: DestinationId = serde_json::from_value(json!("@ops")).unwrap();
        assert_eq!(channel, DestinationId::Username("@ops".to_string()));

        assert!(serde_json::from_value::<DestinationId>(json!("bad name")).is_err());
        assert!(serde_json::from_value::<DestinationId>(json!("")).is_err());
    }

    #[test]
    fn test_string_payload_params() {
        let payload = NotificationPayload::text("<b>build passed</b>");
        let params = payload.send_message_params(&DestinationId::Chat(42));
        assert_eq!(
            params,
            json!({
                "chat_id": 42,
                "text": "<b>build passed</b>",
                "parse_mode": "HTML",
            })
        );
    }

    #[test]
    fn test_object_payload_keeps_its_options() {
        let payload = json_payload(json!({
            "text": "*done*",
            "parse_mode": "MarkdownV2",
            "disable_notification": true,
            "chat_id": 999,
        }));
        let params = payload.send_message_params(&DestinationId::Chat(42));
        assert_eq!(params["chat_id"], json!(42));
        assert_eq!(params["parse_mode"], json!("MarkdownV2"));
        assert_eq!(params["disable_notification"], json!(true));
        assert_eq!(params["text"], json!("*done*"));
    }

    #[test]
    fn test_non_text_payload_is_forwarded_verbatim() {
        let payload = json_payload(json!([1, 2]));
        let params = payload.send_message_params(&DestinationId::Chat(1));
        assert_eq!(params["text"], json!([1, 2]));
    }

    #[test]
    fn test_batch_deserializes_mixed_elements() {
        let batch: Vec<NotificationPayload> =
            serde_json::from_str(r#"["hello", {"text": "world"}, 3]"#).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], NotificationPayload::text("hello"));
        assert_eq!(serde_json::to_value(&batch[2]).unwrap(), json!(3));
    }

    #[test]
    fn test_preview_truncates_and_flattens() {
        let long = format!("line one\n{}", "x".repeat(100));
        let preview = NotificationPayload::text(long).preview();
        assert!(!preview.contains('\n'));
        assert!(preview.ends_with('…'));
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 1);

        let object = json_payload(json!({"text": "short"}));
        assert_eq!(object.preview(), "short");
    }
}
