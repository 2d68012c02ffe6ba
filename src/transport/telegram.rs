//! Telegram Bot API transport over long polling.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::event::{parse_command, entity_text, Entity, EntityKind};
use super::{
    ChatId, ChatKind, FormatMode, InboundEvent, MessageId, Sender, Transport, TransportError,
};
use crate::utils::url::construct_api_url;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
    length: usize,
}

#[derive(Deserialize)]
struct RawChat {
    id: ChatId,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RawMessage {
    message_id: MessageId,
    from: Option<BotUser>,
    chat: RawChat,
    text: Option<String>,
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    message: Option<RawMessage>,
}

impl RawUpdate {
    /// Text messages with a known sender become events; everything else is skipped.
    pub fn into_event(self) -> Option<InboundEvent> {
        let message = self.message?;
        let sender = message.from?;
        let text = message.text?;

        let entities: Vec<Entity> = message
            .entities
            .iter()
            .map(|raw| Entity {
                kind: match raw.kind.as_str() {
                    "mention" => EntityKind::Mention,
                    "bot_command" => EntityKind::BotCommand,
                    _ => EntityKind::Other,
                },
                offset: raw.offset,
                length: raw.length,
            })
            .collect();

        let mentions = entities
            .iter()
            .filter(|entity| entity.kind == EntityKind::Mention)
            .filter_map(|entity| entity_text(&text, entity))
            .collect();

        Some(InboundEvent {
            chat_id: message.chat.id,
            chat_kind: ChatKind::parse(&message.chat.kind),
            message_id: message.message_id,
            sender: Sender {
                id: sender.id,
                username: sender.username,
            },
            command: parse_command(&text, &entities),
            mentions,
            text,
        })
    }
}

pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramTransport {
    pub fn new(client: reqwest::Client, token: impl Into<String>) -> Self {
        Self::with_api_base(client, token, TELEGRAM_API_BASE)
    }

    pub fn with_api_base(
        client: reqwest::Client,
        token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        construct_api_url(&self.api_base, &format!("bot{}/{method}", self.token))
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        if !body.ok {
            return Err(TransportError::Api {
                code: body.error_code.unwrap_or_default(),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result
            .ok_or_else(|| TransportError::Decode("missing result".to_string()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
    ) -> Result<T, TransportError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.without_url().to_string()))?;
        Self::decode(response).await
    }

    pub async fn get_me(&self) -> Result<BotUser, TransportError> {
        self.call("getMe", &json!({})).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<RawUpdate>, TransportError> {
        let updates: Vec<RawUpdate> = self
            .call(
                "getUpdates",
                &json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;
        debug!(count = updates.len(), offset, "received updates");
        Ok(updates)
    }
}

fn parse_mode(mode: FormatMode) -> Option<&'static str> {
    match mode {
        FormatMode::Plain => None,
        FormatMode::MarkdownV2 => Some("MarkdownV2"),
    }
}

fn with_format(mut payload: Value, mode: FormatMode) -> Value {
    if let (Some(mode), Some(object)) = (parse_mode(mode), payload.as_object_mut()) {
        object.insert("parse_mode".to_string(), Value::from(mode));
    }
    payload
}

fn with_reply(mut payload: Value, reply_to: Option<MessageId>) -> Value {
    if let (Some(message_id), Some(object)) = (reply_to, payload.as_object_mut()) {
        object.insert(
            "reply_parameters".to_string(),
            json!({ "message_id": message_id, "allow_sending_without_reply": true }),
        );
    }
    payload
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        mode: FormatMode,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let payload = with_reply(
            with_format(json!({ "chat_id": chat, "text": text }), mode),
            reply_to,
        );
        let sent: SentMessage = self.call("sendMessage", &payload).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), TransportError> {
        let payload = with_format(
            json!({ "chat_id": chat, "message_id": message_id, "text": text }),
            mode,
        );
        // editMessageText answers with the message object, or `true` for inline messages
        let _: Value = self.call("editMessageText", &payload).await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat, "message_id": message_id }),
            )
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let photo = Part::bytes(png)
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|err| TransportError::Http(err.to_string()))?;
        let mut form = Form::new()
            .text("chat_id", chat.to_string())
            .part("photo", photo);
        if let Some(message_id) = reply_to {
            form = form.text("reply_to_message_id", message_id.to_string());
        }
        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|err| TransportError::Http(err.without_url().to_string()))?;
        let sent: SentMessage = Self::decode(response).await?;
        Ok(sent.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: &str) -> RawUpdate {
        serde_json::from_str(json).expect("update json")
    }

    #[test]
    fn converts_group_message_with_mention() {
        let raw = update(
            r#"{"update_id": 10, "message": {
                "message_id": 5,
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": -1001, "type": "supergroup"},
                "text": "@relay_bot what's new?",
                "entities": [{"type": "mention", "offset": 0, "length": 10}]
            }}"#,
        );
        assert_eq!(raw.update_id, 10);
        let event = raw.into_event().expect("event");
        assert_eq!(event.chat_id, -1001);
        assert!(event.chat_kind.is_group());
        assert_eq!(event.sender.id, 42);
        assert_eq!(event.sender.username.as_deref(), Some("alice"));
        assert_eq!(event.mentions, vec!["@relay_bot".to_string()]);
        assert!(event.mentions_user("Relay_Bot"));
        assert!(!event.is_command());
    }

    #[test]
    fn converts_command_message() {
        let raw = update(
            r#"{"update_id": 11, "message": {
                "message_id": 6,
                "from": {"id": 42},
                "chat": {"id": 42, "type": "private"},
                "text": "/pic a grey sky",
                "entities": [{"type": "bot_command", "offset": 0, "length": 4}]
            }}"#,
        );
        let event = raw.into_event().expect("event");
        let command = event.command.expect("command");
        assert_eq!(command.name, "pic");
        assert_eq!(command.args, "a grey sky");
        assert_eq!(event.sender.username, None);
    }

    #[test]
    fn skips_updates_without_text() {
        let raw = update(
            r#"{"update_id": 12, "message": {
                "message_id": 7,
                "from": {"id": 42},
                "chat": {"id": 42, "type": "private"}
            }}"#,
        );
        assert!(raw.into_event().is_none());
        assert!(update(r#"{"update_id": 13}"#).into_event().is_none());
    }

    #[test]
    fn method_url_embeds_token() {
        let transport =
            TelegramTransport::with_api_base(reqwest::Client::new(), "123:abc", "http://tg.local/");
        assert_eq!(
            transport.method_url("getMe"),
            "http://tg.local/bot123:abc/getMe"
        );
    }

    #[test]
    fn payload_helpers_add_optional_fields() {
        let payload = with_reply(
            with_format(json!({"chat_id": 1, "text": "x"}), FormatMode::MarkdownV2),
            Some(9),
        );
        assert_eq!(payload["parse_mode"], "MarkdownV2");
        assert_eq!(payload["reply_parameters"]["message_id"], 9);

        let plain = with_reply(with_format(json!({}), FormatMode::Plain), None);
        assert!(plain.get("parse_mode").is_none());
        assert!(plain.get("reply_parameters").is_none());
    }
}
