//! Messaging front end: the outbound contract the relay writes through and the
//! inbound event model it reads from.

pub mod event;
pub mod telegram;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::fmt;
use tracing::warn;

pub use event::{ChatKind, CommandCall, InboundEvent, Sender};

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

/// Transport-side hard limit for one message body, in characters.
pub const MESSAGE_CHAR_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    Plain,
    MarkdownV2,
}

#[derive(Debug)]
pub enum TransportError {
    /// The request never produced a usable HTTP response.
    Http(String),
    /// The front end answered but refused the call.
    Api { code: i64, description: String },
    /// The response body did not match the expected shape.
    Decode(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Http(err) => write!(f, "transport request failed: {err}"),
            TransportError::Api { code, description } => {
                write!(f, "transport rejected request ({code}): {description}")
            }
            TransportError::Decode(err) => write!(f, "unexpected transport response: {err}"),
        }
    }
}

impl StdError for TransportError {}

/// Outbound operations against the messaging front end.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        mode: FormatMode,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError>;

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat: ChatId, message_id: MessageId)
        -> Result<(), TransportError>;

    async fn send_photo(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError>;
}

/// Best-effort plain notice; failures are logged and swallowed.
pub async fn send_notice(transport: &dyn Transport, chat: ChatId, text: &str) {
    if let Err(err) = transport
        .send_message(chat, text, FormatMode::Plain, None)
        .await
    {
        warn!(chat, error = %err, "failed to send notice");
    }
}
