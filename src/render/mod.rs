//! Incremental rendering of a streamed answer into chat messages.
//!
//! The first fragment produces a placeholder message that is then edited in
//! place as text accumulates. Edits happen whenever the buffer reaches the
//! flush threshold, and the threshold grows after every in-place edit so long
//! answers cause fewer edits. No payload above [`MESSAGE_CHAR_LIMIT`] is ever
//! sent; text that would overflow continues in a new message.

pub mod code;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::chat_stream::{Fragment, StreamEnd};
use crate::core::constants::PLACEHOLDER_TEXT;
use crate::transport::{ChatId, FormatMode, MessageId, Transport, MESSAGE_CHAR_LIMIT};

pub const INITIAL_FLUSH_THRESHOLD: usize = 200;
pub const FLUSH_THRESHOLD_STEP: usize = 100;

/// Text as it goes over the wire, together with its format mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub text: String,
    pub mode: FormatMode,
}

impl Payload {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: FormatMode::Plain,
        }
    }

    /// Code is fenced and escaped for MarkdownV2; anything else stays verbatim.
    pub fn format(raw: &str) -> Self {
        if code::is_code(raw) {
            Self {
                text: code::fence_code(raw),
                mode: FormatMode::MarkdownV2,
            }
        } else {
            Self::plain(raw)
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn fits(&self) -> bool {
        self.char_len() <= MESSAGE_CHAR_LIMIT
    }
}

/// Byte index at which `raw` must be cut so the formatted head fits in one
/// message. Prefers cutting right after a newline.
fn split_point(raw: &str) -> usize {
    let fenced = code::is_code(raw);
    let mut budget = if fenced {
        MESSAGE_CHAR_LIMIT - code::fenced_char_len("")
    } else {
        MESSAGE_CHAR_LIMIT
    };

    let mut cut = 0;
    for (index, ch) in raw.char_indices() {
        let cost = if fenced && code::is_markdown_special(ch) {
            2
        } else {
            1
        };
        if cost > budget {
            break;
        }
        budget -= cost;
        cut = index + ch.len_utf8();
    }

    match raw[..cut].rfind('\n') {
        Some(newline) if newline > 0 => newline + 1,
        _ => cut,
    }
}

/// Counters describing what one render produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderStats {
    pub messages_sent: usize,
    pub edits: usize,
    pub threshold: usize,
    pub end: StreamEnd,
}

/// Turns the fragments of one generation into sends and edits against a chat.
pub struct IncrementalRenderer<'a> {
    transport: &'a dyn Transport,
    chat: ChatId,
    reply_to: Option<MessageId>,
    target: Option<MessageId>,
    started: bool,
    buffer: String,
    buffer_chars: usize,
    threshold: usize,
    last_payload: Option<Payload>,
    messages_sent: usize,
    edits: usize,
}

impl<'a> IncrementalRenderer<'a> {
    pub fn new(transport: &'a dyn Transport, chat: ChatId, reply_to: Option<MessageId>) -> Self {
        Self {
            transport,
            chat,
            reply_to,
            target: None,
            started: false,
            buffer: String::new(),
            buffer_chars: 0,
            threshold: INITIAL_FLUSH_THRESHOLD,
            last_payload: None,
            messages_sent: 0,
            edits: 0,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Consume fragments until the end marker arrives. A channel that closes
    /// without one is treated as a cancelled generation.
    pub async fn render(mut self, fragments: &mut mpsc::UnboundedReceiver<Fragment>) -> RenderStats {
        let end = loop {
            match fragments.recv().await {
                Some(Fragment::Chunk(text)) => self.push(&text).await,
                Some(Fragment::End(end)) => break end,
                None => break StreamEnd::Cancelled,
            }
        };
        self.finish().await;
        debug!(
            chat = self.chat,
            sent = self.messages_sent,
            edits = self.edits,
            threshold = self.threshold,
            "render finished"
        );
        RenderStats {
            messages_sent: self.messages_sent,
            edits: self.edits,
            threshold: self.threshold,
            end,
        }
    }

    pub async fn push(&mut self, fragment: &str) {
        if !self.started {
            self.started = true;
            self.send_placeholder().await;
        }
        self.buffer.push_str(fragment);
        self.buffer_chars += fragment.chars().count();

        if self.buffer_chars >= self.threshold && self.flush().await {
            self.threshold += FLUSH_THRESHOLD_STEP;
        }
    }

    /// Terminal flush; the threshold is left alone.
    pub async fn finish(&mut self) {
        if !self.buffer.is_empty() {
            self.flush().await;
        }
    }

    /// Write the buffer out. Returns true when it went into the current
    /// message as an in-place edit, false when it spilled into new messages.
    async fn flush(&mut self) -> bool {
        let payload = Payload::format(&self.buffer);
        if payload.fits() {
            let in_place = self.target.is_some();
            self.write_current(payload).await;
            return in_place;
        }

        while !Payload::format(&self.buffer).fits() {
            let cut = split_point(&self.buffer);
            let head = Payload::format(&self.buffer[..cut]);
            self.write_current(head).await;
            self.buffer.drain(..cut);
            self.target = None;
            self.last_payload = None;
        }
        self.buffer_chars = self.buffer.chars().count();
        if !self.buffer.is_empty() {
            let tail = Payload::format(&self.buffer);
            self.write_current(tail).await;
        }
        false
    }

    async fn send_placeholder(&mut self) {
        match self
            .transport
            .send_message(self.chat, PLACEHOLDER_TEXT, FormatMode::Plain, self.reply_to)
            .await
        {
            Ok(id) => {
                self.target = Some(id);
                self.last_payload = Some(Payload::plain(PLACEHOLDER_TEXT));
                self.messages_sent += 1;
            }
            Err(err) => {
                warn!(chat = self.chat, error = %err, "failed to send placeholder");
            }
        }
    }

    /// Edit the current target, or start a new message when there is none.
    async fn write_current(&mut self, payload: Payload) {
        let Some(message_id) = self.target else {
            self.send_new(payload).await;
            return;
        };
        if self.last_payload.as_ref() == Some(&payload) {
            return;
        }
        match self
            .transport
            .edit_message(self.chat, message_id, &payload.text, payload.mode)
            .await
        {
            Ok(()) => {
                self.edits += 1;
                self.last_payload = Some(payload);
            }
            Err(err) => {
                warn!(
                    chat = self.chat,
                    message_id,
                    error = %err,
                    "failed to edit message"
                );
            }
        }
    }

    async fn send_new(&mut self, payload: Payload) {
        match self
            .transport
            .send_message(self.chat, &payload.text, payload.mode, None)
            .await
        {
            Ok(id) => {
                self.target = Some(id);
                self.last_payload = Some(payload);
                self.messages_sent += 1;
            }
            Err(err) => {
                warn!(chat = self.chat, error = %err, "failed to send message");
            }
        }
    }
}
