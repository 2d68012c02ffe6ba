#[cfg(test)]
use crate::api::ChatRequest;
#[cfg(test)]
use crate::core::backend::{sse_chunks, BackendError, ChatBackend, ChunkStream, StreamChunk};
#[cfg(test)]
use crate::core::store::lock_unpoisoned;
#[cfg(test)]
use crate::transport::{ChatId, FormatMode, MessageId, Transport, TransportError};
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;
#[cfg(test)]
use tokio::sync::mpsc;

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Send {
        chat: ChatId,
        id: MessageId,
        text: String,
        mode: FormatMode,
        reply_to: Option<MessageId>,
    },
    Edit {
        chat: ChatId,
        id: MessageId,
        text: String,
        mode: FormatMode,
    },
    Delete {
        chat: ChatId,
        id: MessageId,
    },
    Photo {
        chat: ChatId,
        id: MessageId,
        bytes: usize,
        reply_to: Option<MessageId>,
    },
}

/// Transport double that records every call and hands out increasing ids.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    next_id: Mutex<MessageId>,
    fail_edits: Mutex<bool>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_edits(&self, fail: bool) {
        *lock_unpoisoned(&self.fail_edits) = fail;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock_unpoisoned(&self.calls).clone()
    }

    /// Texts of every sent message, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edit_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Latest text shown for `id`, following edits.
    pub fn displayed_text(&self, id: MessageId) -> Option<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send { id: sent, text, .. } if sent == id => Some(text),
                TransportCall::Edit { id: edited, text, .. } if edited == id => Some(text),
                _ => None,
            })
            .last()
    }

    fn next_id(&self) -> MessageId {
        let mut next = lock_unpoisoned(&self.next_id);
        *next += 1;
        *next
    }

    fn record(&self, call: TransportCall) {
        lock_unpoisoned(&self.calls).push(call);
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        mode: FormatMode,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let id = self.next_id();
        self.record(TransportCall::Send {
            chat,
            id,
            text: text.to_string(),
            mode,
            reply_to,
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        mode: FormatMode,
    ) -> Result<(), TransportError> {
        if *lock_unpoisoned(&self.fail_edits) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: can't parse entities".to_string(),
            });
        }
        self.record(TransportCall::Edit {
            chat,
            id: message_id,
            text: text.to_string(),
            mode,
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Delete {
            chat,
            id: message_id,
        });
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        let id = self.next_id();
        self.record(TransportCall::Photo {
            chat,
            id,
            bytes: png.len(),
            reply_to,
        });
        Ok(id)
    }
}

/// How the scripted backend answers one `stream_complete` call.
#[cfg(test)]
pub enum Script {
    /// Emit these items, then close the connection.
    Chunks(Vec<Result<StreamChunk, BackendError>>),
    /// Refuse the request outright.
    Reject(BackendError),
    /// Raw server-sent event bytes, decoded like a real response body.
    Sse(Vec<String>),
    /// Items arrive whenever the test pushes them.
    Live(mpsc::UnboundedReceiver<Result<StreamChunk, BackendError>>),
}

#[cfg(test)]
impl Script {
    /// Answer `parts` as text chunks followed by a done marker.
    pub fn answer(parts: &[&str]) -> Self {
        let mut items: Vec<_> = parts
            .iter()
            .map(|part| Ok(StreamChunk::Text(part.to_string())))
            .collect();
        items.push(Ok(StreamChunk::Done));
        Script::Chunks(items)
    }

    pub fn live() -> (
        mpsc::UnboundedSender<Result<StreamChunk, BackendError>>,
        Self,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Script::Live(rx))
    }
}

/// Backend double replaying queued scripts and recording what it was asked.
#[cfg(test)]
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    image_prompts: Mutex<Vec<(String, String)>>,
    image_error: Mutex<Option<BackendError>>,
}

#[cfg(test)]
impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) {
        lock_unpoisoned(&self.scripts).push_back(script);
    }

    pub fn fail_images(&self, error: BackendError) {
        *lock_unpoisoned(&self.image_error) = Some(error);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// `(prompt, model)` pairs of every image request.
    pub fn image_prompts(&self) -> Vec<(String, String)> {
        lock_unpoisoned(&self.image_prompts).clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn stream_complete(&self, request: ChatRequest) -> Result<ChunkStream, BackendError> {
        lock_unpoisoned(&self.requests).push(request);
        let script = lock_unpoisoned(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| Script::answer(&[]));
        match script {
            Script::Chunks(items) => Ok(Box::pin(futures_util::stream::iter(items))),
            Script::Reject(error) => Err(error),
            Script::Sse(parts) => Ok(sse_chunks(futures_util::stream::iter(
                parts.into_iter().map(Ok::<_, String>),
            ))),
            Script::Live(rx) => Ok(Box::pin(futures_util::stream::unfold(
                rx,
                |mut rx| async move { rx.recv().await.map(|item| (item, rx)) },
            ))),
        }
    }

    async fn generate_image(&self, prompt: &str, model: &str) -> Result<Vec<u8>, BackendError> {
        lock_unpoisoned(&self.image_prompts).push((prompt.to_string(), model.to_string()));
        match lock_unpoisoned(&self.image_error).clone() {
            Some(error) => Err(error),
            None => Ok(vec![0x89, b'P', b'N', b'G']),
        }
    }
}
