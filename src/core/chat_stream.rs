//! Cancellable streaming generation for one conversation.
//!
//! A generation buffers its text in the session as it arrives and is
//! finalized into history only when the backend ends the answer. Cancelled
//! or failed generations leave history untouched.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::api::ChatRequest;
use crate::core::backend::{BackendError, ChatBackend, ChunkStream, StreamChunk};
use crate::core::constants::{MAX_OUTPUT_TOKENS, TOP_P};
use crate::core::history::HistoryStore;
use crate::core::message::Message;
use crate::core::session::{ConversationKey, SessionStore};

/// How a generation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The backend finished the answer and it was committed to history.
    Completed,
    /// Aborted, reset, or superseded by a newer generation.
    Cancelled,
    /// The backend failed mid-stream.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Chunk(String),
    End(StreamEnd),
}

/// A running generation as seen by its consumer.
pub struct ActiveStream {
    pub stream_id: u64,
    pub fragments: mpsc::UnboundedReceiver<Fragment>,
}

impl ActiveStream {
    fn ended(stream_id: u64, end: StreamEnd) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Fragment::End(end));
        Self {
            stream_id,
            fragments: rx,
        }
    }
}

pub struct StreamGenerator {
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<SessionStore>,
    history: Arc<HistoryStore>,
    temperature: f32,
}

impl StreamGenerator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        sessions: Arc<SessionStore>,
        history: Arc<HistoryStore>,
        temperature: f32,
    ) -> Self {
        Self {
            backend,
            sessions,
            history,
            temperature,
        }
    }

    /// Start answering `user_text` with `model`.
    ///
    /// Any generation still running for `key` is cancelled first. The user
    /// turn is recorded only once the backend has accepted the request; an
    /// error here means nothing was recorded.
    pub async fn start(
        &self,
        key: ConversationKey,
        user_text: &str,
        model: &str,
    ) -> Result<ActiveStream, BackendError> {
        let system_prompt = self.sessions.get(key).system_prompt;
        let (cancel_token, stream_id) = self.sessions.begin_generation(key);

        let mut context = self.history.context_for(key, &system_prompt);
        context.push(Message::user(user_text));
        let request = ChatRequest {
            model: model.to_string(),
            messages: context.iter().map(Message::to_api).collect(),
            temperature: self.temperature,
            max_tokens: MAX_OUTPUT_TOKENS,
            top_p: TOP_P,
            stream: true,
        };

        debug!(
            user = key.user_id,
            chat = key.chat_id,
            stream_id,
            model,
            turns = request.messages.len(),
            "opening completion stream"
        );

        let opened = tokio::select! {
            opened = self.backend.stream_complete(request) => opened,
            _ = cancel_token.cancelled() => {
                debug!(stream_id, "generation cancelled before the backend answered");
                return Ok(ActiveStream::ended(stream_id, StreamEnd::Cancelled));
            }
        };
        let chunks = match opened {
            Ok(chunks) => chunks,
            Err(err) => {
                self.sessions.discard_generation(key, stream_id);
                return Err(err);
            }
        };

        let recorded = self.sessions.while_live(key, stream_id, || {
            self.history.append(key, Message::user(user_text));
        });
        if recorded.is_none() {
            debug!(stream_id, "generation cancelled as the backend answered");
            return Ok(ActiveStream::ended(stream_id, StreamEnd::Cancelled));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = StreamPump {
            key,
            stream_id,
            cancel_token,
            sessions: Arc::clone(&self.sessions),
            history: Arc::clone(&self.history),
            tx,
        };
        tokio::spawn(pump.run(chunks));

        Ok(ActiveStream {
            stream_id,
            fragments: rx,
        })
    }
}

struct StreamPump {
    key: ConversationKey,
    stream_id: u64,
    cancel_token: CancellationToken,
    sessions: Arc<SessionStore>,
    history: Arc<HistoryStore>,
    tx: mpsc::UnboundedSender<Fragment>,
}

impl StreamPump {
    async fn run(self, mut chunks: ChunkStream) {
        let end = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break StreamEnd::Cancelled,
                next = chunks.next() => next,
            };

            match next {
                Some(Ok(StreamChunk::Text(text))) => {
                    if !self.sessions.append_fragment(self.key, self.stream_id, &text) {
                        break StreamEnd::Cancelled;
                    }
                    // A vanished consumer still lets the answer finish into history.
                    let _ = self.tx.send(Fragment::Chunk(text));
                }
                Some(Ok(StreamChunk::Done)) | None => {
                    match self.sessions.complete_generation(self.key, self.stream_id) {
                        Some(answer) => {
                            self.history.append(self.key, Message::assistant(answer));
                            break StreamEnd::Completed;
                        }
                        None => break StreamEnd::Cancelled,
                    }
                }
                Some(Err(err)) => {
                    error!(
                        user = self.key.user_id,
                        chat = self.key.chat_id,
                        stream_id = self.stream_id,
                        error = %err,
                        "generation failed mid-stream"
                    );
                    self.sessions.discard_generation(self.key, self.stream_id);
                    break StreamEnd::Failed(err.to_string());
                }
            }
        };

        debug!(stream_id = self.stream_id, end = ?end, "generation ended");
        let _ = self.tx.send(Fragment::End(end));
    }
}
