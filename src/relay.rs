//! Routing of inbound chat events to commands, generations and images.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::commands::{self, CommandContext, CommandResult, PROMPT_SET_TEXT};
use crate::core::access::AccessGate;
use crate::core::backend::ChatBackend;
use crate::core::chat_stream::{StreamEnd, StreamGenerator};
use crate::core::config::Config;
use crate::core::constants::PLACEHOLDER_TEXT;
use crate::core::history::HistoryStore;
use crate::core::session::{ConversationKey, ModelChoice, SessionState, SessionStore};
use crate::render::IncrementalRenderer;
use crate::search::{augment_prompt, WebSearch};
use crate::transport::telegram::TelegramTransport;
use crate::transport::{send_notice, CommandCall, FormatMode, InboundEvent, Transport};

pub const GENERIC_FAILURE_NOTICE: &str =
    "Sorry, the answer could not be generated. Please try again.";
pub const IMAGE_REJECTED_NOTICE: &str =
    "No image could be generated for this prompt. It may violate the content policy.";

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

pub struct Relay {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    backend: Arc<dyn ChatBackend>,
    search: Option<Arc<dyn WebSearch>>,
    sessions: Arc<SessionStore>,
    history: Arc<HistoryStore>,
    gate: AccessGate,
    generator: StreamGenerator,
    bot_username: Option<String>,
}

impl Relay {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        backend: Arc<dyn ChatBackend>,
        search: Option<Arc<dyn WebSearch>>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(config.default_system_prompt.clone()));
        let history = Arc::new(HistoryStore::new());
        let gate = AccessGate::new(Arc::clone(&config), Arc::clone(&sessions));
        let generator = StreamGenerator::new(
            Arc::clone(&backend),
            Arc::clone(&sessions),
            Arc::clone(&history),
            config.temperature,
        );
        Self {
            config,
            transport,
            backend,
            search,
            sessions,
            history,
            gate,
            generator,
            bot_username: None,
        }
    }

    /// Username the bot is addressed by in group chats.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn is_this_bot(&self, username: &str) -> bool {
        self.bot_username
            .as_deref()
            .is_some_and(|bot| bot.eq_ignore_ascii_case(username.trim_start_matches('@')))
    }

    /// Group chats only reach the bot through commands and mentions; commands
    /// addressed to another bot are never ours.
    pub fn should_handle(&self, event: &InboundEvent) -> bool {
        if let Some(CommandCall {
            addressed_to: Some(bot),
            ..
        }) = &event.command
        {
            return self.is_this_bot(bot);
        }
        if !event.chat_kind.is_group() || event.is_command() {
            return true;
        }
        self.bot_username
            .as_deref()
            .is_some_and(|bot| event.mentions_user(bot))
    }

    pub async fn handle_event(&self, event: InboundEvent) {
        let key = ConversationKey::new(event.sender.id, event.chat_id);
        match &event.command {
            Some(call) => self.handle_command(&event, key, call).await,
            None => self.handle_plain(&event, key).await,
        }
    }

    async fn handle_command(
        &self,
        event: &InboundEvent,
        key: ConversationKey,
        call: &CommandCall,
    ) {
        let context = CommandContext {
            key,
            sessions: &self.sessions,
            history: &self.history,
            models: &self.config.models,
        };
        match commands::dispatch(&context, call) {
            CommandResult::Reply(text) => {
                send_notice(self.transport.as_ref(), event.chat_id, &text).await
            }
            CommandResult::Done => {}
            CommandResult::GenerateImage(prompt) => {
                if self
                    .gate
                    .check_access(&event.sender, event.chat_id, self.transport.as_ref())
                    .await
                {
                    self.generate_image(event, &prompt).await;
                }
            }
        }
    }

    async fn handle_plain(&self, event: &InboundEvent, key: ConversationKey) {
        let text = self.strip_bot_mention(&event.text);
        if text.is_empty() {
            return;
        }

        let session = self.sessions.get(key);
        if session.state == SessionState::AwaitingSystemPrompt {
            commands::set_system_prompt(&self.sessions, &self.history, key, &text);
            info!(user = key.user_id, chat = key.chat_id, "system prompt captured");
            send_notice(self.transport.as_ref(), event.chat_id, PROMPT_SET_TEXT).await;
            return;
        }

        if !self
            .gate
            .check_access(&event.sender, event.chat_id, self.transport.as_ref())
            .await
        {
            return;
        }

        if session.model == ModelChoice::Image {
            self.generate_image(event, &text).await;
        } else {
            self.generate_text(event, key, session.model, &text).await;
        }
    }

    /// Message text without a leading mention of this bot.
    fn strip_bot_mention(&self, text: &str) -> String {
        let trimmed = text.trim();
        if let Some((first, rest)) = trimmed.split_once(char::is_whitespace) {
            if first.starts_with('@') && self.is_this_bot(first) {
                return rest.trim().to_string();
            }
        } else if trimmed.starts_with('@') && self.is_this_bot(trimmed) {
            return String::new();
        }
        trimmed.to_string()
    }

    async fn augmented_prompt(&self, text: &str) -> String {
        let (Some(search), Some(settings)) = (&self.search, self.config.search_settings()) else {
            return text.to_string();
        };
        if !settings.is_triggered_by(text) {
            return text.to_string();
        }
        match search.summaries(text).await {
            Ok(summaries) => {
                debug!(results = summaries.len(), "search augmentation");
                augment_prompt(&summaries, text)
            }
            Err(err) => {
                warn!(error = %err, "search augmentation failed");
                text.to_string()
            }
        }
    }

    async fn generate_text(
        &self,
        event: &InboundEvent,
        key: ConversationKey,
        model: ModelChoice,
        text: &str,
    ) {
        let prompt = self.augmented_prompt(text).await;
        let model_id = self.config.models.id_for(model);

        let mut stream = match self.generator.start(key, &prompt, model_id).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(
                    user = key.user_id,
                    chat = key.chat_id,
                    error = %err,
                    "generation did not start"
                );
                send_notice(
                    self.transport.as_ref(),
                    event.chat_id,
                    GENERIC_FAILURE_NOTICE,
                )
                .await;
                return;
            }
        };

        let stats = IncrementalRenderer::new(
            self.transport.as_ref(),
            event.chat_id,
            Some(event.message_id),
        )
        .render(&mut stream.fragments)
        .await;

        info!(
            user = key.user_id,
            chat = key.chat_id,
            stream_id = stream.stream_id,
            sent = stats.messages_sent,
            edits = stats.edits,
            end = ?stats.end,
            "answer rendered"
        );
        if let StreamEnd::Failed(_) = stats.end {
            send_notice(self.transport.as_ref(), event.chat_id, GENERIC_FAILURE_NOTICE).await;
        }
    }

    async fn generate_image(&self, event: &InboundEvent, prompt: &str) {
        let chat = event.chat_id;
        let placeholder = match self
            .transport
            .send_message(chat, PLACEHOLDER_TEXT, FormatMode::Plain, Some(event.message_id))
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(chat, error = %err, "failed to send placeholder");
                None
            }
        };

        let result = self
            .backend
            .generate_image(prompt, &self.config.models.image)
            .await;

        if let Some(message_id) = placeholder {
            if let Err(err) = self.transport.delete_message(chat, message_id).await {
                warn!(chat, message_id, error = %err, "failed to delete placeholder");
            }
        }

        match result {
            Ok(png) => {
                if let Err(err) = self
                    .transport
                    .send_photo(chat, png, Some(event.message_id))
                    .await
                {
                    warn!(chat, error = %err, "failed to send image");
                }
            }
            Err(err) => {
                error!(chat, error = %err, "image generation failed");
                send_notice(self.transport.as_ref(), chat, IMAGE_REJECTED_NOTICE).await;
            }
        }
    }
}

/// Long-poll the Bot API and handle every update on its own task until
/// `shutdown` fires.
pub async fn run_polling(
    relay: Arc<Relay>,
    telegram: Arc<TelegramTransport>,
    shutdown: CancellationToken,
) {
    let mut offset = 0;
    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = telegram.get_updates(offset, POLL_TIMEOUT_SECS) => polled,
        };

        let updates = match polled {
            Ok(updates) => updates,
            Err(err) => {
                warn!(error = %err, "polling failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(event) = update.into_event() else {
                continue;
            };
            if !relay.should_handle(&event) {
                debug!(chat = event.chat_id, "ignoring message not addressed to the bot");
                continue;
            }
            let span = info_span!(
                "event",
                chat = event.chat_id,
                user = event.sender.id,
                message_id = event.message_id
            );
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.handle_event(event).await }.instrument(span));
        }
    }
    info!("polling stopped");
}
