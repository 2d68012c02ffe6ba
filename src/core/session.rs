//! Per-conversation session state and the store that owns it.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use super::store::{lock_unpoisoned, KeyedStore};
use crate::core::config::data::DEFAULT_SYSTEM_PROMPT;
use crate::transport::{ChatId, UserId};

/// Identity of one conversation: the same user in a private chat and in a
/// group gets two independent sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl ConversationKey {
    pub fn new(user_id: UserId, chat_id: ChatId) -> Self {
        Self { user_id, chat_id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelChoice {
    #[default]
    Default,
    Alternate,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Default,
    AwaitingSystemPrompt,
}

/// Handle for the one generation a session may have running.
#[derive(Debug, Clone)]
pub struct ActiveGeneration {
    pub stream_id: u64,
    pub cancel_token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub model: ModelChoice,
    pub system_prompt: String,
    pub state: SessionState,
    pub active_generation: Option<ActiveGeneration>,
    /// Text of the running generation that has not been finalized into history.
    pub pending_buffer: String,
    last_stream_id: u64,
}

impl Session {
    pub fn with_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            model: ModelChoice::Default,
            system_prompt: system_prompt.into(),
            state: SessionState::Default,
            active_generation: None,
            pending_buffer: String::new(),
            last_stream_id: 0,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.active_generation.is_some()
    }

    fn owns_stream(&self, stream_id: u64) -> bool {
        self.active_generation
            .as_ref()
            .is_some_and(|active| active.stream_id == stream_id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::with_prompt(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Result of an explicit abort request.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AbortOutcome {
    pub cancelled: bool,
    /// Trimmed partial answer, empty when nothing had been generated.
    pub partial: String,
}

pub struct SessionStore {
    sessions: KeyedStore<ConversationKey, Session>,
    /// Free-tier usage, counted per user across all of that user's chats.
    usage: Mutex<HashMap<UserId, u64>>,
    default_system_prompt: String,
}

impl SessionStore {
    pub fn new(default_system_prompt: impl Into<String>) -> Self {
        let default_system_prompt = default_system_prompt.into();
        let prompt = default_system_prompt.clone();
        Self {
            sessions: KeyedStore::new(move || Session::with_prompt(prompt.clone())),
            usage: Mutex::new(HashMap::new()),
            default_system_prompt,
        }
    }

    pub fn default_system_prompt(&self) -> &str {
        &self.default_system_prompt
    }

    pub fn get(&self, key: ConversationKey) -> Session {
        self.sessions.get(key)
    }

    pub fn put(&self, key: ConversationKey, session: Session) {
        self.sessions.put(key, session)
    }

    pub fn update<R>(&self, key: ConversationKey, f: impl FnOnce(&mut Session) -> R) -> R {
        self.sessions.update(key, f)
    }

    pub fn increment_message_count(&self, user_id: UserId) -> u64 {
        let mut usage = lock_unpoisoned(&self.usage);
        let count = usage.entry(user_id).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn message_count(&self, user_id: UserId) -> u64 {
        lock_unpoisoned(&self.usage)
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Install a fresh cancellation handle, cancelling any generation that is
    /// still running for this conversation and discarding its unfinished text.
    pub fn begin_generation(&self, key: ConversationKey) -> (CancellationToken, u64) {
        self.update(key, |session| {
            if let Some(previous) = session.active_generation.take() {
                previous.cancel_token.cancel();
            }
            session.pending_buffer.clear();
            session.last_stream_id += 1;
            let token = CancellationToken::new();
            session.active_generation = Some(ActiveGeneration {
                stream_id: session.last_stream_id,
                cancel_token: token.clone(),
            });
            (token, session.last_stream_id)
        })
    }

    /// Buffer a fragment for `stream_id`. Returns false once that stream has
    /// been cancelled or superseded; the caller must then stop delivering.
    pub fn append_fragment(&self, key: ConversationKey, stream_id: u64, text: &str) -> bool {
        self.update(key, |session| {
            let live = session
                .active_generation
                .as_ref()
                .is_some_and(|active| {
                    active.stream_id == stream_id && !active.cancel_token.is_cancelled()
                });
            if live {
                session.pending_buffer.push_str(text);
            }
            live
        })
    }

    /// Natural end of `stream_id`: hands back the trimmed answer and clears the
    /// handle. `None` if the stream was cancelled or superseded meanwhile.
    pub fn complete_generation(&self, key: ConversationKey, stream_id: u64) -> Option<String> {
        self.update(key, |session| {
            if !session.owns_stream(stream_id) {
                return None;
            }
            session.active_generation = None;
            let text = std::mem::take(&mut session.pending_buffer);
            Some(text.trim().to_string())
        })
    }

    /// Drop `stream_id` without finalizing anything.
    pub fn discard_generation(&self, key: ConversationKey, stream_id: u64) {
        self.update(key, |session| {
            if session.owns_stream(stream_id) {
                session.active_generation = None;
                session.pending_buffer.clear();
            }
        })
    }

    /// Run `f` only while `stream_id` is still the live generation, holding the
    /// session lock so no abort can land in between.
    pub fn while_live<R>(
        &self,
        key: ConversationKey,
        stream_id: u64,
        f: impl FnOnce() -> R,
    ) -> Option<R> {
        self.update(key, |session| {
            let live = session.active_generation.as_ref().is_some_and(|active| {
                active.stream_id == stream_id && !active.cancel_token.is_cancelled()
            });
            live.then(f)
        })
    }

    /// Cancel whatever is running and throw its unfinished text away.
    pub fn cancel_generation(&self, key: ConversationKey) -> bool {
        self.update(key, |session| {
            session.pending_buffer.clear();
            match session.active_generation.take() {
                Some(active) => {
                    active.cancel_token.cancel();
                    true
                }
                None => false,
            }
        })
    }

    /// Cancel whatever is running and take the partial answer.
    pub fn abort_generation(&self, key: ConversationKey) -> AbortOutcome {
        self.update(key, |session| {
            let cancelled = match session.active_generation.take() {
                Some(active) => {
                    active.cancel_token.cancel();
                    true
                }
                None => false,
            };
            let partial = std::mem::take(&mut session.pending_buffer);
            AbortOutcome {
                cancelled,
                partial: partial.trim().to_string(),
            }
        })
    }

    pub fn reset(&self, key: ConversationKey) {
        let fresh = Session::with_prompt(self.default_system_prompt.clone());
        self.update(key, |session| {
            if let Some(active) = session.active_generation.take() {
                active.cancel_token.cancel();
            }
            *session = Session {
                last_stream_id: session.last_stream_id,
                ..fresh
            };
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::new(7, -100)
    }

    #[test]
    fn sessions_are_created_with_configured_prompt() {
        let store = SessionStore::new("Be brief.");
        let session = store.get(key());
        assert_eq!(session.system_prompt, "Be brief.");
        assert_eq!(session.model, ModelChoice::Default);
        assert_eq!(session.state, SessionState::Default);
        assert!(!session.is_generating());
    }

    #[test]
    fn private_and_group_conversations_are_distinct() {
        let store = SessionStore::new("p");
        store.update(ConversationKey::new(1, 1), |s| s.model = ModelChoice::Alternate);
        assert_eq!(store.get(ConversationKey::new(1, 2)).model, ModelChoice::Default);
    }

    #[test]
    fn message_count_is_per_user_not_per_conversation() {
        let store = SessionStore::new("p");
        assert_eq!(store.increment_message_count(1), 1);
        assert_eq!(store.increment_message_count(1), 2);
        assert_eq!(store.increment_message_count(2), 1);
        assert_eq!(store.message_count(1), 2);
        assert_eq!(store.message_count(3), 0);
    }

    #[test]
    fn begin_generation_cancels_previous_stream() {
        let store = SessionStore::new("p");
        let (first, first_id) = store.begin_generation(key());
        assert!(store.append_fragment(key(), first_id, "old"));

        let (second, second_id) = store.begin_generation(key());
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_ne!(first_id, second_id);

        let session = store.get(key());
        assert!(session.pending_buffer.is_empty());
        assert_eq!(
            session.active_generation.map(|active| active.stream_id),
            Some(second_id)
        );
        assert!(!store.append_fragment(key(), first_id, "late"));
        assert!(store.complete_generation(key(), first_id).is_none());
    }

    #[test]
    fn complete_generation_trims_and_clears() {
        let store = SessionStore::new("p");
        let (_token, id) = store.begin_generation(key());
        store.append_fragment(key(), id, "  Hello");
        store.append_fragment(key(), id, " world \n");

        assert_eq!(store.complete_generation(key(), id).as_deref(), Some("Hello world"));
        let session = store.get(key());
        assert!(session.active_generation.is_none());
        assert!(session.pending_buffer.is_empty());
        assert!(store.complete_generation(key(), id).is_none());
    }

    #[test]
    fn abort_cancels_and_returns_partial() {
        let store = SessionStore::new("p");
        let (token, id) = store.begin_generation(key());
        store.append_fragment(key(), id, "partial ");

        let outcome = store.abort_generation(key());
        assert!(token.is_cancelled());
        assert_eq!(
            outcome,
            AbortOutcome {
                cancelled: true,
                partial: "partial".into()
            }
        );
        assert!(!store.append_fragment(key(), id, "more"));
        assert!(store.complete_generation(key(), id).is_none());
        assert_eq!(store.abort_generation(key()), AbortOutcome::default());
    }

    #[test]
    fn cancel_generation_discards_partial() {
        let store = SessionStore::new("p");
        let (token, id) = store.begin_generation(key());
        store.append_fragment(key(), id, "partial");

        assert!(store.cancel_generation(key()));
        assert!(token.is_cancelled());
        assert!(store.get(key()).pending_buffer.is_empty());
        assert!(store.complete_generation(key(), id).is_none());
        assert!(!store.cancel_generation(key()));
    }

    #[test]
    fn while_live_runs_only_for_the_current_stream() {
        let store = SessionStore::new("p");
        let (_token, id) = store.begin_generation(key());
        assert_eq!(store.while_live(key(), id, || 1), Some(1));

        store.abort_generation(key());
        assert_eq!(store.while_live(key(), id, || 1), None);
    }

    #[test]
    fn reset_restores_defaults_and_cancels() {
        let store = SessionStore::new("p");
        store.update(key(), |s| {
            s.model = ModelChoice::Image;
            s.system_prompt = "custom".into();
            s.state = SessionState::AwaitingSystemPrompt;
        });
        let (token, id) = store.begin_generation(key());
        store.reset(key());

        assert!(token.is_cancelled());
        let session = store.get(key());
        assert_eq!(session.model, ModelChoice::Default);
        assert_eq!(session.system_prompt, "p");
        assert_eq!(session.state, SessionState::Default);
        let (_, next_id) = store.begin_generation(key());
        assert!(next_id > id);
    }
}
