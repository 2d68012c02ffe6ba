use super::session::ConversationKey;
use super::store::KeyedStore;
use crate::core::message::Message;

/// Ordered message log per conversation, sent to the backend as context.
pub struct HistoryStore {
    logs: KeyedStore<ConversationKey, Vec<Message>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    pub fn new() -> Self {
        Self {
            logs: KeyedStore::new(Vec::new),
        }
    }

    pub fn get(&self, key: ConversationKey) -> Vec<Message> {
        self.logs.get(key)
    }

    pub fn replace(&self, key: ConversationKey, messages: Vec<Message>) {
        self.logs.put(key, messages)
    }

    pub fn append(&self, key: ConversationKey, message: Message) {
        self.logs.update(key, |log| log.push(message))
    }

    /// Start over with a single system turn.
    pub fn reset_to_system(&self, key: ConversationKey, prompt: &str) {
        self.replace(key, vec![Message::system(prompt)])
    }

    /// History as it should be sent: guaranteed to lead with a system turn.
    pub fn context_for(&self, key: ConversationKey, system_prompt: &str) -> Vec<Message> {
        let mut messages = self.get(key);
        if !messages.first().is_some_and(|first| first.role.is_system()) {
            messages.insert(0, Message::system(system_prompt));
        }
        messages
    }
}
