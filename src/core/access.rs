//! Allow-list and free-tier quota enforcement.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::config::Config;
use crate::core::session::SessionStore;
use crate::transport::{send_notice, ChatId, Sender, Transport};

pub const QUOTA_EXCEEDED_NOTICE: &str = "Your free messages are used up.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The sender is on the allow-list; nothing was counted.
    AllowListed,
    /// Counted against the free tier and still within it.
    WithinQuota { used: u64 },
    Denied { used: u64 },
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, AccessDecision::Denied { .. })
    }
}

pub struct AccessGate {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
}

impl AccessGate {
    pub fn new(config: Arc<Config>, sessions: Arc<SessionStore>) -> Self {
        Self { config, sessions }
    }

    fn is_allow_listed(&self, sender: &Sender) -> bool {
        sender
            .username
            .as_deref()
            .is_some_and(|username| self.config.is_allowed_username(username))
    }

    /// Decide without telling the user anything. Senders off the allow-list
    /// are counted; a count equal to the limit is still allowed.
    pub fn decide(&self, sender: &Sender) -> AccessDecision {
        if self.is_allow_listed(sender) {
            return AccessDecision::AllowListed;
        }
        let used = self.sessions.increment_message_count(sender.id);
        if used > self.config.free_chat_count {
            AccessDecision::Denied { used }
        } else {
            AccessDecision::WithinQuota { used }
        }
    }

    /// Decide, and send the quota notice to `chat` on denial.
    pub async fn check_access(
        &self,
        sender: &Sender,
        chat: ChatId,
        transport: &dyn Transport,
    ) -> bool {
        let decision = self.decide(sender);
        match decision {
            AccessDecision::AllowListed => {}
            AccessDecision::WithinQuota { used } => {
                debug!(
                    user = sender.id,
                    used,
                    limit = self.config.free_chat_count,
                    "free-tier message"
                );
            }
            AccessDecision::Denied { used } => {
                info!(user = sender.id, chat, used, "free-tier quota exhausted");
                send_notice(transport, chat, QUOTA_EXCEEDED_NOTICE).await;
            }
        }
        decision.is_allowed()
    }
}
