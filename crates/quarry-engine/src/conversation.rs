//! In-memory conversation store.
//!
//! Keeps each agent/user conversation in append order. Turns read it back
//! through `history()` and the engine appends the finished exchange.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use quarry_contracts::{
    agent::{AgentId, UserId},
    error::{QuarryError, QuarryResult},
    message::ConversationMessage,
};
use quarry_core::traits::ConversationSink;

type ConversationKey = (AgentId, UserId);

/// Shared, cloneable conversation log. Clones see the same conversations.
#[derive(Clone, Default)]
pub struct InMemoryConversationLog {
    conversations: Arc<Mutex<HashMap<ConversationKey, Vec<ConversationMessage>>>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The whole conversation, oldest first. Empty when none exists.
    pub fn history(&self, agent: &AgentId, user: &UserId) -> Vec<ConversationMessage> {
        self.lock()
            .ok()
            .and_then(|conversations| conversations.get(&(agent.clone(), user.clone())).cloned())
            .unwrap_or_default()
    }

    fn lock(&self) -> QuarryResult<MutexGuard<'_, HashMap<ConversationKey, Vec<ConversationMessage>>>> {
        self.conversations.lock().map_err(|e| QuarryError::ConfigError {
            reason: format!("conversation log lock poisoned: {}", e),
        })
    }
}

#[async_trait]
impl ConversationSink for InMemoryConversationLog {
    async fn append(&self, agent: &AgentId, user: &UserId, messages: &[ConversationMessage]) -> QuarryResult<()> {
        let mut conversations = self.lock()?;
        let conversation = conversations.entry((agent.clone(), user.clone())).or_default();
        conversation.extend_from_slice(messages);
        debug!(agent_id = %agent.0, appended = messages.len(), total = conversation.len(), "conversation appended");
        Ok(())
    }
}
