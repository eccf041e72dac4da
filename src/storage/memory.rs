//! In-process adapters, used for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ChatStore, EphemeralStore};
use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationKey, ConversationStatus, LastMessage, Message, MessageReaction,
    MessageSlot, MessageStatus, ParticipantRole, PresenceRecord, TypingIndicator,
};

#[derive(Default)]
struct ChatState {
    conversations: HashMap<Uuid, Conversation>,
    by_key: HashMap<ConversationKey, Uuid>,
    slots: HashMap<Uuid, MessageSlot>,
    messages: HashMap<Uuid, Message>,
    /// Message ids per conversation, in insertion order.
    ledger: HashMap<Uuid, Vec<Uuid>>,
}

impl ChatState {
    fn ordered(&self, conversation_id: Uuid) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self
            .ledger
            .get(&conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.messages.get(id))
            .collect();
        messages.sort_by_key(|m| m.position());
        messages
    }

    fn update_conversation<F>(&mut self, id: Uuid, at: DateTime<Utc>, f: F) -> Option<Conversation>
    where
        F: FnOnce(&mut Conversation),
    {
        let conversation = self.conversations.get_mut(&id)?;
        f(conversation);
        conversation.updated_at = at;
        Some(conversation.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<ChatState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .get(key)
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation> {
        let mut state = self.state.write().await;
        let key = conversation.key();
        if let Some(existing) = state.by_key.get(&key).and_then(|id| state.conversations.get(id)) {
            return Ok(existing.clone());
        }
        state.by_key.insert(key, conversation.id);
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn list_store_conversations(&self, store_id: &str) -> AppResult<Vec<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| c.store_id == store_id)
            .cloned()
            .collect())
    }

    async fn list_customer_conversations(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| c.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn record_append(
        &self,
        id: Uuid,
        recipient: ParticipantRole,
        last: LastMessage,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.update_conversation(id, at, |c| {
            *c.unread_count.slot_mut(recipient) += 1;
            c.last_message = Some(last);
        }))
    }

    async fn set_last_message(
        &self,
        id: Uuid,
        last: Option<LastMessage>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.update_conversation(id, at, |c| c.last_message = last))
    }

    async fn reset_unread(
        &self,
        id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.update_conversation(id, at, |c| *c.unread_count.slot_mut(role) = 0))
    }

    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.update_conversation(id, at, |c| c.status = status))
    }

    async fn assign_conversation(
        &self,
        id: Uuid,
        assignee: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.update_conversation(id, at, |c| c.assigned_to = assignee))
    }

    async fn next_message_slot(
        &self,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<MessageSlot>> {
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(&conversation_id) {
            return Ok(None);
        }
        let slot = match state.slots.get(&conversation_id) {
            Some(prev) => MessageSlot {
                sequence: prev.sequence + 1,
                timestamp: now.max(prev.timestamp),
            },
            None => MessageSlot {
                sequence: 1,
                timestamp: now,
            },
        };
        state.slots.insert(conversation_id, slot);
        Ok(Some(slot))
    }

    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        let mut state = self.state.write().await;
        state
            .ledger
            .entry(message.conversation_id)
            .or_default()
            .push(message.id);
        state.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .ordered(conversation_id)
            .into_iter()
            .filter(|m| !m.is_deleted())
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_message(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .ordered(conversation_id)
            .into_iter()
            .rev()
            .find(|m| !m.is_deleted())
            .cloned())
    }

    async fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut state = self.state.write().await;
        Ok(state.messages.get_mut(&id).map(|m| {
            m.content = content.to_string();
            m.edited_at = Some(edited_at);
            m.clone()
        }))
    }

    async fn soft_delete_message(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let mut state = self.state.write().await;
        Ok(state.messages.get_mut(&id).map(|m| {
            m.deleted_at.get_or_insert(at);
            m.clone()
        }))
    }

    async fn advance_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> AppResult<Option<Message>> {
        let mut state = self.state.write().await;
        Ok(state.messages.get_mut(&id).map(|m| {
            if m.status < status {
                m.status = status;
            }
            m.clone()
        }))
    }

    async fn advance_conversation_statuses(
        &self,
        conversation_id: Uuid,
        exclude_sender: &str,
        status: MessageStatus,
    ) -> AppResult<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let ids: Vec<Uuid> = state.ledger.get(&conversation_id).cloned().unwrap_or_default();
        let mut moved = Vec::new();
        for id in ids {
            if let Some(m) = state.messages.get_mut(&id) {
                if m.sender_id != exclude_sender && m.status < status {
                    m.status = status;
                    moved.push(id);
                }
            }
        }
        Ok(moved)
    }

    async fn upsert_reaction(
        &self,
        reaction: &MessageReaction,
    ) -> AppResult<Vec<MessageReaction>> {
        let mut state = self.state.write().await;
        let Some(message) = state.messages.get_mut(&reaction.message_id) else {
            return Ok(Vec::new());
        };
        match message
            .reactions
            .iter_mut()
            .find(|r| r.user_id == reaction.user_id)
        {
            Some(existing) => *existing = reaction.clone(),
            None => message.reactions.push(reaction.clone()),
        }
        Ok(message.reactions.clone())
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: &str) -> AppResult<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(false);
        };
        let before = message.reactions.len();
        message.reactions.retain(|r| r.user_id != user_id);
        Ok(message.reactions.len() != before)
    }
}

#[derive(Default)]
struct EphemeralState {
    typing: HashMap<(Uuid, String), TypingIndicator>,
    presence: HashMap<String, PresenceRecord>,
}

/// Typing and presence records kept in process memory. Expired rows stay
/// until [`EphemeralStore::purge_expired`] is called.
#[derive(Default)]
pub struct MemoryEphemeralStore {
    state: RwLock<EphemeralState>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn put_typing(&self, indicator: &TypingIndicator) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.typing.insert(
            (indicator.conversation_id, indicator.user_id.clone()),
            indicator.clone(),
        );
        Ok(())
    }

    async fn typing_records(&self, conversation_id: Uuid) -> AppResult<Vec<TypingIndicator>> {
        let state = self.state.read().await;
        Ok(state
            .typing
            .values()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn put_presence(&self, record: &PresenceRecord) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.presence.insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn presence_record(&self, user_id: &str) -> AppResult<Option<PresenceRecord>> {
        Ok(self.state.read().await.presence.get(user_id).cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut state = self.state.write().await;
        let before = state.typing.len();
        state.typing.retain(|_, t| t.expires_at > now);
        Ok(before - state.typing.len())
    }
}
