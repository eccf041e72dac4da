use std::sync::Arc;

use uuid::Uuid;

use super::locks::KeyedLocks;
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    hub::{ChatEvent, SubscriptionHub, Topic},
    models::{Message, MessageReaction},
    storage::ChatStore,
};

/// At most one reaction per `(message, user)`. A new emoji replaces the old.
#[derive(Clone)]
pub struct ReactionRegistry {
    store: Arc<dyn ChatStore>,
    hub: Arc<SubscriptionHub>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<Uuid>,
}

impl ReactionRegistry {
    /// `locks` is shared with the ledger so reaction changes order with the
    /// rest of the conversation's events.
    pub fn new(
        store: Arc<dyn ChatStore>,
        hub: Arc<SubscriptionHub>,
        clock: Arc<dyn Clock>,
        locks: KeyedLocks<Uuid>,
    ) -> Self {
        Self {
            store,
            hub,
            clock,
            locks,
        }
    }

    async fn live_message(&self, message_id: Uuid) -> AppResult<Message> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;
        if message.is_deleted() {
            return Err(AppError::conflict("cannot react to a deleted message"));
        }
        Ok(message)
    }

    pub async fn add(
        &self,
        message_id: Uuid,
        user_id: &str,
        user_name: &str,
        emoji: &str,
    ) -> AppResult<Vec<MessageReaction>> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user_id must not be empty"));
        }
        if emoji.trim().is_empty() {
            return Err(AppError::validation("emoji must not be empty"));
        }

        let message = self.live_message(message_id).await?;
        let _guard = self.locks.lock(&message.conversation_id).await;
        // Re-check under the lock; a delete may have landed in between.
        self.live_message(message_id).await?;

        let reaction = MessageReaction {
            message_id,
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            emoji: emoji.to_string(),
            created_at: self.clock.now(),
        };
        let reactions = self.store.upsert_reaction(&reaction).await?;

        self.publish(message.conversation_id, message_id, &reactions);
        Ok(reactions)
    }

    /// Idempotent: removing a reaction that is not there succeeds.
    pub async fn remove(&self, message_id: Uuid, user_id: &str) -> AppResult<Vec<MessageReaction>> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;

        let _guard = self.locks.lock(&message.conversation_id).await;
        let removed = self.store.remove_reaction(message_id, user_id).await?;
        let reactions = self
            .store
            .get_message(message_id)
            .await?
            .map(|m| m.reactions)
            .unwrap_or_default();

        if removed {
            self.publish(message.conversation_id, message_id, &reactions);
        }
        Ok(reactions)
    }

    pub async fn list(&self, message_id: Uuid) -> AppResult<Vec<MessageReaction>> {
        self.store
            .get_message(message_id)
            .await?
            .map(|m| m.reactions)
            .ok_or(AppError::MessageNotFound(message_id))
    }

    fn publish(&self, conversation_id: Uuid, message_id: Uuid, reactions: &[MessageReaction]) {
        self.hub.publish(
            &Topic::Messages(conversation_id),
            &ChatEvent::ReactionsChanged {
                conversation_id,
                message_id,
                reactions: reactions.to_vec(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{MessageStatus, MessageType, ParticipantRole};
    use crate::storage::memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn fixture() -> (ReactionRegistry, Arc<dyn ChatStore>, Arc<SubscriptionHub>, Message) {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let hub = Arc::new(SubscriptionHub::new());
        let clock = Arc::new(ManualClock::default());
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sequence: 1,
            sender_id: "cust-1".into(),
            sender_type: ParticipantRole::Customer,
            sender_name: "Alice".into(),
            content: "hello".into(),
            message_type: MessageType::Text,
            attachment: None,
            status: MessageStatus::Sent,
            reply_to: None,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
            created_at: clock.now(),
        };
        store.insert_message(&message).await.unwrap();
        let registry = ReactionRegistry::new(store.clone(), hub.clone(), clock, KeyedLocks::new());
        (registry, store, hub, message)
    }

    #[tokio::test]
    async fn second_reaction_replaces_first() {
        let (registry, _, _, message) = fixture().await;
        registry.add(message.id, "u1", "Ann", "👍").await.unwrap();
        let reactions = registry.add(message.id, "u1", "Ann", "❤️").await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "❤️");

        let reactions = registry.add(message.id, "u2", "Ben", "👍").await.unwrap();
        assert_eq!(reactions.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_reactions_by_one_user_leave_one_record() {
        let (registry, _, _, message) = fixture().await;
        let mut handles = Vec::new();
        for emoji in ["👍", "❤️", "😂", "🎉"] {
            let r = registry.clone();
            handles.push(tokio::spawn(async move {
                r.add(message.id, "u1", "Ann", emoji).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.list(message.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_publishes_once() {
        let (registry, _, hub, message) = fixture().await;
        let events = Arc::new(AtomicUsize::new(0));
        let e = events.clone();
        hub.subscribe(Topic::Messages(message.conversation_id), move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        registry.add(message.id, "u1", "Ann", "👍").await.unwrap();
        assert!(registry.remove(message.id, "u1").await.unwrap().is_empty());
        assert!(registry.remove(message.id, "u1").await.unwrap().is_empty());
        assert_eq!(events.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejects_bad_input_and_deleted_targets() {
        let (registry, store, _, message) = fixture().await;
        assert!(matches!(
            registry.add(message.id, "u1", "Ann", " ").await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            registry.add(Uuid::new_v4(), "u1", "Ann", "👍").await.unwrap_err(),
            AppError::MessageNotFound(_)
        ));

        store.soft_delete_message(message.id, chrono::Utc::now()).await.unwrap();
        assert!(matches!(
            registry.add(message.id, "u1", "Ann", "👍").await.unwrap_err(),
            AppError::Conflict(_)
        ));
    }
}
