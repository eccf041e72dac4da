use std::sync::Arc;

use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    hub::{ChatEvent, SubscriptionHub, Topic},
    models::{Conversation, ConversationStatus, LastMessage, NewConversation, ParticipantRole},
    storage::ChatStore,
};

/// Conversation identity, participant pairing, and unread bookkeeping.
#[derive(Clone)]
pub struct ConversationStore {
    store: Arc<dyn ChatStore>,
    hub: Arc<SubscriptionHub>,
    clock: Arc<dyn Clock>,
}

fn require_id(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl ConversationStore {
    pub fn new(store: Arc<dyn ChatStore>, hub: Arc<SubscriptionHub>, clock: Arc<dyn Clock>) -> Self {
        Self { store, hub, clock }
    }

    /// Look up by `(store_id, customer_id, store_admin_id)`, creating the
    /// conversation if it does not exist yet. The flag tells whether this
    /// call created it.
    pub async fn create_or_get(&self, new: NewConversation) -> AppResult<(Conversation, bool)> {
        require_id("store_id", &new.store_id)?;
        require_id("customer_id", &new.customer_id)?;
        require_id("store_admin_id", &new.store_admin_id)?;

        if let Some(existing) = self.store.find_conversation(&new.key()).await? {
            return Ok((existing, false));
        }

        let candidate = Conversation::new(new, self.clock.now());
        let candidate_id = candidate.id;
        let conversation = self.store.insert_conversation(candidate).await?;
        let created = conversation.id == candidate_id;

        if created {
            tracing::info!(
                conversation_id = %conversation.id,
                store_id = %conversation.store_id,
                customer_id = %conversation.customer_id,
                "Conversation created"
            );
            self.publish(&conversation);
        }

        Ok((conversation, created))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or(AppError::ConversationNotFound(id))
    }

    /// Conversations of a store, newest activity first. With `admin_id`,
    /// only those owned by or assigned to that admin.
    pub async fn list_for_store(
        &self,
        store_id: &str,
        admin_id: Option<&str>,
    ) -> AppResult<Vec<Conversation>> {
        let mut conversations = self.store.list_store_conversations(store_id).await?;
        if let Some(admin_id) = admin_id {
            conversations.retain(|c| c.is_handled_by(admin_id));
        }
        sort_by_activity(&mut conversations);
        Ok(conversations)
    }

    pub async fn list_for_customer(&self, customer_id: &str) -> AppResult<Vec<Conversation>> {
        let mut conversations = self.store.list_customer_conversations(customer_id).await?;
        sort_by_activity(&mut conversations);
        Ok(conversations)
    }

    /// Bump the other side's unread counter and point `last_message` at the
    /// new entry. Called once per successful ledger append.
    pub async fn on_message_appended(
        &self,
        id: Uuid,
        sender_type: ParticipantRole,
        last: LastMessage,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .record_append(id, sender_type.counterpart(), last, self.clock.now())
            .await?
            .ok_or(AppError::ConversationNotFound(id))?;
        self.publish(&conversation);
        Ok(conversation)
    }

    /// Zero the reader's unread counter. The other side is untouched.
    pub async fn mark_read(&self, id: Uuid, reader_role: ParticipantRole) -> AppResult<Conversation> {
        let conversation = self
            .store
            .reset_unread(id, reader_role, self.clock.now())
            .await?
            .ok_or(AppError::ConversationNotFound(id))?;
        self.publish(&conversation);
        Ok(conversation)
    }

    /// Re-point `last_message` at the newest non-deleted message.
    pub async fn refresh_last_message(&self, id: Uuid) -> AppResult<Conversation> {
        let latest = self.store.latest_message(id).await?;
        let conversation = self
            .store
            .set_last_message(id, latest.map(|m| m.preview()), self.clock.now())
            .await?
            .ok_or(AppError::ConversationNotFound(id))?;
        self.publish(&conversation);
        Ok(conversation)
    }

    pub async fn set_status(&self, id: Uuid, status: ConversationStatus) -> AppResult<Conversation> {
        let conversation = self
            .store
            .set_conversation_status(id, status, self.clock.now())
            .await?
            .ok_or(AppError::ConversationNotFound(id))?;
        tracing::info!(conversation_id = %id, ?status, "Conversation status changed");
        self.publish(&conversation);
        Ok(conversation)
    }

    pub async fn assign(&self, id: Uuid, assignee: Option<String>) -> AppResult<Conversation> {
        if let Some(admin) = &assignee {
            require_id("assignee", admin)?;
        }
        let conversation = self
            .store
            .assign_conversation(id, assignee, self.clock.now())
            .await?
            .ok_or(AppError::ConversationNotFound(id))?;
        self.publish(&conversation);
        Ok(conversation)
    }

    fn publish(&self, conversation: &Conversation) {
        self.hub.publish(
            &Topic::Conversations(conversation.store_id.clone()),
            &ChatEvent::ConversationUpdated(conversation.clone()),
        );
    }
}

fn sort_by_activity(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
}
