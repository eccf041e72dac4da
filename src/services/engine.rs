use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    conversations::ConversationStore, ledger::MessageLedger, locks::KeyedLocks,
    presence::PresenceTracker, reactions::ReactionRegistry, typing::TypingSignalBus,
};
use crate::{
    clock::Clock,
    config::ChatConfig,
    error::{AppError, AppResult},
    hub::{ChatEvent, SubscriptionHub, SubscriptionId, Topic},
    models::{
        Conversation, ConversationStatus, Message, MessageReaction, MessageStatus, MessageType,
        NewConversation, NewMessage, OnlineStatus, ParticipantRole, TypingIndicator,
    },
    storage::{ChatStore, EphemeralStore},
    timer::TimerService,
};

/// Message sent together with a newly created conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialMessage {
    pub sender_type: ParticipantRole,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
}

/// The public face of the conversation engine. Wires the components
/// together over one hub, one clock and one set of conversation locks.
pub struct ChatEngine {
    hub: Arc<SubscriptionHub>,
    clock: Arc<dyn Clock>,
    ephemeral: Arc<dyn EphemeralStore>,
    conversations: ConversationStore,
    ledger: MessageLedger,
    reactions: ReactionRegistry,
    typing: TypingSignalBus,
    presence: PresenceTracker,
    default_page_size: usize,
    max_page_size: usize,
}

impl ChatEngine {
    pub fn new(
        store: Arc<dyn ChatStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        timers: Arc<dyn TimerService>,
        clock: Arc<dyn Clock>,
        config: &ChatConfig,
    ) -> AppResult<Self> {
        config.validate()?;

        let hub = Arc::new(SubscriptionHub::new());
        let locks = KeyedLocks::new();
        let conversations = ConversationStore::new(store.clone(), hub.clone(), clock.clone());
        let ledger = MessageLedger::new(
            store.clone(),
            conversations.clone(),
            hub.clone(),
            clock.clone(),
            locks.clone(),
        );
        let reactions = ReactionRegistry::new(store, hub.clone(), clock.clone(), locks);
        let typing = TypingSignalBus::new(
            ephemeral.clone(),
            hub.clone(),
            timers.clone(),
            clock.clone(),
            config.typing_debounce,
            config.typing_expiry,
        );
        let presence = PresenceTracker::new(
            ephemeral.clone(),
            timers,
            clock.clone(),
            config.heartbeat_interval,
            config.presence_ttl,
        )?;

        Ok(Self {
            hub,
            clock,
            ephemeral,
            conversations,
            ledger,
            reactions,
            typing,
            presence,
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
        })
    }

    // Conversations

    /// Idempotent by `(store_id, customer_id, store_admin_id)`. The initial
    /// message is only sent when this call created the conversation.
    pub async fn create_or_get_conversation(
        &self,
        new: NewConversation,
        initial: Option<InitialMessage>,
    ) -> AppResult<Conversation> {
        let (conversation, created) = self.conversations.create_or_get(new).await?;
        let Some(initial) = initial.filter(|_| created) else {
            return Ok(conversation);
        };

        let (sender_id, meta) = conversation.participant(initial.sender_type);
        let mut message = NewMessage::text(
            conversation.id,
            sender_id,
            initial.sender_type,
            meta.name.clone(),
            initial.content,
        );
        message.message_type = initial.message_type;
        self.ledger.append(message).await?;

        self.conversations.get(conversation.id).await
    }

    pub async fn get_conversation(&self, id: Uuid) -> AppResult<Conversation> {
        self.conversations.get(id).await
    }

    pub async fn list_store_conversations(
        &self,
        store_id: &str,
        admin_id: Option<&str>,
    ) -> AppResult<Vec<Conversation>> {
        self.conversations.list_for_store(store_id, admin_id).await
    }

    pub async fn list_customer_conversations(&self, customer_id: &str) -> AppResult<Vec<Conversation>> {
        self.conversations.list_for_customer(customer_id).await
    }

    pub async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
    ) -> AppResult<Conversation> {
        self.conversations.set_status(id, status).await
    }

    pub async fn assign_conversation(&self, id: Uuid, admin_id: Option<String>) -> AppResult<Conversation> {
        self.conversations.assign(id, admin_id).await
    }

    // Messages

    pub async fn send_message(&self, new: NewMessage) -> AppResult<Message> {
        self.ledger.append(new).await
    }

    /// Page through a conversation. `limit` falls back to the default page
    /// size and is capped at the maximum.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> AppResult<Vec<Message>> {
        let limit = limit
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        self.ledger
            .list(conversation_id, limit, offset.unwrap_or(0))
            .await
    }

    pub async fn get_message(&self, message_id: Uuid) -> AppResult<Message> {
        self.ledger.get(message_id).await
    }

    pub async fn mark_messages_as_read(
        &self,
        conversation_id: Uuid,
        reader_id: &str,
        reader_role: ParticipantRole,
    ) -> AppResult<Vec<Uuid>> {
        self.ledger.mark_read(conversation_id, reader_id, reader_role).await
    }

    pub async fn mark_messages_as_delivered(
        &self,
        conversation_id: Uuid,
        recipient_id: &str,
    ) -> AppResult<Vec<Uuid>> {
        self.ledger.mark_delivered(conversation_id, recipient_id).await
    }

    pub async fn advance_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> AppResult<Message> {
        self.ledger.advance_status(message_id, status).await
    }

    pub async fn edit_message(&self, message_id: Uuid, content: &str) -> AppResult<Message> {
        self.ledger.edit(message_id, content).await
    }

    pub async fn delete_message(&self, message_id: Uuid) -> AppResult<()> {
        self.ledger.soft_delete(message_id).await
    }

    // Reactions

    pub async fn add_reaction(
        &self,
        message_id: Uuid,
        user_id: &str,
        user_name: &str,
        emoji: &str,
    ) -> AppResult<MessageReaction> {
        self.reactions
            .add(message_id, user_id, user_name, emoji)
            .await?
            .into_iter()
            .find(|r| r.user_id == user_id)
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "reaction of {} on {} was not stored",
                    user_id,
                    message_id
                ))
            })
    }

    pub async fn remove_reaction(&self, message_id: Uuid, user_id: &str) -> AppResult<()> {
        self.reactions.remove(message_id, user_id).await?;
        Ok(())
    }

    pub async fn list_reactions(&self, message_id: Uuid) -> AppResult<Vec<MessageReaction>> {
        self.reactions.list(message_id).await
    }

    // Typing and presence

    pub async fn set_typing(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        user_name: &str,
        is_typing: bool,
    ) -> AppResult<TypingIndicator> {
        self.typing
            .set_typing(conversation_id, user_id, user_name, is_typing)
            .await
    }

    pub async fn get_active_typers(&self, conversation_id: Uuid) -> AppResult<Vec<TypingIndicator>> {
        self.typing.get_active_typers(conversation_id).await
    }

    pub async fn heartbeat(&self, user_id: &str) -> AppResult<OnlineStatus> {
        self.presence.heartbeat(user_id).await
    }

    pub async fn get_online_status(&self, user_id: &str) -> AppResult<OnlineStatus> {
        self.presence.get_status(user_id).await
    }

    pub async fn start_presence_session(&self, user_id: &str) -> AppResult<OnlineStatus> {
        self.presence.start_session(user_id).await
    }

    pub async fn end_presence_session(&self, user_id: &str) -> AppResult<OnlineStatus> {
        self.presence.end_session(user_id).await
    }

    // Subscriptions

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.hub.subscribe(topic, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    // Maintenance

    /// Purge expired ephemeral records now. Reads filter by expiry anyway.
    pub async fn purge_expired(&self) -> AppResult<usize> {
        self.ephemeral.purge_expired(self.clock.now()).await
    }

    /// Run [`ChatEngine::purge_expired`] every `interval` until the task is
    /// aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match engine.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Purged expired ephemeral records"),
                    Err(e) => tracing::warn!("Ephemeral sweep failed: {}", e),
                }
            }
        })
    }
}
