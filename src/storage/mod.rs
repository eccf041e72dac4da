//! Storage ports and their adapters.
//!
//! The engine only assumes a keyed document store. Conversations and
//! messages go through [`ChatStore`]; typing and presence records, which
//! carry their own expiry, go through [`EphemeralStore`]. File bytes never
//! reach the engine: [`AttachmentGateway`] turns them into a descriptor.

pub mod memory;
pub mod minio;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    AttachmentMetadata, AttachmentRef, Conversation, ConversationKey, ConversationStatus,
    LastMessage, Message, MessageReaction, MessageSlot, MessageStatus, ParticipantRole,
    PresenceRecord, TypingIndicator,
};

/// Durable conversation and message documents.
///
/// Methods returning `Option` yield `None` when the addressed record does
/// not exist; the services turn that into a not-found error.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // Conversations
    async fn find_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>>;

    /// Insert unless a conversation with the same natural key exists.
    /// Returns whichever record won.
    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation>;

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    async fn list_store_conversations(&self, store_id: &str) -> AppResult<Vec<Conversation>>;

    async fn list_customer_conversations(&self, customer_id: &str)
        -> AppResult<Vec<Conversation>>;

    /// Atomically bump `recipient`'s unread counter and replace `last_message`.
    async fn record_append(
        &self,
        id: Uuid,
        recipient: ParticipantRole,
        last: LastMessage,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>>;

    async fn set_last_message(
        &self,
        id: Uuid,
        last: Option<LastMessage>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>>;

    async fn reset_unread(
        &self,
        id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>>;

    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>>;

    async fn assign_conversation(
        &self,
        id: Uuid,
        assignee: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>>;

    // Messages

    /// Reserve the next `(timestamp, sequence)` pair of a conversation.
    /// The timestamp never goes below the previously reserved one.
    async fn next_message_slot(
        &self,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<MessageSlot>>;

    async fn insert_message(&self, message: &Message) -> AppResult<()>;

    /// Fetch by id, deleted or not.
    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Non-deleted messages oldest first; paging applies after filtering.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Message>>;

    /// Newest non-deleted message.
    async fn latest_message(&self, conversation_id: Uuid) -> AppResult<Option<Message>>;

    async fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Option<Message>>;

    /// Set `deleted_at` unless already set.
    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>)
        -> AppResult<Option<Message>>;

    /// Move one message forward to `status`. Never moves it backward.
    async fn advance_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> AppResult<Option<Message>>;

    /// Move every message of the conversation not sent by `exclude_sender`
    /// and still behind `status` up to `status`. Returns the moved ids.
    async fn advance_conversation_statuses(
        &self,
        conversation_id: Uuid,
        exclude_sender: &str,
        status: MessageStatus,
    ) -> AppResult<Vec<Uuid>>;

    // Reactions

    /// Replace-or-insert keyed by `(message_id, user_id)`. Returns the
    /// message's full reaction set afterwards.
    async fn upsert_reaction(&self, reaction: &MessageReaction)
        -> AppResult<Vec<MessageReaction>>;

    /// Returns whether a reaction was removed.
    async fn remove_reaction(&self, message_id: Uuid, user_id: &str) -> AppResult<bool>;
}

/// Short-lived records with an absolute `expires_at`. Readers filter
/// expired records themselves; purging is optional.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn put_typing(&self, indicator: &TypingIndicator) -> AppResult<()>;

    /// All stored typing records of a conversation, expired ones included.
    async fn typing_records(&self, conversation_id: Uuid) -> AppResult<Vec<TypingIndicator>>;

    async fn put_presence(&self, record: &PresenceRecord) -> AppResult<()>;

    async fn presence_record(&self, user_id: &str) -> AppResult<Option<PresenceRecord>>;

    /// Remove typing records past expiry. Presence records are kept since
    /// they carry the last known `last_seen`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<usize>;
}

/// External file store. Accepts bytes, hands back a durable descriptor.
#[async_trait]
pub trait AttachmentGateway: Send + Sync {
    async fn upload(&self, data: Bytes, metadata: AttachmentMetadata) -> AppResult<AttachmentRef>;
}
