use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use super::ChatStore;
use crate::{
    error::AppResult,
    models::{
        AttachmentRef, Conversation, ConversationKey, ConversationPriority, ConversationStatus,
        LastMessage, Message, MessageReaction, MessageSlot, MessageStatus, MessageType,
        ParticipantMeta, ParticipantRole, UnreadCount,
    },
};

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    store_id: String,
    customer_id: String,
    customer_meta: Json<ParticipantMeta>,
    store_admin_id: String,
    admin_meta: Json<ParticipantMeta>,
    last_message: Option<Json<LastMessage>>,
    unread_customer: i64,
    unread_admin: i64,
    status: ConversationStatus,
    tags: Vec<String>,
    priority: ConversationPriority,
    assigned_to: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            store_id: row.store_id,
            customer_id: row.customer_id,
            customer: row.customer_meta.0,
            store_admin_id: row.store_admin_id,
            admin: row.admin_meta.0,
            last_message: row.last_message.map(|j| j.0),
            unread_count: UnreadCount {
                customer: row.unread_customer,
                admin: row.unread_admin,
            },
            status: row.status,
            tags: row.tags,
            priority: row.priority,
            assigned_to: row.assigned_to,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sequence: i64,
    sender_id: String,
    sender_type: ParticipantRole,
    sender_name: String,
    content: String,
    #[sqlx(rename = "type")]
    message_type: MessageType,
    file_url: Option<String>,
    file_name: Option<String>,
    file_size: Option<i64>,
    mime_type: Option<String>,
    status: MessageStatus,
    reply_to: Option<Uuid>,
    edited_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self, reactions: Vec<MessageReaction>) -> Message {
        let attachment = self.file_url.map(|url| AttachmentRef {
            url,
            file_name: self.file_name.unwrap_or_default(),
            file_size: self.file_size.unwrap_or_default(),
            mime_type: self.mime_type.unwrap_or_default(),
        });
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sequence: self.sequence,
            sender_id: self.sender_id,
            sender_type: self.sender_type,
            sender_name: self.sender_name,
            content: self.content,
            message_type: self.message_type,
            attachment,
            status: self.status,
            reply_to: self.reply_to,
            reactions,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
        }
    }
}

fn unread_column(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Customer => "unread_customer",
        ParticipantRole::StoreAdmin => "unread_admin",
    }
}

/// Conversations and messages in PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    db: PgPool,
}

impl PostgresStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn reactions_for(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<MessageReaction>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let reactions: Vec<MessageReaction> = sqlx::query_as(
            "SELECT * FROM message_reactions WHERE message_id = ANY($1) ORDER BY created_at, user_id",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.db)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<MessageReaction>> = HashMap::new();
        for reaction in reactions {
            grouped.entry(reaction.message_id).or_default().push(reaction);
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<MessageRow>) -> AppResult<Vec<Message>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut reactions = self.reactions_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let own = reactions.remove(&row.id).unwrap_or_default();
                row.into_message(own)
            })
            .collect())
    }

    async fn hydrate_one(&self, row: Option<MessageRow>) -> AppResult<Option<Message>> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChatStore for PostgresStore {
    async fn find_conversation(&self, key: &ConversationKey) -> AppResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT * FROM conversations
            WHERE store_id = $1 AND customer_id = $2 AND store_admin_id = $3
            "#,
        )
        .bind(&key.store_id)
        .bind(&key.customer_id)
        .bind(&key.store_admin_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation> {
        let inserted: Option<ConversationRow> = sqlx::query_as(
            r#"
            INSERT INTO conversations (
                id, store_id, customer_id, customer_meta, store_admin_id, admin_meta,
                status, tags, priority, assigned_to, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (store_id, customer_id, store_admin_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(conversation.id)
        .bind(&conversation.store_id)
        .bind(&conversation.customer_id)
        .bind(Json(&conversation.customer))
        .bind(&conversation.store_admin_id)
        .bind(Json(&conversation.admin))
        .bind(conversation.status)
        .bind(&conversation.tags)
        .bind(conversation.priority)
        .bind(&conversation.assigned_to)
        .bind(&conversation.metadata)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        // Lost the creation race: the existing row wins.
        let existing: ConversationRow = sqlx::query_as(
            r#"
            SELECT * FROM conversations
            WHERE store_id = $1 AND customer_id = $2 AND store_admin_id = $3
            "#,
        )
        .bind(&conversation.store_id)
        .bind(&conversation.customer_id)
        .bind(&conversation.store_admin_id)
        .fetch_one(&self.db)
        .await?;

        Ok(existing.into())
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let row: Option<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn list_store_conversations(&self, store_id: &str) -> AppResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversations WHERE store_id = $1")
                .bind(store_id)
                .fetch_all(&self.db)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_customer_conversations(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> =
            sqlx::query_as("SELECT * FROM conversations WHERE customer_id = $1")
                .bind(customer_id)
                .fetch_all(&self.db)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_append(
        &self,
        id: Uuid,
        recipient: ParticipantRole,
        last: LastMessage,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        // Column-level increment so concurrent appends never lose a bump.
        let column = unread_column(recipient);
        let sql = format!(
            "UPDATE conversations SET {column} = {column} + 1, last_message = $2, updated_at = $3 \
             WHERE id = $1 RETURNING *"
        );
        let row: Option<ConversationRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(Json(&last))
            .bind(at)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn set_last_message(
        &self,
        id: Uuid,
        last: Option<LastMessage>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "UPDATE conversations SET last_message = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(last.as_ref().map(Json))
        .bind(at)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn reset_unread(
        &self,
        id: Uuid,
        role: ParticipantRole,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let column = unread_column(role);
        let sql = format!(
            "UPDATE conversations SET {column} = 0, updated_at = $2 WHERE id = $1 RETURNING *"
        );
        let row: Option<ConversationRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn set_conversation_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "UPDATE conversations SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn assign_conversation(
        &self,
        id: Uuid,
        assignee: Option<String>,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            "UPDATE conversations SET assigned_to = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(assignee)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn next_message_slot(
        &self,
        conversation_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<MessageSlot>> {
        let slot: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE conversations
            SET message_seq = message_seq + 1,
                last_slot_at = GREATEST(COALESCE(last_slot_at, $2), $2)
            WHERE id = $1
            RETURNING message_seq, last_slot_at
            "#,
        )
        .bind(conversation_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(slot.map(|(sequence, timestamp)| MessageSlot {
            sequence,
            timestamp,
        }))
    }

    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        let attachment = message.attachment.as_ref();
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, conversation_id, sequence, sender_id, sender_type, sender_name, content, type,
                file_url, file_name, file_size, mime_type, status, reply_to, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sequence)
        .bind(&message.sender_id)
        .bind(message.sender_type)
        .bind(&message.sender_name)
        .bind(&message.content)
        .bind(message.message_type)
        .bind(attachment.map(|a| a.url.clone()))
        .bind(attachment.map(|a| a.file_name.clone()))
        .bind(attachment.map(|a| a.file_size))
        .bind(attachment.map(|a| a.mime_type.clone()))
        .bind(message.status)
        .bind(message.reply_to)
        .bind(message.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        self.hydrate_one(row).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC, sequence ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.db)
        .await?;

        self.hydrate(rows).await
    }

    async fn latest_message(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC, sequence DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;

        self.hydrate_one(row).await
    }

    async fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "UPDATE messages SET content = $2, edited_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(content)
        .bind(edited_at)
        .fetch_optional(&self.db)
        .await?;

        self.hydrate_one(row).await
    }

    async fn soft_delete_message(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "UPDATE messages SET deleted_at = COALESCE(deleted_at, $2) WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;

        self.hydrate_one(row).await
    }

    async fn advance_message_status(
        &self,
        id: Uuid,
        status: MessageStatus,
    ) -> AppResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            r#"
            UPDATE messages
            SET status = CASE WHEN status < $2 THEN $2 ELSE status END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.db)
        .await?;

        self.hydrate_one(row).await
    }

    async fn advance_conversation_statuses(
        &self,
        conversation_id: Uuid,
        exclude_sender: &str,
        status: MessageStatus,
    ) -> AppResult<Vec<Uuid>> {
        let moved: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE messages SET status = $3
            WHERE conversation_id = $1 AND sender_id <> $2 AND status < $3
            RETURNING id
            "#,
        )
        .bind(conversation_id)
        .bind(exclude_sender)
        .bind(status)
        .fetch_all(&self.db)
        .await?;

        Ok(moved.into_iter().map(|(id,)| id).collect())
    }

    async fn upsert_reaction(
        &self,
        reaction: &MessageReaction,
    ) -> AppResult<Vec<MessageReaction>> {
        sqlx::query(
            r#"
            INSERT INTO message_reactions (message_id, user_id, user_name, emoji, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (message_id, user_id)
            DO UPDATE SET user_name = EXCLUDED.user_name,
                          emoji = EXCLUDED.emoji,
                          created_at = EXCLUDED.created_at
            "#,
        )
        .bind(reaction.message_id)
        .bind(&reaction.user_id)
        .bind(&reaction.user_name)
        .bind(&reaction.emoji)
        .bind(reaction.created_at)
        .execute(&self.db)
        .await?;

        Ok(self
            .reactions_for(&[reaction.message_id])
            .await?
            .remove(&reaction.message_id)
            .unwrap_or_default())
    }

    async fn remove_reaction(&self, message_id: Uuid, user_id: &str) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2")
                .bind(message_id)
                .bind(user_id)
                .execute(&self.db)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
