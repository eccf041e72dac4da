use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MessageType, ParticipantRole};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub store_id: String,
    pub customer_id: String,
    pub customer: ParticipantMeta,
    pub store_admin_id: String,
    pub admin: ParticipantMeta,
    pub last_message: Option<LastMessage>,
    pub unread_count: UnreadCount,
    pub status: ConversationStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: ConversationPriority,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation for a natural key, with zeroed unread counters.
    pub fn new(new: NewConversation, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store_id: new.store_id,
            customer_id: new.customer_id,
            customer: new.customer,
            store_admin_id: new.store_admin_id,
            admin: new.admin,
            last_message: None,
            unread_count: UnreadCount::default(),
            status: ConversationStatus::Active,
            tags: Vec::new(),
            priority: ConversationPriority::Normal,
            assigned_to: None,
            metadata: new.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey {
            store_id: self.store_id.clone(),
            customer_id: self.customer_id.clone(),
            store_admin_id: self.store_admin_id.clone(),
        }
    }

    /// Role a user plays in this conversation, if any.
    pub fn role_of(&self, user_id: &str) -> Option<ParticipantRole> {
        if user_id == self.customer_id {
            Some(ParticipantRole::Customer)
        } else if user_id == self.store_admin_id {
            Some(ParticipantRole::StoreAdmin)
        } else {
            None
        }
    }

    pub fn participant(&self, role: ParticipantRole) -> (&str, &ParticipantMeta) {
        match role {
            ParticipantRole::Customer => (&self.customer_id, &self.customer),
            ParticipantRole::StoreAdmin => (&self.store_admin_id, &self.admin),
        }
    }

    /// Sort key for conversation lists: last message time, else last update.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message
            .as_ref()
            .map(|m| m.timestamp)
            .unwrap_or(self.updated_at)
    }

    /// Whether the conversation is owned by or assigned to `admin_id`.
    pub fn is_handled_by(&self, admin_id: &str) -> bool {
        self.store_admin_id == admin_id || self.assigned_to.as_deref() == Some(admin_id)
    }
}

/// Idempotent creation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub store_id: String,
    pub customer_id: String,
    pub store_admin_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantMeta {
    pub name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl ParticipantMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub store_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub customer: ParticipantMeta,
    pub store_admin_id: String,
    #[serde(default)]
    pub admin: ParticipantMeta,
    pub metadata: Option<serde_json::Value>,
}

impl NewConversation {
    pub fn key(&self) -> ConversationKey {
        ConversationKey {
            store_id: self.store_id.clone(),
            customer_id: self.customer_id.clone(),
            store_admin_id: self.store_admin_id.clone(),
        }
    }
}

/// Denormalized preview of the most recent non-deleted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Uuid,
    pub content: String,
    pub sender_id: String,
    pub sender_type: ParticipantRole,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub customer: i64,
    pub admin: i64,
}

impl UnreadCount {
    pub fn slot_mut(&mut self, role: ParticipantRole) -> &mut i64 {
        match role {
            ParticipantRole::Customer => &mut self.customer,
            ParticipantRole::StoreAdmin => &mut self.admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversation_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}
