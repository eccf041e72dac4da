use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AttachmentRef, LastMessage, MessageReaction};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Insertion sequence within the conversation; breaks timestamp ties.
    pub sequence: i64,
    pub sender_id: String,
    pub sender_type: ParticipantRole,
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub attachment: Option<AttachmentRef>,
    pub status: MessageStatus,
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub reactions: Vec<MessageReaction>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Ledger ordering key.
    pub fn position(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.sequence)
    }

    pub fn preview(&self) -> LastMessage {
        LastMessage {
            message_id: self.id,
            content: self.content.clone(),
            sender_id: self.sender_id.clone(),
            sender_type: self.sender_type,
            message_type: self.message_type,
            timestamp: self.created_at,
        }
    }
}

/// Which side of a conversation a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Customer,
    #[serde(alias = "admin")]
    StoreAdmin,
}

impl ParticipantRole {
    /// The other side, whose unread counter a message from `self` bumps.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Customer => Self::StoreAdmin,
            Self::StoreAdmin => Self::Customer,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Voice,
    System,
}

impl MessageType {
    pub fn requires_attachment(self) -> bool {
        matches!(self, Self::Image | Self::File | Self::Voice)
    }
}

/// Delivery status. Variant order is the only allowed direction of travel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "message_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

impl Default for MessageStatus {
    fn default() -> Self {
        Self::Sent
    }
}

impl MessageStatus {
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next >= self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: String,
    pub sender_type: ParticipantRole,
    pub sender_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub attachment: Option<AttachmentRef>,
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    pub fn text(
        conversation_id: Uuid,
        sender_id: impl Into<String>,
        sender_type: ParticipantRole,
        sender_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            sender_id: sender_id.into(),
            sender_type,
            sender_name: sender_name.into(),
            content: content.into(),
            message_type: MessageType::Text,
            attachment: None,
            reply_to: None,
        }
    }
}

/// Sequence number and timestamp reserved for the next ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSlot {
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(MessageStatus::Read.can_advance_to(MessageStatus::Read));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Sending));
    }

    #[test]
    fn roles_are_counterparts() {
        assert_eq!(
            ParticipantRole::Customer.counterpart(),
            ParticipantRole::StoreAdmin
        );
        assert_eq!(
            ParticipantRole::StoreAdmin.counterpart(),
            ParticipantRole::Customer
        );
    }

    #[test]
    fn role_accepts_admin_alias() {
        let role: ParticipantRole = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, ParticipantRole::StoreAdmin);
        assert_eq!(
            serde_json::to_string(&ParticipantRole::StoreAdmin).unwrap(),
            "\"store_admin\""
        );
    }
}
