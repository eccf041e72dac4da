use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single user's reaction to a message. At most one per `(message_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MessageReaction {
    pub message_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}
