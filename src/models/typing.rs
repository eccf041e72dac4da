use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub conversation_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub is_typing: bool,
    pub timestamp: DateTime<Utc>,
    /// Server-side safety expiry, independent of the client debounce.
    pub expires_at: DateTime<Utc>,
}

impl TypingIndicator {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_typing && self.expires_at > now
    }
}
