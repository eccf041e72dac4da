use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineStatus {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Stored heartbeat record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn status_at(&self, now: DateTime<Utc>) -> OnlineStatus {
        OnlineStatus {
            user_id: self.user_id.clone(),
            is_online: self.is_online && self.expires_at > now,
            last_seen: self.last_seen,
        }
    }
}
