use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, AsyncCommands, AsyncIter, Client, Script};
use uuid::Uuid;

use super::EphemeralStore;
use crate::{
    error::AppResult,
    models::{PresenceRecord, TypingIndicator},
};

/// Typing and presence records in Redis.
///
/// Typing records live in one hash per conversation (`typing:{id}`, field
/// per user). The hash key carries a Redis TTL refreshed on every write, so
/// a conversation nobody types in any more is reclaimed whole; individual
/// stale fields are still filtered by `expires_at` on read. Presence
/// records (`presence:{user}`) have no Redis TTL so `last_seen` survives
/// going offline.
#[derive(Clone)]
pub struct RedisClient {
    conn: MultiplexedConnection,
    typing_key_ttl: Duration,
}

fn typing_key(conversation_id: Uuid) -> String {
    format!("typing:{}", conversation_id)
}

fn presence_key(user_id: &str) -> String {
    format!("presence:{}", user_id)
}

impl RedisClient {
    pub async fn new(url: &str, typing_key_ttl: Duration) -> AppResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            typing_key_ttl,
        })
    }

    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for RedisClient {
    async fn put_typing(&self, indicator: &TypingIndicator) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = typing_key(indicator.conversation_id);
        let payload = serde_json::to_string(indicator)?;
        let _: () = conn.hset(&key, &indicator.user_id, payload).await?;
        let _: () = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(self.typing_key_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn typing_records(&self, conversation_id: Uuid) -> AppResult<Vec<TypingIndicator>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(typing_key(conversation_id)).await?;
        let mut records = Vec::with_capacity(fields.len());
        for payload in fields.values() {
            records.push(serde_json::from_str(payload)?);
        }
        Ok(records)
    }

    async fn put_presence(&self, record: &PresenceRecord) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let _: () = conn.set(presence_key(&record.user_id), payload).await?;
        Ok(())
    }

    async fn presence_record(&self, user_id: &str) -> AppResult<Option<PresenceRecord>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(presence_key(user_id)).await?;
        match value {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter: AsyncIter<'_, String> = conn.scan_match("typing:*").await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let delete_if_unchanged = Script::new(DELETE_IF_UNCHANGED);
        let mut removed = 0;
        for key in keys {
            let fields: HashMap<String, String> = conn.hgetall(&key).await?;
            for (user, payload) in expired_fields(fields, now) {
                let deleted: usize = delete_if_unchanged
                    .key(&key)
                    .arg(&user)
                    .arg(&payload)
                    .invoke_async(&mut conn)
                    .await?;
                removed += deleted;
            }
        }
        Ok(removed)
    }
}

/// Deletes a hash field only if it still holds the payload the sweep read,
/// so a typer who refreshed in between keeps the new record.
const DELETE_IF_UNCHANGED: &str = r"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
    return redis.call('HDEL', KEYS[1], ARGV[1])
end
return 0
";

/// Fields of one typing hash whose record has expired. Unreadable payloads
/// count as expired.
fn expired_fields(fields: HashMap<String, String>, now: DateTime<Utc>) -> Vec<(String, String)> {
    fields
        .into_iter()
        .filter(|(_, payload)| {
            serde_json::from_str::<TypingIndicator>(payload)
                .map(|t| t.expires_at <= now)
                .unwrap_or(true)
        })
        .collect()
}
