use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;

use super::locks::KeyedLocks;
use crate::{
    clock::{to_chrono, Clock},
    error::{AppError, AppResult},
    models::{OnlineStatus, PresenceRecord},
    storage::EphemeralStore,
    timer::TimerService,
};

/// Heartbeat-driven online status.
///
/// Callers either send heartbeats themselves or open a session, in which
/// case a repeating timer keeps the record fresh until the last session of
/// that user ends.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

struct Inner {
    ephemeral: Arc<dyn EphemeralStore>,
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    ttl: Duration,
    sessions: DashMap<String, usize>,
    /// Serializes session changes and timed beats per user.
    locks: KeyedLocks<String>,
}

fn timer_key(user_id: &str) -> String {
    format!("presence:{}", user_id)
}

impl PresenceTracker {
    pub fn new(
        ephemeral: Arc<dyn EphemeralStore>,
        timers: Arc<dyn TimerService>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        ttl: Duration,
    ) -> AppResult<Self> {
        if ttl < interval * 2 {
            return Err(AppError::validation(format!(
                "presence TTL {:?} must be at least twice the heartbeat interval {:?}",
                ttl, interval
            )));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                ephemeral,
                timers,
                clock,
                interval,
                ttl,
                sessions: DashMap::new(),
                locks: KeyedLocks::new(),
            }),
        })
    }

    pub async fn heartbeat(&self, user_id: &str) -> AppResult<OnlineStatus> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user_id must not be empty"));
        }
        self.inner.beat(user_id).await
    }

    /// Online iff a heartbeat is still within its TTL. Unknown users are
    /// offline with `last_seen` set to now.
    pub async fn get_status(&self, user_id: &str) -> AppResult<OnlineStatus> {
        let now = self.inner.clock.now();
        Ok(match self.inner.ephemeral.presence_record(user_id).await? {
            Some(record) => record.status_at(now),
            None => OnlineStatus {
                user_id: user_id.to_string(),
                is_online: false,
                last_seen: now,
            },
        })
    }

    /// Register a live session (e.g. an open socket). The first session of a
    /// user beats immediately and starts the periodic heartbeat.
    pub async fn start_session(&self, user_id: &str) -> AppResult<OnlineStatus> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user_id must not be empty"));
        }
        let _guard = self.inner.locks.lock(&user_id.to_string()).await;
        let first = {
            let mut count = self.inner.sessions.entry(user_id.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };
        let status = self.inner.beat(user_id).await?;
        if first {
            tracing::debug!(user_id = %user_id, "Presence session opened");
            self.inner.schedule(user_id.to_string());
        }
        Ok(status)
    }

    /// Close one session. When the last one closes the periodic heartbeat
    /// stops and the user is recorded offline right away.
    pub async fn end_session(&self, user_id: &str) -> AppResult<OnlineStatus> {
        let guard = self.inner.locks.lock(&user_id.to_string()).await;
        let last = {
            match self.inner.sessions.get_mut(user_id) {
                Some(mut count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            }
        };
        if !last {
            drop(guard);
            return self.get_status(user_id).await;
        }

        self.inner.sessions.remove_if(user_id, |_, count| *count == 0);
        self.inner.timers.cancel(&timer_key(user_id));
        tracing::debug!(user_id = %user_id, "Presence session closed");

        let now = self.inner.clock.now();
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            is_online: false,
            last_seen: now,
            expires_at: now,
        };
        self.inner.ephemeral.put_presence(&record).await?;
        Ok(record.status_at(now))
    }

    pub fn active_sessions(&self, user_id: &str) -> usize {
        self.inner.sessions.get(user_id).map_or(0, |c| *c)
    }
}

impl Inner {
    async fn beat(&self, user_id: &str) -> AppResult<OnlineStatus> {
        let now = self.clock.now();
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            is_online: true,
            last_seen: now,
            expires_at: now + to_chrono(self.ttl),
        };
        self.ephemeral.put_presence(&record).await?;
        Ok(record.status_at(now))
    }

    fn schedule(self: &Arc<Self>, user_id: String) {
        let inner = self.clone();
        let key = timer_key(&user_id);
        self.timers.start(
            &key,
            self.interval,
            Box::new(move || {
                async move {
                    let _guard = inner.locks.lock(&user_id).await;
                    if !inner.sessions.contains_key(&user_id) {
                        return;
                    }
                    if let Err(e) = inner.beat(&user_id).await {
                        tracing::warn!(user_id = %user_id, "Heartbeat failed: {}", e);
                    }
                    inner.schedule(user_id);
                }
                .boxed()
            }),
        );
    }
}
