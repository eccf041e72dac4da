use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use uuid::Uuid;

use super::locks::KeyedLocks;
use crate::{
    clock::{to_chrono, Clock},
    error::{AppError, AppResult},
    hub::{ChatEvent, SubscriptionHub, Topic},
    models::TypingIndicator,
    storage::EphemeralStore,
    timer::TimerService,
};

type TyperKey = (Uuid, String);

/// Typing side channel with a debounce timer per typer and an absolute
/// expiry on every stored record.
#[derive(Clone)]
pub struct TypingSignalBus {
    inner: Arc<Inner>,
}

struct Inner {
    ephemeral: Arc<dyn EphemeralStore>,
    hub: Arc<SubscriptionHub>,
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    expiry: Duration,
    locks: KeyedLocks<Uuid>,
    /// One entry per armed debounce. Re-arming bumps it so a timer that lost
    /// a race with a newer signal does nothing when it fires; stopping or
    /// clearing removes it.
    generations: DashMap<TyperKey, u64>,
    next_generation: AtomicU64,
}

fn timer_key(conversation_id: Uuid, user_id: &str) -> String {
    format!("typing:{}:{}", conversation_id, user_id)
}

impl TypingSignalBus {
    pub fn new(
        ephemeral: Arc<dyn EphemeralStore>,
        hub: Arc<SubscriptionHub>,
        timers: Arc<dyn TimerService>,
        clock: Arc<dyn Clock>,
        debounce: Duration,
        expiry: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ephemeral,
                hub,
                timers,
                clock,
                debounce,
                expiry,
                locks: KeyedLocks::new(),
                generations: DashMap::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Store and publish a typing signal. `true` (re)arms the debounce timer
    /// that later publishes `false` on the typer's behalf; `false` disarms it.
    pub async fn set_typing(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        user_name: &str,
        is_typing: bool,
    ) -> AppResult<TypingIndicator> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user_id must not be empty"));
        }

        let inner = &self.inner;
        let _guard = inner.locks.lock(&conversation_id).await;
        let indicator = inner.record(conversation_id, user_id, user_name, is_typing).await?;

        let key = timer_key(conversation_id, user_id);
        if is_typing {
            let generation = inner.bump(conversation_id, user_id);
            let bus = inner.clone();
            let (user_id, user_name) = (user_id.to_string(), user_name.to_string());
            inner.timers.start(
                &key,
                inner.debounce,
                Box::new(move || {
                    async move {
                        if let Err(e) = bus
                            .auto_clear(conversation_id, &user_id, &user_name, generation)
                            .await
                        {
                            tracing::warn!(
                                conversation_id = %conversation_id,
                                user_id = %user_id,
                                "Failed to clear typing state: {}",
                                e
                            );
                        }
                    }
                    .boxed()
                }),
            );
        } else {
            inner.disarm(conversation_id, user_id);
            inner.timers.cancel(&key);
        }

        Ok(indicator)
    }

    /// Users currently typing, by user id. Expired records are skipped.
    pub async fn get_active_typers(&self, conversation_id: Uuid) -> AppResult<Vec<TypingIndicator>> {
        let now = self.inner.clock.now();
        let mut active: Vec<TypingIndicator> = self
            .inner
            .ephemeral
            .typing_records(conversation_id)
            .await?
            .into_iter()
            .filter(|t| t.is_active(now))
            .collect();
        active.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(active)
    }

    pub fn has_pending_clear(&self, conversation_id: Uuid, user_id: &str) -> bool {
        self.inner
            .timers
            .is_pending(&timer_key(conversation_id, user_id))
    }
}

impl Inner {
    fn bump(&self, conversation_id: Uuid, user_id: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.generations
            .insert((conversation_id, user_id.to_string()), generation);
        generation
    }

    fn disarm(&self, conversation_id: Uuid, user_id: &str) {
        self.generations
            .remove(&(conversation_id, user_id.to_string()));
    }

    async fn record(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        user_name: &str,
        is_typing: bool,
    ) -> AppResult<TypingIndicator> {
        let now = self.clock.now();
        let indicator = TypingIndicator {
            conversation_id,
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            is_typing,
            timestamp: now,
            expires_at: now + to_chrono(self.expiry),
        };
        self.ephemeral.put_typing(&indicator).await?;
        self.hub.publish(
            &Topic::Typing(conversation_id),
            &ChatEvent::Typing(indicator.clone()),
        );
        Ok(indicator)
    }

    async fn auto_clear(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        user_name: &str,
        generation: u64,
    ) -> AppResult<()> {
        let _guard = self.locks.lock(&conversation_id).await;
        let current = self
            .generations
            .get(&(conversation_id, user_id.to_string()))
            .map(|g| *g);
        if current != Some(generation) {
            return Ok(());
        }
        self.disarm(conversation_id, user_id);
        tracing::debug!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            "Typing debounce elapsed"
        );
        self.record(conversation_id, user_id, user_name, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryEphemeralStore;
    use crate::timer::ManualTimers;
    use std::sync::Mutex;

    struct Fixture {
        bus: TypingSignalBus,
        timers: Arc<ManualTimers>,
        seen: Arc<Mutex<Vec<(String, bool)>>>,
        conversation_id: Uuid,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let timers = Arc::new(ManualTimers::new(clock.clone()));
        let hub = Arc::new(SubscriptionHub::new());
        let conversation_id = Uuid::new_v4();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        hub.subscribe(Topic::Typing(conversation_id), move |event| {
            if let ChatEvent::Typing(t) = event {
                s.lock().unwrap().push((t.user_id.clone(), t.is_typing));
            }
        });
        let bus = TypingSignalBus::new(
            Arc::new(MemoryEphemeralStore::new()),
            hub,
            timers.clone(),
            clock,
            Duration::from_secs(3),
            Duration::from_secs(5),
        );
        Fixture {
            bus,
            timers,
            seen,
            conversation_id,
        }
    }

    #[tokio::test]
    async fn debounce_publishes_stop_after_silence() {
        let f = fixture();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        assert_eq!(f.bus.get_active_typers(f.conversation_id).await.unwrap().len(), 1);

        f.timers.advance(Duration::from_millis(2999)).await;
        assert_eq!(f.seen.lock().unwrap().len(), 1);

        f.timers.advance(Duration::from_millis(1)).await;
        assert_eq!(
            *f.seen.lock().unwrap(),
            vec![("cust-1".to_string(), true), ("cust-1".to_string(), false)]
        );
        assert!(f.bus.get_active_typers(f.conversation_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retyping_rearms_the_timer() {
        let f = fixture();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        f.timers.advance(Duration::from_secs(2)).await;
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        f.timers.advance(Duration::from_secs(2)).await;
        assert!(f.seen.lock().unwrap().iter().all(|(_, typing)| *typing));

        f.timers.advance(Duration::from_secs(1)).await;
        assert_eq!(f.seen.lock().unwrap().last(), Some(&("cust-1".to_string(), false)));
    }

    #[tokio::test]
    async fn explicit_stop_cancels_pending_clear() {
        let f = fixture();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", false)
            .await
            .unwrap();
        assert!(!f.bus.has_pending_clear(f.conversation_id, "cust-1"));

        f.timers.advance(Duration::from_secs(10)).await;
        assert_eq!(f.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stale_records_are_filtered_at_read() {
        let f = fixture();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        // Drop the debounce timer as if the client vanished.
        f.timers.cancel(&timer_key(f.conversation_id, "cust-1"));

        f.timers.advance(Duration::from_secs(4)).await;
        assert_eq!(f.bus.get_active_typers(f.conversation_id).await.unwrap().len(), 1);
        f.timers.advance(Duration::from_secs(1)).await;
        assert!(f.bus.get_active_typers(f.conversation_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_typers_are_per_user() {
        let f = fixture();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        f.bus
            .set_typing(f.conversation_id, "admin-1", "Bob", true)
            .await
            .unwrap();
        let typers: Vec<String> = f
            .bus
            .get_active_typers(f.conversation_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.user_id)
            .collect();
        assert_eq!(typers, vec!["admin-1", "cust-1"]);
    }

    #[tokio::test]
    async fn finished_typers_leave_no_bookkeeping() {
        let f = fixture();
        f.bus
            .set_typing(f.conversation_id, "cust-1", "Alice", true)
            .await
            .unwrap();
        f.bus
            .set_typing(f.conversation_id, "admin-1", "Bob", true)
            .await
            .unwrap();
        assert_eq!(f.bus.inner.generations.len(), 2);

        f.bus
            .set_typing(f.conversation_id, "admin-1", "Bob", false)
            .await
            .unwrap();
        assert_eq!(f.bus.inner.generations.len(), 1);

        f.timers.advance(Duration::from_secs(3)).await;
        assert!(f.bus.inner.generations.is_empty());
        assert!(f.bus.inner.locks.is_empty());
    }
}
