//! Keyed, cancelable one-shot timers.
//!
//! Typing debounce and presence heartbeats both schedule work per entity.
//! [`TokioTimers`] runs them on the runtime; [`ManualTimers`] fires them
//! from a [`ManualClock`] so tests never wait on wall time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::clock::{to_chrono, Clock, ManualClock};

pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub trait TimerService: Send + Sync {
    /// Schedule `callback` after `delay`, replacing any timer under `key`.
    fn start(&self, key: &str, delay: Duration, callback: TimerCallback);

    /// Cancel the timer under `key`. Returns whether one was pending.
    fn cancel(&self, key: &str) -> bool;

    fn is_pending(&self, key: &str) -> bool;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timers backed by spawned tokio tasks. Must be used inside a runtime.
#[derive(Clone, Default)]
pub struct TokioTimers {
    tasks: Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>,
    next_id: Arc<AtomicU64>,
}

impl TokioTimers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimerService for TokioTimers {
    fn start(&self, key: &str, delay: Duration, callback: TimerCallback) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = self.tasks.clone();
        let owned_key = key.to_string();

        let mut guard = lock(&self.tasks);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only fire if this task still owns the key.
            let still_owner = {
                let mut tasks = lock(&tasks);
                match tasks.get(&owned_key) {
                    Some((current, _)) if *current == id => {
                        tasks.remove(&owned_key);
                        true
                    }
                    _ => false,
                }
            };
            if still_owner {
                callback().await;
            }
        });
        if let Some((_, previous)) = guard.insert(key.to_string(), (id, handle)) {
            previous.abort();
        }
    }

    fn cancel(&self, key: &str) -> bool {
        match lock(&self.tasks).remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn is_pending(&self, key: &str) -> bool {
        lock(&self.tasks).contains_key(key)
    }
}

struct PendingTimer {
    due: DateTime<Utc>,
    order: u64,
    callback: TimerCallback,
}

/// Fake-clock timers. Nothing fires until [`ManualTimers::advance`] is awaited.
pub struct ManualTimers {
    clock: Arc<ManualClock>,
    pending: Mutex<HashMap<String, PendingTimer>>,
    next_order: AtomicU64,
}

impl ManualTimers {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            pending: Mutex::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Move the clock forward, firing due timers in deadline order.
    ///
    /// Callbacks may schedule new timers; those fire too if they fall due
    /// before the target instant.
    pub async fn advance(&self, by: Duration) {
        let target = self.clock.now() + to_chrono(by);
        loop {
            let next = {
                let mut pending = lock(&self.pending);
                let key = pending
                    .iter()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.order))
                    .map(|(k, _)| k.clone());
                key.and_then(|k| pending.remove(&k))
            };
            match next {
                Some(timer) => {
                    if timer.due > self.clock.now() {
                        self.clock.set(timer.due);
                    }
                    (timer.callback)().await;
                }
                None => break,
            }
        }
        self.clock.set(target);
    }
}

impl TimerService for ManualTimers {
    fn start(&self, key: &str, delay: Duration, callback: TimerCallback) {
        let timer = PendingTimer {
            due: self.clock.now() + to_chrono(delay),
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
            callback,
        };
        lock(&self.pending).insert(key.to_string(), timer);
    }

    fn cancel(&self, key: &str) -> bool {
        lock(&self.pending).remove(key).is_some()
    }

    fn is_pending(&self, key: &str) -> bool {
        lock(&self.pending).contains_key(key)
    }
}
