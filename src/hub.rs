//! In-process publish/subscribe fan-out.
//!
//! Subscribers register a callback against a [`Topic`] and get back an
//! opaque [`SubscriptionId`]. `publish` runs every callback registered on
//! the topic synchronously, in registration order. The registry lock is
//! never held while a callback runs, so callbacks may subscribe or
//! unsubscribe (themselves included) freely. A panicking callback is
//! logged and skipped; delivery continues with the next one.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message, MessageReaction, TypingIndicator};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    /// Ledger events of one conversation.
    Messages(Uuid),
    /// Typing indicators of one conversation.
    Typing(Uuid),
    /// Conversation list changes of one store.
    Conversations(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageCreated(Message),
    MessageUpdated(Message),
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_at: DateTime<Utc>,
    },
    MessagesRead {
        conversation_id: Uuid,
        reader_id: String,
        message_ids: Vec<Uuid>,
    },
    MessagesDelivered {
        conversation_id: Uuid,
        recipient_id: String,
        message_ids: Vec<Uuid>,
    },
    ReactionsChanged {
        conversation_id: Uuid,
        message_id: Uuid,
        reactions: Vec<MessageReaction>,
    },
    Typing(TypingIndicator),
    ConversationUpdated(Conversation),
}

pub type Callback = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<(SubscriptionId, Callback)>>,
    index: HashMap<SubscriptionId, Topic>,
}

#[derive(Default)]
pub struct SubscriptionHub {
    registry: Mutex<Registry>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        tracing::debug!(subscription = id.0, ?topic, "Subscriber registered");
        registry.index.insert(id, topic);
        id
    }

    /// Remove a subscription. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let Some(topic) = registry.index.remove(&id) else {
            return false;
        };
        if let Some(subscribers) = registry.topics.get_mut(&topic) {
            subscribers.retain(|(sid, _)| *sid != id);
            if subscribers.is_empty() {
                registry.topics.remove(&topic);
            }
        }
        tracing::debug!(subscription = id.0, ?topic, "Subscriber removed");
        true
    }

    /// Deliver `event` to every subscriber of `topic`. Returns how many
    /// callbacks completed without panicking.
    pub fn publish(&self, topic: &Topic, event: &ChatEvent) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback)> = match self.registry().topics.get(topic) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in snapshot {
            // Skip subscribers removed by an earlier callback in this round.
            if !self.registry().index.contains_key(&id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!(subscription = id.0, ?topic, %reason, "Subscriber callback failed");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry().topics.get(topic).map_or(0, Vec::len)
    }

    pub fn total_subscriptions(&self) -> usize {
        self.registry().index.len()
    }
}
