use std::sync::Arc;

use uuid::Uuid;

use super::{conversations::ConversationStore, locks::KeyedLocks};
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    hub::{ChatEvent, SubscriptionHub, Topic},
    models::{Conversation, Message, MessageStatus, MessageType, NewMessage, ParticipantRole},
    storage::ChatStore,
};

/// Append-ordered, soft-delete log of messages per conversation.
///
/// Every mutation of a conversation's ledger runs under that conversation's
/// lock, so `(timestamp, sequence)` order, store order, and publish order
/// agree within the process.
#[derive(Clone)]
pub struct MessageLedger {
    store: Arc<dyn ChatStore>,
    conversations: ConversationStore,
    hub: Arc<SubscriptionHub>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<Uuid>,
}

fn validate_content(message_type: MessageType, content: &str) -> AppResult<()> {
    if !message_type.requires_attachment() && content.trim().is_empty() {
        return Err(AppError::validation("message content must not be empty"));
    }
    Ok(())
}

/// `user_id` must be the participant playing `role`, otherwise the unread
/// counters would track the wrong side.
fn require_role(conversation: &Conversation, user_id: &str, role: ParticipantRole) -> AppResult<()> {
    match conversation.role_of(user_id) {
        Some(actual) if actual == role => Ok(()),
        Some(actual) => Err(AppError::validation(format!(
            "{} is the {:?} of this conversation, not the {:?}",
            user_id, actual, role
        ))),
        None => Err(AppError::validation(format!(
            "{} is not a participant of this conversation",
            user_id
        ))),
    }
}

impl MessageLedger {
    pub fn new(
        store: Arc<dyn ChatStore>,
        conversations: ConversationStore,
        hub: Arc<SubscriptionHub>,
        clock: Arc<dyn Clock>,
        locks: KeyedLocks<Uuid>,
    ) -> Self {
        Self {
            store,
            conversations,
            hub,
            clock,
            locks,
        }
    }

    /// Append a message. The store write happens before the publish, and the
    /// publish before the conversation's counters move.
    pub async fn append(&self, new: NewMessage) -> AppResult<Message> {
        if new.sender_id.trim().is_empty() {
            return Err(AppError::validation("sender_id must not be empty"));
        }
        validate_content(new.message_type, &new.content)?;
        if new.message_type.requires_attachment() && new.attachment.is_none() {
            return Err(AppError::validation(format!(
                "{:?} messages require an attachment",
                new.message_type
            )));
        }

        let conversation_id = new.conversation_id;
        let _guard = self.locks.lock(&conversation_id).await;

        // Checked up front so a bad id or sender never allocates a slot.
        let conversation = self.conversations.get(conversation_id).await?;
        require_role(&conversation, &new.sender_id, new.sender_type)?;

        if let Some(reply_to) = new.reply_to {
            let target = self
                .store
                .get_message(reply_to)
                .await?
                .ok_or(AppError::MessageNotFound(reply_to))?;
            if target.conversation_id != conversation_id {
                return Err(AppError::validation(
                    "reply_to must reference a message in the same conversation",
                ));
            }
        }

        let slot = self
            .store
            .next_message_slot(conversation_id, self.clock.now())
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sequence: slot.sequence,
            sender_id: new.sender_id,
            sender_type: new.sender_type,
            sender_name: new.sender_name,
            content: new.content,
            message_type: new.message_type,
            attachment: new.attachment,
            status: MessageStatus::Sent,
            reply_to: new.reply_to,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
            created_at: slot.timestamp,
        };
        self.store.insert_message(&message).await?;

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            sequence = message.sequence,
            "Message appended"
        );

        self.hub.publish(
            &Topic::Messages(conversation_id),
            &ChatEvent::MessageCreated(message.clone()),
        );

        self.conversations
            .on_message_appended(conversation_id, message.sender_type, message.preview())
            .await?;

        Ok(message)
    }

    /// Non-deleted messages oldest first. Paging counts only visible messages.
    pub async fn list(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Message>> {
        self.conversations.get(conversation_id).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.list_messages(conversation_id, limit, offset).await
    }

    /// Lookup by id. Deleted messages are returned too.
    pub async fn get(&self, message_id: Uuid) -> AppResult<Message> {
        self.store
            .get_message(message_id)
            .await?
            .ok_or(AppError::MessageNotFound(message_id))
    }

    pub async fn edit(&self, message_id: Uuid, new_content: &str) -> AppResult<Message> {
        let current = self.get(message_id).await?;
        validate_content(current.message_type, new_content)?;

        let _guard = self.locks.lock(&current.conversation_id).await;
        if self.get(message_id).await?.is_deleted() {
            return Err(AppError::conflict("cannot edit a deleted message"));
        }

        let edited = self
            .store
            .update_message_content(message_id, new_content, self.clock.now())
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;

        self.hub.publish(
            &Topic::Messages(edited.conversation_id),
            &ChatEvent::MessageUpdated(edited.clone()),
        );
        self.refresh_preview_if_latest(&edited).await?;

        Ok(edited)
    }

    /// Hide a message from `list`. Deleting twice keeps the first timestamp.
    pub async fn soft_delete(&self, message_id: Uuid) -> AppResult<()> {
        let current = self.get(message_id).await?;
        if current.is_deleted() {
            return Ok(());
        }

        let _guard = self.locks.lock(&current.conversation_id).await;
        let deleted = self
            .store
            .soft_delete_message(message_id, self.clock.now())
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;

        let Some(deleted_at) = deleted.deleted_at else {
            return Err(AppError::Internal(anyhow::anyhow!(
                "store did not record deletion of {}",
                message_id
            )));
        };
        tracing::debug!(message_id = %message_id, "Message soft-deleted");

        self.hub.publish(
            &Topic::Messages(deleted.conversation_id),
            &ChatEvent::MessageDeleted {
                conversation_id: deleted.conversation_id,
                message_id,
                deleted_at,
            },
        );
        self.refresh_preview_if_latest(&deleted).await?;

        Ok(())
    }

    /// Mark everything the reader did not send as read, then zero the
    /// reader's unread counter. Returns the ids that changed status.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader_id: &str,
        reader_role: ParticipantRole,
    ) -> AppResult<Vec<Uuid>> {
        let conversation = self.conversations.get(conversation_id).await?;
        require_role(&conversation, reader_id, reader_role)?;

        let _guard = self.locks.lock(&conversation_id).await;
        let moved = self
            .store
            .advance_conversation_statuses(conversation_id, reader_id, MessageStatus::Read)
            .await?;

        if !moved.is_empty() {
            self.hub.publish(
                &Topic::Messages(conversation_id),
                &ChatEvent::MessagesRead {
                    conversation_id,
                    reader_id: reader_id.to_string(),
                    message_ids: moved.clone(),
                },
            );
        }

        self.conversations.mark_read(conversation_id, reader_role).await?;

        Ok(moved)
    }

    /// Move `sent` messages not authored by the recipient to `delivered`.
    pub async fn mark_delivered(
        &self,
        conversation_id: Uuid,
        recipient_id: &str,
    ) -> AppResult<Vec<Uuid>> {
        let conversation = self.conversations.get(conversation_id).await?;
        if conversation.role_of(recipient_id).is_none() {
            return Err(AppError::validation(format!(
                "{} is not a participant of this conversation",
                recipient_id
            )));
        }

        let _guard = self.locks.lock(&conversation_id).await;
        let moved = self
            .store
            .advance_conversation_statuses(conversation_id, recipient_id, MessageStatus::Delivered)
            .await?;

        if !moved.is_empty() {
            self.hub.publish(
                &Topic::Messages(conversation_id),
                &ChatEvent::MessagesDelivered {
                    conversation_id,
                    recipient_id: recipient_id.to_string(),
                    message_ids: moved.clone(),
                },
            );
        }

        Ok(moved)
    }

    /// Apply a single forward status transition. Same status is a no-op;
    /// a backward transition is a conflict.
    pub async fn advance_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> AppResult<Message> {
        let current = self.get(message_id).await?;
        if !current.status.can_advance_to(status) {
            return Err(AppError::conflict(format!(
                "message status cannot move from {:?} back to {:?}",
                current.status, status
            )));
        }
        if current.status == status {
            return Ok(current);
        }

        let _guard = self.locks.lock(&current.conversation_id).await;
        let updated = self
            .store
            .advance_message_status(message_id, status)
            .await?
            .ok_or(AppError::MessageNotFound(message_id))?;

        self.hub.publish(
            &Topic::Messages(updated.conversation_id),
            &ChatEvent::MessageUpdated(updated.clone()),
        );

        Ok(updated)
    }

    async fn refresh_preview_if_latest(&self, message: &Message) -> AppResult<()> {
        let conversation = self.conversations.get(message.conversation_id).await?;
        let points_here = conversation
            .last_message
            .as_ref()
            .is_some_and(|last| last.message_id == message.id);
        if points_here {
            self.conversations
                .refresh_last_message(message.conversation_id)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{AttachmentRef, Conversation, NewConversation, ParticipantMeta};
    use crate::storage::memory::MemoryStore;
    use std::sync::Mutex;

    struct Fixture {
        ledger: MessageLedger,
        conversations: ConversationStore,
        hub: Arc<SubscriptionHub>,
        clock: Arc<ManualClock>,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new());
        let hub = Arc::new(SubscriptionHub::new());
        let clock = Arc::new(ManualClock::default());
        let conversations = ConversationStore::new(store.clone(), hub.clone(), clock.clone());
        let ledger = MessageLedger::new(
            store,
            conversations.clone(),
            hub.clone(),
            clock.clone(),
            KeyedLocks::new(),
        );
        let (conversation, _) = conversations
            .create_or_get(NewConversation {
                store_id: "store-1".into(),
                customer_id: "cust-1".into(),
                customer: ParticipantMeta::named("Alice"),
                store_admin_id: "admin-1".into(),
                admin: ParticipantMeta::named("Bob"),
                metadata: None,
            })
            .await
            .unwrap();
        Fixture {
            ledger,
            conversations,
            hub,
            clock,
            conversation,
        }
    }

    fn from_customer(conv: Uuid, text: &str) -> NewMessage {
        NewMessage::text(conv, "cust-1", ParticipantRole::Customer, "Alice", text)
    }

    fn from_admin(conv: Uuid, text: &str) -> NewMessage {
        NewMessage::text(conv, "admin-1", ParticipantRole::StoreAdmin, "Bob", text)
    }

    #[tokio::test]
    async fn append_sets_sent_and_updates_conversation() {
        let f = fixture().await;
        let msg = f
            .ledger
            .append(from_customer(f.conversation.id, "Hi"))
            .await
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.sequence, 1);

        let conv = f.conversations.get(f.conversation.id).await.unwrap();
        assert_eq!(conv.unread_count.admin, 1);
        assert_eq!(conv.unread_count.customer, 0);
        assert_eq!(conv.last_message.unwrap().message_id, msg.id);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_side_effects() {
        let f = fixture().await;
        let err = f
            .ledger
            .append(from_customer(f.conversation.id, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let conv = f.conversations.get(f.conversation.id).await.unwrap();
        assert_eq!(conv.unread_count.admin, 0);
    }

    #[tokio::test]
    async fn attachments_are_required_for_file_types() {
        let f = fixture().await;
        let mut new = from_customer(f.conversation.id, "");
        new.message_type = MessageType::Image;
        assert!(matches!(
            f.ledger.append(new.clone()).await.unwrap_err(),
            AppError::Validation(_)
        ));

        new.attachment = Some(AttachmentRef {
            url: "https://cdn.example/a.png".into(),
            file_name: "a.png".into(),
            file_size: 42,
            mime_type: "image/png".into(),
        });
        let msg = f.ledger.append(new).await.unwrap();
        assert_eq!(msg.attachment.unwrap().file_size, 42);
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_is_not_found() {
        let f = fixture().await;
        let err = f
            .ledger
            .append(from_customer(Uuid::new_v4(), "Hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn same_millisecond_appends_keep_append_order() {
        let f = fixture().await;
        let first = f
            .ledger
            .append(from_customer(f.conversation.id, "one"))
            .await
            .unwrap();
        let second = f
            .ledger
            .append(from_admin(f.conversation.id, "two"))
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);

        let listed = f.ledger.list(f.conversation.id, 10, 0).await.unwrap();
        assert_eq!(
            listed.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
    }

    #[tokio::test]
    async fn clock_going_backwards_does_not_reorder() {
        let f = fixture().await;
        let now = f.clock.now();
        f.ledger
            .append(from_customer(f.conversation.id, "one"))
            .await
            .unwrap();
        f.clock.set(now - chrono::Duration::seconds(30));
        let second = f
            .ledger
            .append(from_customer(f.conversation.id, "two"))
            .await
            .unwrap();
        assert!(second.created_at >= now);

        let listed = f.ledger.list(f.conversation.id, 10, 0).await.unwrap();
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn paging_skips_deleted_messages() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for n in 0..5 {
            let m = f
                .ledger
                .append(from_customer(f.conversation.id, &format!("m{}", n)))
                .await
                .unwrap();
            ids.push(m.id);
        }
        f.ledger.soft_delete(ids[1]).await.unwrap();

        let page = f.ledger.list(f.conversation.id, 2, 1).await.unwrap();
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m2", "m3"]
        );
    }

    #[tokio::test]
    async fn soft_delete_keeps_message_fetchable() {
        let f = fixture().await;
        let msg = f
            .ledger
            .append(from_customer(f.conversation.id, "oops"))
            .await
            .unwrap();
        f.ledger.soft_delete(msg.id).await.unwrap();
        let first_deleted_at = f.ledger.get(msg.id).await.unwrap().deleted_at;
        assert!(first_deleted_at.is_some());

        f.clock.advance(std::time::Duration::from_secs(5));
        f.ledger.soft_delete(msg.id).await.unwrap();
        assert_eq!(f.ledger.get(msg.id).await.unwrap().deleted_at, first_deleted_at);
        assert!(f.ledger.list(f.conversation.id, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_latest_repoints_last_message() {
        let f = fixture().await;
        let first = f
            .ledger
            .append(from_customer(f.conversation.id, "first"))
            .await
            .unwrap();
        let second = f
            .ledger
            .append(from_customer(f.conversation.id, "second"))
            .await
            .unwrap();

        f.ledger.soft_delete(second.id).await.unwrap();
        let conv = f.conversations.get(f.conversation.id).await.unwrap();
        assert_eq!(conv.last_message.unwrap().message_id, first.id);

        f.ledger.soft_delete(first.id).await.unwrap();
        let conv = f.conversations.get(f.conversation.id).await.unwrap();
        assert!(conv.last_message.is_none());
    }

    #[tokio::test]
    async fn edit_updates_content_not_order_or_status() {
        let f = fixture().await;
        let msg = f
            .ledger
            .append(from_customer(f.conversation.id, "helo"))
            .await
            .unwrap();
        let edited = f.ledger.edit(msg.id, "hello").await.unwrap();
        assert_eq!(edited.content, "hello");
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.sequence, msg.sequence);
        assert_eq!(edited.status, msg.status);

        let conv = f.conversations.get(f.conversation.id).await.unwrap();
        assert_eq!(conv.last_message.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn editing_deleted_message_conflicts() {
        let f = fixture().await;
        let msg = f
            .ledger
            .append(from_customer(f.conversation.id, "bye"))
            .await
            .unwrap();
        f.ledger.soft_delete(msg.id).await.unwrap();
        assert!(matches!(
            f.ledger.edit(msg.id, "hi").await.unwrap_err(),
            AppError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn mark_read_moves_only_other_side() {
        let f = fixture().await;
        let theirs = f
            .ledger
            .append(from_customer(f.conversation.id, "question"))
            .await
            .unwrap();
        let mine = f
            .ledger
            .append(from_admin(f.conversation.id, "answer"))
            .await
            .unwrap();

        let moved = f
            .ledger
            .mark_read(f.conversation.id, "admin-1", ParticipantRole::StoreAdmin)
            .await
            .unwrap();
        assert_eq!(moved, vec![theirs.id]);
        assert_eq!(f.ledger.get(theirs.id).await.unwrap().status, MessageStatus::Read);
        assert_eq!(f.ledger.get(mine.id).await.unwrap().status, MessageStatus::Sent);

        let conv = f.conversations.get(f.conversation.id).await.unwrap();
        assert_eq!(conv.unread_count.admin, 0);
        assert_eq!(conv.unread_count.customer, 1);
    }

    #[tokio::test]
    async fn delivered_then_read_never_regresses() {
        let f = fixture().await;
        let msg = f
            .ledger
            .append(from_customer(f.conversation.id, "ping"))
            .await
            .unwrap();

        f.ledger
            .mark_read(f.conversation.id, "admin-1", ParticipantRole::StoreAdmin)
            .await
            .unwrap();
        let moved = f
            .ledger
            .mark_delivered(f.conversation.id, "admin-1")
            .await
            .unwrap();
        assert!(moved.is_empty());
        assert_eq!(f.ledger.get(msg.id).await.unwrap().status, MessageStatus::Read);

        let err = f
            .ledger
            .advance_status(msg.id, MessageStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            f.ledger
                .advance_status(msg.id, MessageStatus::Read)
                .await
                .unwrap()
                .status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn reply_must_stay_in_conversation() {
        let f = fixture().await;
        let original = f
            .ledger
            .append(from_customer(f.conversation.id, "q"))
            .await
            .unwrap();

        let mut reply = from_admin(f.conversation.id, "a");
        reply.reply_to = Some(original.id);
        assert_eq!(f.ledger.append(reply).await.unwrap().reply_to, Some(original.id));

        let (other, _) = f
            .conversations
            .create_or_get(NewConversation {
                store_id: "store-1".into(),
                customer_id: "cust-2".into(),
                customer: ParticipantMeta::named("Carol"),
                store_admin_id: "admin-1".into(),
                admin: ParticipantMeta::named("Bob"),
                metadata: None,
            })
            .await
            .unwrap();
        let mut stray = NewMessage::text(other.id, "cust-2", ParticipantRole::Customer, "Carol", "x");
        stray.reply_to = Some(original.id);
        assert!(matches!(
            f.ledger.append(stray).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let mut dangling = from_admin(f.conversation.id, "a");
        dangling.reply_to = Some(Uuid::new_v4());
        assert!(matches!(
            f.ledger.append(dangling).await.unwrap_err(),
            AppError::MessageNotFound(_)
        ));
    }

    #[tokio::test]
    async fn publish_precedes_counter_update() {
        let f = fixture().await;
        let conv_id = f.conversation.id;
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2) = (order.clone(), order.clone());
        f.hub.subscribe(Topic::Messages(conv_id), move |_| {
            o1.lock().unwrap().push("message".to_string());
        });
        f.hub.subscribe(Topic::Conversations("store-1".into()), move |event| {
            if let ChatEvent::ConversationUpdated(conv) = event {
                o2.lock().unwrap().push(format!("unread:{}", conv.unread_count.admin));
            }
        });

        f.ledger.append(from_customer(conv_id, "hi")).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["message", "unread:1"]);
    }

    #[tokio::test]
    async fn sender_must_match_their_role() {
        let f = fixture().await;
        let conv_id = f.conversation.id;

        let impostor = NewMessage::text(conv_id, "cust-1", ParticipantRole::StoreAdmin, "Alice", "hi");
        assert!(matches!(
            f.ledger.append(impostor).await.unwrap_err(),
            AppError::Validation(_)
        ));
        let stranger = NewMessage::text(conv_id, "mallory", ParticipantRole::Customer, "Mallory", "hi");
        assert!(matches!(
            f.ledger.append(stranger).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let conv = f.conversations.get(conv_id).await.unwrap();
        assert_eq!(conv.unread_count.admin, 0);
        assert_eq!(conv.unread_count.customer, 0);
        assert!(f.ledger.list(conv_id, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reader_must_match_their_role() {
        let f = fixture().await;
        let conv_id = f.conversation.id;
        let msg = f.ledger.append(from_customer(conv_id, "q")).await.unwrap();

        let err = f
            .ledger
            .mark_read(conv_id, "admin-1", ParticipantRole::Customer)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = f
            .ledger
            .mark_read(conv_id, "mallory", ParticipantRole::StoreAdmin)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = f.ledger.mark_delivered(conv_id, "mallory").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(f.ledger.get(msg.id).await.unwrap().status, MessageStatus::Sent);
        let conv = f.conversations.get(conv_id).await.unwrap();
        assert_eq!(conv.unread_count.admin, 1);
    }
}
