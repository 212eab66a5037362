//! Message store
//!
//! Append-only per-conversation log. Entries are immutable once appended;
//! a transfer message's displayed status is joined in live at read time
//! from the transfer engine, never stored here.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::chat::registry::ConversationRegistry;
use crate::directory::UserDirectory;
use crate::types::{Result, SendchatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Transfer,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    /// Set for transfer-kind messages only
    pub transfer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A message as listed to clients, with sender name and live transfer
/// status joined in
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub content: String,
    pub kind: MessageKind,
    pub transfer_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct ConversationLog {
    messages: Vec<Message>,
}

/// Thread-safe append-only message store
pub struct MessageStore {
    registry: Arc<ConversationRegistry>,
    directory: Arc<UserDirectory>,
    logs: DashMap<Uuid, Arc<Mutex<ConversationLog>>>,
    /// message id -> conversation id
    index: DashMap<Uuid, Uuid>,
}

impl MessageStore {
    pub fn new(registry: Arc<ConversationRegistry>, directory: Arc<UserDirectory>) -> Self {
        Self {
            registry,
            directory,
            logs: DashMap::new(),
            index: DashMap::new(),
        }
    }

    /// Append a message to a conversation the sender belongs to.
    ///
    /// Timestamps are clamped monotonically non-decreasing within a
    /// conversation under the log's append lock, so list order and
    /// timestamp order never disagree.
    pub fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        kind: MessageKind,
        transfer_id: Option<Uuid>,
    ) -> Result<Message> {
        self.registry.get(conversation_id)?;
        if !self.registry.is_member(conversation_id, sender_id) {
            return Err(SendchatError::AccessDenied(
                "sender is not a member of this conversation".into(),
            ));
        }

        let log = self.log(conversation_id);
        let mut guard = log.lock().expect("message log lock poisoned");

        let mut created_at = Utc::now();
        if let Some(last) = guard.messages.last() {
            if created_at < last.created_at {
                created_at = last.created_at;
            }
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            kind,
            transfer_id,
            created_at,
        };
        guard.messages.push(message.clone());
        drop(guard);

        self.index.insert(message.id, conversation_id);
        debug!(conversation = %conversation_id, message = %message.id, ?kind, "Message appended");
        Ok(message)
    }

    /// Page of a conversation's messages, ascending by creation time.
    ///
    /// `transfer_status` resolves the live status of a referenced transfer;
    /// the store itself never caches it.
    pub fn list(
        &self,
        conversation_id: Uuid,
        limit: usize,
        offset: usize,
        transfer_status: impl Fn(Uuid) -> Option<String>,
    ) -> Result<Vec<MessageView>> {
        self.registry.get(conversation_id)?;

        let log = self.log(conversation_id);
        let guard = log.lock().expect("message log lock poisoned");
        let views = guard
            .messages
            .iter()
            .skip(offset)
            .take(limit)
            .map(|m| self.view(m, &transfer_status))
            .collect();
        Ok(views)
    }

    pub fn get(&self, message_id: Uuid) -> Result<Message> {
        let conversation_id = *self
            .index
            .get(&message_id)
            .ok_or_else(|| SendchatError::NotFound(format!("message {}", message_id)))?;

        let log = self.log(conversation_id);
        let guard = log.lock().expect("message log lock poisoned");
        guard
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or_else(|| SendchatError::NotFound(format!("message {}", message_id)))
    }

    /// Join sender name and live transfer status into a single message
    pub fn view(
        &self,
        message: &Message,
        transfer_status: impl Fn(Uuid) -> Option<String>,
    ) -> MessageView {
        MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_username: self.directory.username(message.sender_id),
            content: message.content.clone(),
            kind: message.kind,
            transfer_id: message.transfer_id,
            transfer_status: message.transfer_id.and_then(&transfer_status),
            created_at: message.created_at,
        }
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    fn log(&self, conversation_id: Uuid) -> Arc<Mutex<ConversationLog>> {
        self.logs
            .entry(conversation_id)
            .or_default()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<UserDirectory>, Arc<ConversationRegistry>, MessageStore) {
        let directory = Arc::new(UserDirectory::new());
        let registry = Arc::new(ConversationRegistry::new(Arc::clone(&directory)));
        let store = MessageStore::new(Arc::clone(&registry), Arc::clone(&directory));
        (directory, registry, store)
    }

    fn no_status(_: Uuid) -> Option<String> {
        None
    }

    #[test]
    fn test_append_requires_membership() {
        let (dir, registry, store) = setup();
        let ada = dir.register("ada").id;
        let bob = dir.register("bob").id;
        let eve = dir.register("eve").id;
        let conv = registry.create_or_get_direct(ada, bob).unwrap();

        let err = store
            .append(conv.id, eve, "hi", MessageKind::Text, None)
            .unwrap_err();
        assert_eq!(err.kind(), "access_denied");

        let err = store
            .append(Uuid::new_v4(), ada, "hi", MessageKind::Text, None)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_list_is_ordered_and_paginated() {
        let (dir, registry, store) = setup();
        let ada = dir.register("ada").id;
        let bob = dir.register("bob").id;
        let conv = registry.create_or_get_direct(ada, bob).unwrap();

        for i in 0..5 {
            store
                .append(conv.id, ada, &format!("m{}", i), MessageKind::Text, None)
                .unwrap();
        }

        let all = store.list(conv.id, 100, 0, no_status).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "m0");
        assert_eq!(all[4].content, "m4");
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(all[0].sender_username, "ada");

        let page = store.list(conv.id, 2, 3, no_status).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m3");
    }

    #[test]
    fn test_get_round_trips() {
        let (dir, registry, store) = setup();
        let ada = dir.register("ada").id;
        let bob = dir.register("bob").id;
        let conv = registry.create_or_get_direct(ada, bob).unwrap();

        let appended = store
            .append(conv.id, ada, "hello", MessageKind::Text, None)
            .unwrap();
        let fetched = store.get(appended.id).unwrap();
        assert_eq!(fetched.content, "hello");
        assert_eq!(fetched.conversation_id, conv.id);

        assert_eq!(store.get(Uuid::new_v4()).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_transfer_status_joined_live() {
        let (dir, registry, store) = setup();
        let ada = dir.register("ada").id;
        let bob = dir.register("bob").id;
        let conv = registry.create_or_get_direct(ada, bob).unwrap();

        let transfer_id = Uuid::new_v4();
        store
            .append(
                conv.id,
                ada,
                "Sent 200.00",
                MessageKind::Transfer,
                Some(transfer_id),
            )
            .unwrap();

        let listed = store
            .list(conv.id, 10, 0, |id| {
                (id == transfer_id).then(|| "pending".to_string())
            })
            .unwrap();
        assert_eq!(listed[0].transfer_status.as_deref(), Some("pending"));

        // Status is never cached; a later resolver answer wins
        let listed = store
            .list(conv.id, 10, 0, |id| {
                (id == transfer_id).then(|| "completed".to_string())
            })
            .unwrap();
        assert_eq!(listed[0].transfer_status.as_deref(), Some("completed"));
    }
}
