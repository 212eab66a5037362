//! Conversation registry
//!
//! Membership and access control for direct and group conversations.
//! Direct conversations are unique per unordered member pair; creating one
//! that already exists returns the existing conversation instead.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::directory::UserDirectory;
use crate::types::{Result, SendchatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub creator: Uuid,
    /// Ordered, unique; exactly two for direct conversations
    pub members: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    /// The member who is not `user_id`. Only meaningful for direct
    /// conversations; group conversations have no single counterpart.
    pub fn other_member(&self, user_id: Uuid) -> Result<Uuid> {
        if self.kind != ConversationKind::Direct {
            return Err(SendchatError::Unsupported(
                "operation requires a direct conversation".into(),
            ));
        }
        self.members
            .iter()
            .copied()
            .find(|m| *m != user_id)
            .ok_or_else(|| SendchatError::Internal("direct conversation missing counterpart".into()))
    }
}

/// One row of a user's conversation list
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub kind: ConversationKind,
    /// Group name, or the other member's username for direct chats
    pub name: Option<String>,
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe conversation registry
pub struct ConversationRegistry {
    directory: Arc<UserDirectory>,
    conversations: DashMap<Uuid, Conversation>,
    /// Ordered member pair -> direct conversation id
    direct_index: DashMap<(Uuid, Uuid), Uuid>,
}

impl ConversationRegistry {
    pub fn new(directory: Arc<UserDirectory>) -> Self {
        Self {
            directory,
            conversations: DashMap::new(),
            direct_index: DashMap::new(),
        }
    }

    /// Create the direct conversation between two users, or return the
    /// existing one. Idempotent per unordered pair. Side effect: each user
    /// is added to the other's contact list (also idempotent).
    pub fn create_or_get_direct(&self, user_a: Uuid, user_b: Uuid) -> Result<Conversation> {
        if user_a == user_b {
            return Err(SendchatError::InvalidArgument(
                "cannot open a direct conversation with yourself".into(),
            ));
        }
        self.directory.get(user_a)?;
        self.directory.get(user_b)?;

        let pair = if user_a < user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };

        // The entry shard lock makes create-or-get atomic per pair: a racing
        // second caller waits here and then sees the winner's id.
        let conversation_id = *self.direct_index.entry(pair).or_insert_with(|| {
            let conversation = Conversation {
                id: Uuid::new_v4(),
                kind: ConversationKind::Direct,
                name: None,
                creator: user_a,
                members: vec![user_a, user_b],
                created_at: Utc::now(),
            };
            let id = conversation.id;
            self.conversations.insert(id, conversation);
            info!(conversation = %id, a = %user_a, b = %user_b, "Direct conversation created");
            id
        });

        self.directory.add_contact(user_a, user_b);
        self.directory.add_contact(user_b, user_a);

        self.get(conversation_id)
    }

    /// Create a group conversation with the creator as sole member
    pub fn create_group(&self, creator: Uuid, name: Option<String>) -> Result<Conversation> {
        self.directory.get(creator)?;

        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Group,
            name,
            creator,
            members: vec![creator],
            created_at: Utc::now(),
        };
        info!(conversation = %conversation.id, creator = %creator, "Group conversation created");
        self.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    /// Add a member to a group conversation. Only the creator may add.
    pub fn add_member(&self, conversation_id: Uuid, actor: Uuid, new_member: Uuid) -> Result<()> {
        self.directory.get(new_member)?;

        let mut entry = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| SendchatError::NotFound(format!("conversation {}", conversation_id)))?;

        if entry.kind != ConversationKind::Group {
            return Err(SendchatError::Unsupported(
                "members can only be added to group conversations".into(),
            ));
        }
        if entry.creator != actor {
            return Err(SendchatError::AccessDenied(
                "only the conversation creator can add members".into(),
            ));
        }
        if entry.has_member(new_member) {
            return Err(SendchatError::AlreadyMember(format!(
                "user {} is already a member",
                new_member
            )));
        }

        entry.members.push(new_member);
        info!(conversation = %conversation_id, member = %new_member, "Member added");
        Ok(())
    }

    pub fn get(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.clone())
            .ok_or_else(|| SendchatError::NotFound(format!("conversation {}", conversation_id)))
    }

    /// Access-control predicate used by every other component
    pub fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.conversations
            .get(&conversation_id)
            .map(|c| c.has_member(user_id))
            .unwrap_or(false)
    }

    /// Conversations the user belongs to, newest first. Direct chats are
    /// titled with the other member's username.
    pub fn conversations_for_user(
        &self,
        user_id: Uuid,
        kind: Option<ConversationKind>,
    ) -> Vec<ConversationSummary> {
        let mut rows: Vec<ConversationSummary> = self
            .conversations
            .iter()
            .filter(|c| c.has_member(user_id))
            .filter(|c| kind.map(|k| c.kind == k).unwrap_or(true))
            .map(|c| {
                let name = match c.kind {
                    ConversationKind::Group => c.name.clone(),
                    ConversationKind::Direct => c
                        .other_member(user_id)
                        .ok()
                        .map(|other| self.directory.username(other)),
                };
                ConversationSummary {
                    id: c.id,
                    kind: c.kind,
                    name,
                    member_count: c.members.len(),
                    created_at: c.created_at,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}
