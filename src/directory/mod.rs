//! User directory
//!
//! Profiles, wallet account linkage and contact lists. Registration and
//! credential management belong to the external identity provider; the
//! directory only answers the questions the chat and transfer layers ask:
//! who is this user, which wallet account is linked to them, and who are
//! their contacts.

use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Result, SendchatError};

/// A known user
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    /// Linked wallet account number, if any
    pub wallet_account: Option<String>,
}

/// Thread-safe user directory
pub struct UserDirectory {
    users: DashMap<Uuid, UserProfile>,
    /// user -> set of contact user ids
    contacts: DashMap<Uuid, BTreeSet<Uuid>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            contacts: DashMap::new(),
        }
    }

    /// Register a user. Identity issuance is external; this records the
    /// profile the gateway needs for joins and access checks.
    pub fn register(&self, username: &str) -> UserProfile {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            wallet_account: None,
        };
        self.users.insert(profile.id, profile.clone());
        info!(user = %profile.id, username = %username, "User registered");
        profile
    }

    pub fn get(&self, user_id: Uuid) -> Result<UserProfile> {
        self.users
            .get(&user_id)
            .map(|p| p.clone())
            .ok_or_else(|| SendchatError::NotFound(format!("user {}", user_id)))
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Display name for a user, or a placeholder if unknown
    pub fn username(&self, user_id: Uuid) -> String {
        self.users
            .get(&user_id)
            .map(|p| p.username.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Link a wallet account to a user (replaces any previous link)
    pub fn link_wallet(&self, user_id: Uuid, account_no: &str) -> Result<()> {
        let mut entry = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| SendchatError::NotFound(format!("user {}", user_id)))?;
        entry.wallet_account = Some(account_no.to_string());
        info!(user = %user_id, account = %account_no, "Wallet linked");
        Ok(())
    }

    /// Linked wallet account for a user, if any
    pub fn linked_account(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.get(user_id)?.wallet_account)
    }

    /// Add `contact_id` to `user_id`'s contacts. Duplicate inserts and
    /// self-contacts are no-ops, never errors.
    pub fn add_contact(&self, user_id: Uuid, contact_id: Uuid) {
        if user_id == contact_id {
            return;
        }
        let inserted = self.contacts.entry(user_id).or_default().insert(contact_id);
        if inserted {
            debug!(user = %user_id, contact = %contact_id, "Contact added");
        }
    }

    /// Contacts of a user, resolved to profiles, ordered by username
    pub fn contacts_of(&self, user_id: Uuid) -> Vec<UserProfile> {
        let ids: Vec<Uuid> = self
            .contacts
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut profiles: Vec<UserProfile> = ids
            .into_iter()
            .filter_map(|id| self.users.get(&id).map(|p| p.clone()))
            .collect();
        profiles.sort_by(|a, b| a.username.cmp(&b.username));
        profiles
    }
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}
