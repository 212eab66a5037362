//! Transfer state machine
//!
//! Orchestrates the escrow lifecycle inside a direct conversation:
//! hold sender funds, announce the transfer as a message in the stream,
//! then settle (accept) or release (reject) on the receiver's response.
//! `pending` is the only non-terminal state; once a transfer is
//! `completed` or `rejected` every further response fails with
//! `AlreadyFinalized` and mutates nothing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chat::{Message, MessageKind, MessageStore};
use crate::directory::UserDirectory;
use crate::ledger::{normalize_amount, LedgerStore};
use crate::types::{Result, SendchatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Rejected,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Accept,
    Reject,
}

/// One escrowed transfer, 1:1 with the message that announced it
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub id: Uuid,
    /// Human-readable transaction reference
    pub reference: String,
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub sender_account: String,
    pub receiver_account: String,
    pub amount: Decimal,
    pub narration: Option<String>,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a response, returned for broadcast
#[derive(Debug, Clone, Serialize)]
pub struct TransferResolution {
    pub conversation_id: Uuid,
    pub transfer_id: Uuid,
    pub message_id: Uuid,
    pub reference: String,
    pub amount: Decimal,
    pub status: TransferStatus,
}

/// Escrow transfer engine
pub struct TransferEngine {
    directory: Arc<UserDirectory>,
    ledger: Arc<LedgerStore>,
    messages: Arc<MessageStore>,
    transfers: DashMap<Uuid, Arc<Mutex<TransferRecord>>>,
}

impl TransferEngine {
    pub fn new(
        directory: Arc<UserDirectory>,
        ledger: Arc<LedgerStore>,
        messages: Arc<MessageStore>,
    ) -> Self {
        Self {
            directory,
            ledger,
            messages,
            transfers: DashMap::new(),
        }
    }

    /// Initiate a transfer to the other member of a direct conversation.
    ///
    /// Holds the amount on the sender's account, records the transfer as
    /// `pending` and appends the announcing message. Any failure after the
    /// hold triggers a compensating release before the error is returned,
    /// so funds are never left held without a discoverable transfer.
    pub fn initiate(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        amount: Decimal,
        narration: Option<String>,
    ) -> Result<(Message, TransferRecord)> {
        self.initiate_with(
            conversation_id,
            sender_id,
            amount,
            narration,
            |engine, transfer_id, amount| {
                engine.messages.append(
                    conversation_id,
                    sender_id,
                    &format!("Sent {}", amount),
                    MessageKind::Transfer,
                    Some(transfer_id),
                )
            },
        )
    }

    /// `announce` records the announcing message. It is the only step
    /// between the hold and the record insert that can fail; any error
    /// there releases the hold before returning, so funds are never left
    /// held without a discoverable transfer.
    fn initiate_with<F>(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        amount: Decimal,
        narration: Option<String>,
        announce: F,
    ) -> Result<(Message, TransferRecord)>
    where
        F: FnOnce(&Self, Uuid, Decimal) -> Result<Message>,
    {
        let conversation = self.messages.registry().get(conversation_id)?;
        if !conversation.has_member(sender_id) {
            return Err(SendchatError::AccessDenied(
                "sender is not a member of this conversation".into(),
            ));
        }
        let receiver_id = conversation.other_member(sender_id)?;

        // Validation happens before any ledger mutation
        let amount = normalize_amount(amount)?;

        let sender_account = self
            .directory
            .linked_account(sender_id)?
            .ok_or_else(|| SendchatError::AccountNotLinked(format!("user {}", sender_id)))?;
        let receiver_account = self
            .directory
            .linked_account(receiver_id)?
            .ok_or_else(|| SendchatError::AccountNotLinked(format!("user {}", receiver_id)))?;

        let transfer_id = Uuid::new_v4();
        self.ledger
            .hold(&format!("hold-{}", transfer_id), &sender_account, amount)?;

        // From here on the hold is live; any failure must compensate.
        let message = match announce(self, transfer_id, amount) {
            Ok(message) => message,
            Err(err) => {
                self.compensate_hold(transfer_id, &sender_account, amount);
                return Err(err);
            }
        };

        let record = TransferRecord {
            id: transfer_id,
            reference: generate_reference(),
            conversation_id,
            message_id: message.id,
            sender_id,
            receiver_id,
            sender_account,
            receiver_account,
            amount,
            narration,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
        };
        self.transfers
            .insert(transfer_id, Arc::new(Mutex::new(record.clone())));

        info!(
            transfer = %transfer_id,
            reference = %record.reference,
            conversation = %conversation_id,
            amount = %amount,
            "Transfer initiated"
        );
        Ok((message, record))
    }

    /// Accept or reject a pending transfer. Only the receiver may act.
    pub fn respond(
        &self,
        message_id: Uuid,
        actor_id: Uuid,
        action: TransferAction,
    ) -> Result<TransferResolution> {
        let message = self.messages.get(message_id)?;
        let transfer_id = message.transfer_id.ok_or_else(|| {
            SendchatError::NotFound(format!("message {} is not a transfer", message_id))
        })?;

        let entry = self
            .transfers
            .get(&transfer_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| SendchatError::NotFound(format!("transfer {}", transfer_id)))?;

        // The record lock makes status check + ledger mutation + status
        // write one critical section; a racing second response observes
        // the terminal state and fails without touching the ledger.
        let mut record = entry.lock().expect("transfer lock poisoned");

        if record.status != TransferStatus::Pending {
            return Err(SendchatError::AlreadyFinalized(format!(
                "transfer {} is already {}",
                transfer_id,
                record.status.as_str()
            )));
        }
        if actor_id != record.receiver_id {
            return Err(SendchatError::AccessDenied(
                "only the transfer receiver can accept or reject".into(),
            ));
        }

        match action {
            TransferAction::Accept => {
                self.ledger.settle(
                    &format!("settle-{}", transfer_id),
                    &record.sender_account,
                    &record.receiver_account,
                    record.amount,
                )?;
                record.status = TransferStatus::Completed;
            }
            TransferAction::Reject => {
                self.ledger.release(
                    &format!("release-{}", transfer_id),
                    &record.sender_account,
                    record.amount,
                )?;
                record.status = TransferStatus::Rejected;
            }
        }

        info!(
            transfer = %transfer_id,
            status = record.status.as_str(),
            actor = %actor_id,
            "Transfer resolved"
        );
        Ok(TransferResolution {
            conversation_id: record.conversation_id,
            transfer_id,
            message_id,
            reference: record.reference.clone(),
            amount: record.amount,
            status: record.status,
        })
    }

    pub fn get(&self, transfer_id: Uuid) -> Result<TransferRecord> {
        self.transfers
            .get(&transfer_id)
            .map(|e| e.lock().expect("transfer lock poisoned").clone())
            .ok_or_else(|| SendchatError::NotFound(format!("transfer {}", transfer_id)))
    }

    /// Live status string for a transfer, used by the message list join
    pub fn status_of(&self, transfer_id: Uuid) -> Option<String> {
        self.transfers.get(&transfer_id).map(|e| {
            e.lock()
                .expect("transfer lock poisoned")
                .status
                .as_str()
                .to_string()
        })
    }

    fn compensate_hold(&self, transfer_id: Uuid, sender_account: &str, amount: Decimal) {
        warn!(transfer = %transfer_id, "Transfer initiation failed after hold, releasing");
        if let Err(err) = self.ledger.release(
            &format!("release-{}", transfer_id),
            sender_account,
            amount,
        ) {
            // Nothing more we can do inline; the idempotency key allows a
            // later retry of the same release.
            error!(transfer = %transfer_id, error = %err, "Compensating release failed");
        }
    }
}

/// Human-readable transaction reference: TXN + UTC timestamp + 6 digits
fn generate_reference() -> String {
    let mut rng = rand::thread_rng();
    let digits: String = (0..6).map(|_| rng.gen_range(0..10).to_string()).collect();
    format!("TXN{}{}", Utc::now().timestamp(), digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ConversationRegistry;

    struct Fixture {
        directory: Arc<UserDirectory>,
        registry: Arc<ConversationRegistry>,
        ledger: Arc<LedgerStore>,
        engine: TransferEngine,
        sender: Uuid,
        receiver: Uuid,
        conversation: Uuid,
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(UserDirectory::new());
        let registry = Arc::new(ConversationRegistry::new(Arc::clone(&directory)));
        let ledger = Arc::new(LedgerStore::new());
        let messages = Arc::new(MessageStore::new(
            Arc::clone(&registry),
            Arc::clone(&directory),
        ));
        let engine = TransferEngine::new(
            Arc::clone(&directory),
            Arc::clone(&ledger),
            Arc::clone(&messages),
        );

        let sender = directory.register("ada").id;
        let receiver = directory.register("bob").id;
        ledger.open_account("1000000001", dec("1000.00")).unwrap();
        ledger.open_account("1000000002", dec("0.00")).unwrap();
        directory.link_wallet(sender, "1000000001").unwrap();
        directory.link_wallet(receiver, "1000000002").unwrap();
        let conversation = registry.create_or_get_direct(sender, receiver).unwrap().id;

        Fixture {
            directory,
            registry,
            ledger,
            engine,
            sender,
            receiver,
            conversation,
        }
    }

    #[test]
    fn test_initiate_holds_funds_and_announces() {
        let f = fixture();
        let (message, record) = f
            .engine
            .initiate(f.conversation, f.sender, dec("200"), None)
            .unwrap();

        assert_eq!(message.kind, MessageKind::Transfer);
        assert_eq!(message.content, "Sent 200.00");
        assert_eq!(message.transfer_id, Some(record.id));
        assert_eq!(record.status, TransferStatus::Pending);
        assert!(record.reference.starts_with("TXN"));

        let sender = f.ledger.balances("1000000001").unwrap();
        assert_eq!(sender.available, dec("800.00"));
        assert_eq!(sender.held, dec("200.00"));
    }

    #[test]
    fn test_accept_settles_exactly_once() {
        let f = fixture();
        let (message, _) = f
            .engine
            .initiate(f.conversation, f.sender, dec("200"), None)
            .unwrap();

        let resolution = f
            .engine
            .respond(message.id, f.receiver, TransferAction::Accept)
            .unwrap();
        assert_eq!(resolution.status, TransferStatus::Completed);

        let sender = f.ledger.balances("1000000001").unwrap();
        let receiver = f.ledger.balances("1000000002").unwrap();
        assert_eq!(sender.available, dec("800.00"));
        assert_eq!(sender.held, dec("0.00"));
        assert_eq!(receiver.available, dec("200.00"));

        // Terminal: a second response fails and moves nothing
        let err = f
            .engine
            .respond(message.id, f.receiver, TransferAction::Reject)
            .unwrap_err();
        assert_eq!(err.kind(), "already_finalized");
        assert_eq!(
            f.ledger.balances("1000000002").unwrap().available,
            dec("200.00")
        );
    }

    #[test]
    fn test_reject_restores_sender_exactly() {
        let f = fixture();
        let before = f.ledger.balances("1000000001").unwrap();
        let (message, _) = f
            .engine
            .initiate(f.conversation, f.sender, dec("350.50"), None)
            .unwrap();

        let resolution = f
            .engine
            .respond(message.id, f.receiver, TransferAction::Reject)
            .unwrap();
        assert_eq!(resolution.status, TransferStatus::Rejected);

        let after = f.ledger.balances("1000000001").unwrap();
        assert_eq!(after, before);

        let err = f
            .engine
            .respond(message.id, f.receiver, TransferAction::Reject)
            .unwrap_err();
        assert_eq!(err.kind(), "already_finalized");
    }

    #[test]
    fn test_only_receiver_may_respond() {
        let f = fixture();
        let (message, _) = f
            .engine
            .initiate(f.conversation, f.sender, dec("10"), None)
            .unwrap();

        let err = f
            .engine
            .respond(message.id, f.sender, TransferAction::Accept)
            .unwrap_err();
        assert_eq!(err.kind(), "access_denied");

        // Still pending and fully actionable by the receiver
        f.engine
            .respond(message.id, f.receiver, TransferAction::Accept)
            .unwrap();
    }

    #[test]
    fn test_invalid_amount_mutates_nothing() {
        let f = fixture();
        for amount in ["0", "-5", "1.005"] {
            let err = f
                .engine
                .initiate(f.conversation, f.sender, dec(amount), None)
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_argument");
        }
        let balances = f.ledger.balances("1000000001").unwrap();
        assert_eq!(balances.available, dec("1000.00"));
        assert_eq!(balances.held, dec("0.00"));
    }

    #[test]
    fn test_failed_announcement_releases_the_hold() {
        let f = fixture();
        let before = f.ledger.balances("1000000001").unwrap();

        let err = f
            .engine
            .initiate_with(f.conversation, f.sender, dec("200"), None, |_, _, _| {
                Err(SendchatError::Internal("storage offline".into()))
            })
            .unwrap_err();
        assert_eq!(err.kind(), "internal");

        // The hold was compensated and nothing is discoverable
        assert_eq!(f.ledger.balances("1000000001").unwrap(), before);
        assert!(f.engine.transfers.is_empty());
        let listed = f
            .engine
            .messages
            .list(f.conversation, 10, 0, |id| f.engine.status_of(id))
            .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn test_insufficient_funds_mutates_nothing() {
        let f = fixture();
        let err = f
            .engine
            .initiate(f.conversation, f.sender, dec("5000"), None)
            .unwrap_err();
        assert_eq!(err.kind(), "insufficient_funds");
        assert_eq!(
            f.ledger.balances("1000000001").unwrap().available,
            dec("1000.00")
        );
    }

    #[test]
    fn test_unlinked_account_rejected() {
        let f = fixture();
        let stranger = f.directory.register("eve").id;
        let conv = f.registry.create_or_get_direct(f.sender, stranger).unwrap();

        let err = f
            .engine
            .initiate(conv.id, f.sender, dec("10"), None)
            .unwrap_err();
        assert_eq!(err.kind(), "account_not_linked");
    }

    #[test]
    fn test_group_transfers_unsupported() {
        let f = fixture();
        let group = f.registry.create_group(f.sender, Some("team".into())).unwrap();
        f.registry
            .add_member(group.id, f.sender, f.receiver)
            .unwrap();

        let err = f
            .engine
            .initiate(group.id, f.sender, dec("10"), None)
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[test]
    fn test_respond_on_plain_text_message() {
        let f = fixture();
        let (message, _) = f
            .engine
            .initiate(f.conversation, f.sender, dec("10"), None)
            .unwrap();
        // A fresh id that is no message at all
        assert_eq!(
            f.engine
                .respond(Uuid::new_v4(), f.receiver, TransferAction::Accept)
                .unwrap_err()
                .kind(),
            "not_found"
        );
        // Sanity: the real one still works
        f.engine
            .respond(message.id, f.receiver, TransferAction::Accept)
            .unwrap();
    }

    #[test]
    fn test_status_of_tracks_lifecycle() {
        let f = fixture();
        let (message, record) = f
            .engine
            .initiate(f.conversation, f.sender, dec("20"), None)
            .unwrap();
        assert_eq!(f.engine.status_of(record.id).as_deref(), Some("pending"));

        f.engine
            .respond(message.id, f.receiver, TransferAction::Accept)
            .unwrap();
        assert_eq!(f.engine.status_of(record.id).as_deref(), Some("completed"));
        assert_eq!(f.engine.status_of(Uuid::new_v4()), None);
    }
}
