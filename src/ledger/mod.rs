//! Ledger store
//!
//! Owns per-account available and held balances and the three escrow
//! primitives: hold, release and settle. Each operation is a critical
//! section per account; settle locks its two accounts in lexicographic
//! account-number order so opposite-direction settles cannot deadlock.
//!
//! Operations take a caller-supplied idempotency key: replaying a key whose
//! operation already applied is a no-op, which lets callers retry safely
//! against at-most-once delivery from an external balance of record.

use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::types::{Result, SendchatError};

/// Balances of one wallet account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalances {
    /// Spendable balance
    pub available: Decimal,
    /// Escrowed balance awaiting settle or release
    pub held: Decimal,
}

impl AccountBalances {
    fn new(opening: Decimal) -> Self {
        Self {
            available: opening,
            held: Decimal::ZERO,
        }
    }
}

/// Validate and normalize a transfer amount to two fractional digits.
///
/// Rejects non-positive amounts and amounts with sub-cent precision.
pub fn normalize_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(SendchatError::InvalidArgument(
            "amount must be positive".into(),
        ));
    }
    if amount.normalize().scale() > 2 {
        return Err(SendchatError::InvalidArgument(
            "amount supports at most two decimal places".into(),
        ));
    }
    let mut normalized = amount;
    normalized.rescale(2);
    Ok(normalized)
}

/// Thread-safe ledger store
///
/// Account balances are mutated only through [`hold`](LedgerStore::hold),
/// [`release`](LedgerStore::release) and [`settle`](LedgerStore::settle).
pub struct LedgerStore {
    accounts: DashMap<String, Arc<Mutex<AccountBalances>>>,
    /// Idempotency keys of operations that already applied
    applied: DashMap<String, ()>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            applied: DashMap::new(),
        }
    }

    /// Generate a unique 10-digit account number ("1" + 9 random digits)
    pub fn generate_account_number(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let digits: String = (0..9).map(|_| rng.gen_range(0..10).to_string()).collect();
            let account_no = format!("1{}", digits);
            if !self.accounts.contains_key(&account_no) {
                return account_no;
            }
        }
    }

    /// Open an account with the given opening balance. Returns the account
    /// number. Idempotent per account number: reopening is a no-op.
    pub fn open_account(&self, account_no: &str, opening: Decimal) -> Result<String> {
        if opening < Decimal::ZERO {
            return Err(SendchatError::InvalidArgument(
                "opening balance must be non-negative".into(),
            ));
        }
        self.accounts
            .entry(account_no.to_string())
            .or_insert_with(|| {
                info!(account = %account_no, balance = %opening, "Account opened");
                Arc::new(Mutex::new(AccountBalances::new(opening)))
            });
        Ok(account_no.to_string())
    }

    pub fn contains(&self, account_no: &str) -> bool {
        self.accounts.contains_key(account_no)
    }

    /// Snapshot of an account's balances
    pub fn balances(&self, account_no: &str) -> Result<AccountBalances> {
        let entry = self.account(account_no)?;
        let guard = entry.lock().expect("ledger lock poisoned");
        Ok(guard.clone())
    }

    /// Move `amount` from available to held on `account_no`.
    pub fn hold(&self, key: &str, account_no: &str, amount: Decimal) -> Result<()> {
        if self.already_applied(key) {
            return Ok(());
        }
        let entry = self.account(account_no)?;
        let mut guard = entry.lock().expect("ledger lock poisoned");

        if guard.available < amount {
            return Err(SendchatError::InsufficientFunds(format!(
                "available: {}, required: {}",
                guard.available, amount
            )));
        }
        guard.available -= amount;
        guard.held += amount;
        drop(guard);

        self.applied.insert(key.to_string(), ());
        debug!(account = %account_no, amount = %amount, key = %key, "Funds held");
        Ok(())
    }

    /// Return `amount` from held to available on `account_no`. Used when a
    /// transfer is rejected or compensated.
    pub fn release(&self, key: &str, account_no: &str, amount: Decimal) -> Result<()> {
        if self.already_applied(key) {
            return Ok(());
        }
        let entry = self.account(account_no)?;
        let mut guard = entry.lock().expect("ledger lock poisoned");

        if guard.held < amount {
            return Err(SendchatError::InsufficientHeld(format!(
                "held: {}, required: {}",
                guard.held, amount
            )));
        }
        guard.held -= amount;
        guard.available += amount;
        drop(guard);

        self.applied.insert(key.to_string(), ());
        debug!(account = %account_no, amount = %amount, key = %key, "Funds released");
        Ok(())
    }

    /// Move `amount` from the sender's held balance to the receiver's
    /// available balance. Used when a transfer is accepted.
    pub fn settle(
        &self,
        key: &str,
        sender_account: &str,
        receiver_account: &str,
        amount: Decimal,
    ) -> Result<()> {
        if sender_account == receiver_account {
            return Err(SendchatError::InvalidArgument(
                "settle requires two distinct accounts".into(),
            ));
        }
        if self.already_applied(key) {
            return Ok(());
        }
        let sender = self.account(sender_account)?;
        let receiver = self.account(receiver_account)?;

        // Deterministic lock order prevents deadlock between concurrent
        // opposite-direction settles on the same account pair.
        let (first, second) = if sender_account < receiver_account {
            (&sender, &receiver)
        } else {
            (&receiver, &sender)
        };
        let first_guard = first.lock().expect("ledger lock poisoned");
        let second_guard = second.lock().expect("ledger lock poisoned");
        let (mut sender_guard, mut receiver_guard) = if sender_account < receiver_account {
            (first_guard, second_guard)
        } else {
            (second_guard, first_guard)
        };

        if sender_guard.held < amount {
            return Err(SendchatError::InsufficientHeld(format!(
                "held: {}, required: {}",
                sender_guard.held, amount
            )));
        }
        sender_guard.held -= amount;
        receiver_guard.available += amount;
        drop(sender_guard);
        drop(receiver_guard);

        self.applied.insert(key.to_string(), ());
        debug!(
            sender = %sender_account,
            receiver = %receiver_account,
            amount = %amount,
            key = %key,
            "Transfer settled"
        );
        Ok(())
    }

    fn account(&self, account_no: &str) -> Result<Arc<Mutex<AccountBalances>>> {
        self.accounts
            .get(account_no)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| SendchatError::NotFound(format!("account {}", account_no)))
    }

    fn already_applied(&self, key: &str) -> bool {
        self.applied.contains_key(key)
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}
