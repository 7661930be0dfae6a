//! Account and ledger storage.
//!
//! Synchronous trait so the driver stays free of async. Implementations share
//! state internally, so clones see the same accounts.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::path::Path;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// One account as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    /// Unique account name
    pub username: String,
    /// PBKDF2 salt, hex
    pub salt: String,
    /// PBKDF2 derived key, hex
    pub password_hash: String,
    /// PBKDF2 iteration count the hash was derived with
    pub iterations: u32,
    /// Current balance
    pub balance: f64,
    /// May use privileged opcodes
    pub is_admin: bool,
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// Position in the ledger, starting at 0
    pub sequence: u64,
    /// Sender
    pub from: String,
    /// Receiver
    pub to: String,
    /// Amount moved
    pub amount: f64,
    /// UTC `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
}

impl StoredTransaction {
    /// Whether `username` sent or received this transfer.
    pub fn involves(&self, username: &str) -> bool {
        self.from == username || self.to == username
    }
}

/// Result of [`Storage::transfer`]. Only `Completed` changes state.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Both balances updated and the ledger entry appended
    Completed {
        /// Sender balance after the debit
        sender_balance: f64,
        /// Ledger entry written
        sequence: u64,
    },
    /// Sender cannot cover the amount
    InsufficientFunds {
        /// Sender balance, unchanged
        balance: f64,
    },
    /// Sender does not exist
    UnknownSender,
    /// Receiver does not exist
    UnknownReceiver,
}

/// Account and ledger store.
///
/// Must be Clone, Send + Sync and synchronous. `transfer` is atomic: the
/// debit, the credit and the ledger append are visible together or not at all.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Insert a new account. Returns `false` without writing if the name is
    /// taken.
    fn create_user(&self, user: &StoredUser) -> Result<bool, StorageError>;

    /// Load one account.
    fn load_user(&self, username: &str) -> Result<Option<StoredUser>, StorageError>;

    /// All accounts in signup order.
    fn list_users(&self) -> Result<Vec<StoredUser>, StorageError>;

    /// Move `amount` from `from` to `to` and append a ledger entry.
    ///
    /// # Invariants
    ///
    /// - Pre: `amount` is finite and positive, `from != to`
    /// - Post: on `Completed`, the sum of all balances is unchanged
    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        timestamp: &str,
    ) -> Result<TransferOutcome, StorageError>;

    /// Whole ledger, oldest first.
    fn ledger(&self) -> Result<Vec<StoredTransaction>, StorageError>;

    /// Entries where `username` is sender or receiver, newest first.
    fn transactions_for(&self, username: &str) -> Result<Vec<StoredTransaction>, StorageError> {
        let mut entries: Vec<_> =
            self.ledger()?.into_iter().filter(|tx| tx.involves(username)).collect();
        entries.reverse();
        Ok(entries)
    }
}

/// Storage selected at startup: in memory, or redb when a path is given.
#[derive(Clone)]
pub enum ServerStorage {
    /// Lost on restart
    Memory(MemoryStorage),
    /// Durable
    Redb(RedbStorage),
}

impl ServerStorage {
    /// Open redb at `path`, or fall back to memory.
    ///
    /// # Errors
    ///
    /// `StorageError::Io` if the database cannot be opened.
    pub fn open(path: Option<&Path>) -> Result<Self, StorageError> {
        match path {
            Some(path) => Ok(Self::Redb(RedbStorage::open(path)?)),
            None => Ok(Self::Memory(MemoryStorage::new())),
        }
    }
}

impl Storage for ServerStorage {
    fn create_user(&self, user: &StoredUser) -> Result<bool, StorageError> {
        match self {
            Self::Memory(s) => s.create_user(user),
            Self::Redb(s) => s.create_user(user),
        }
    }

    fn load_user(&self, username: &str) -> Result<Option<StoredUser>, StorageError> {
        match self {
            Self::Memory(s) => s.load_user(username),
            Self::Redb(s) => s.load_user(username),
        }
    }

    fn list_users(&self) -> Result<Vec<StoredUser>, StorageError> {
        match self {
            Self::Memory(s) => s.list_users(),
            Self::Redb(s) => s.list_users(),
        }
    }

    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        timestamp: &str,
    ) -> Result<TransferOutcome, StorageError> {
        match self {
            Self::Memory(s) => s.transfer(from, to, amount, timestamp),
            Self::Redb(s) => s.transfer(from, to, amount, timestamp),
        }
    }

    fn ledger(&self) -> Result<Vec<StoredTransaction>, StorageError> {
        match self {
            Self::Memory(s) => s.ledger(),
            Self::Redb(s) => s.ledger(),
        }
    }
}

/// New balances for a transfer between two loaded accounts, or the refusal.
/// Shared by every backend so the balance rule lives in one place.
pub(crate) fn settle(
    sender: &StoredUser,
    receiver: &StoredUser,
    amount: f64,
) -> Result<(f64, f64), TransferOutcome> {
    if sender.balance < amount {
        return Err(TransferOutcome::InsufficientFunds { balance: sender.balance });
    }

    Ok((sender.balance - amount, receiver.balance + amount))
}
