#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{Storage, StorageError, StoredTransaction, StoredUser, TransferOutcome, settle};

/// In-memory storage for tests and throwaway servers.
///
/// All state sits behind one `Arc<Mutex<_>>`, which makes every operation
/// (transfers included) trivially atomic. A poisoned lock is reported as
/// `StorageError::Io` instead of panicking.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Accounts in signup order
    users: Vec<StoredUser>,

    /// username -> index into `users`
    index: HashMap<String, usize>,

    /// Ledger, oldest first
    ledger: Vec<StoredTransaction>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStorageInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory storage lock poisoned".to_string()))
    }

    /// Number of accounts.
    ///
    /// # Errors
    ///
    /// `StorageError::Io` if the lock is poisoned.
    pub fn user_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.users.len())
    }
}

impl Storage for MemoryStorage {
    fn create_user(&self, user: &StoredUser) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        if inner.index.contains_key(&user.username) {
            return Ok(false);
        }

        let position = inner.users.len();
        inner.index.insert(user.username.clone(), position);
        inner.users.push(user.clone());
        Ok(true)
    }

    fn load_user(&self, username: &str) -> Result<Option<StoredUser>, StorageError> {
        let inner = self.lock()?;
        Ok(inner.index.get(username).and_then(|&i| inner.users.get(i)).cloned())
    }

    fn list_users(&self) -> Result<Vec<StoredUser>, StorageError> {
        Ok(self.lock()?.users.clone())
    }

    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        timestamp: &str,
    ) -> Result<TransferOutcome, StorageError> {
        let mut inner = self.lock()?;

        let Some(s) = inner.index.get(from).copied() else {
            return Ok(TransferOutcome::UnknownSender);
        };
        let Some(r) = inner.index.get(to).copied() else {
            return Ok(TransferOutcome::UnknownReceiver);
        };
        let (Some(sender), Some(receiver)) = (inner.users.get(s), inner.users.get(r)) else {
            return Err(StorageError::Corrupt(format!("index points past users for {from} or {to}")));
        };

        let (sender_balance, receiver_balance) = match settle(sender, receiver, amount) {
            Ok(balances) => balances,
            Err(outcome) => return Ok(outcome),
        };

        if let Some(user) = inner.users.get_mut(s) {
            user.balance = sender_balance;
        }
        if let Some(user) = inner.users.get_mut(r) {
            user.balance = receiver_balance;
        }

        let sequence = inner.ledger.len() as u64;
        inner.ledger.push(StoredTransaction {
            sequence,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            timestamp: timestamp.to_string(),
        });

        Ok(TransferOutcome::Completed { sender_balance, sequence })
    }

    fn ledger(&self) -> Result<Vec<StoredTransaction>, StorageError> {
        Ok(self.lock()?.ledger.clone())
    }
}
