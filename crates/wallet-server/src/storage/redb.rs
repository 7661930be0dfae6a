//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! transfer is one write transaction, so a crash mid-transfer leaves both
//! balances and the ledger as they were.

use std::{fmt::Display, path::Path, sync::Arc};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Storage, StorageError, StoredTransaction, StoredUser, TransferOutcome, settle};

/// Table: users
/// Key: username
/// Value: CBOR-encoded StoredUser
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Table: signup_order
/// Key: signup position, from 0
/// Value: username
const SIGNUP_ORDER: TableDefinition<u64, &str> = TableDefinition::new("signup_order");

/// Table: ledger
/// Key: sequence number, from 0
/// Value: CBOR-encoded StoredTransaction
const LEDGER: TableDefinition<u64, &[u8]> = TableDefinition::new("ledger");

fn io(err: impl Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn load_user_in<T: ReadableTable<&'static str, &'static [u8]>>(
    table: &T,
    username: &str,
) -> Result<Option<StoredUser>, StorageError> {
    match table.get(username).map_err(io)? {
        Some(value) => Ok(Some(decode(value.value())?)),
        None => Ok(None),
    }
}

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (USERS, SIGNUP_ORDER, LEDGER).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(USERS).map_err(io)?;
            let _ = txn.open_table(SIGNUP_ORDER).map_err(io)?;
            let _ = txn.open_table(LEDGER).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn create_user(&self, user: &StoredUser) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut users = txn.open_table(USERS).map_err(io)?;
            if users.get(user.username.as_str()).map_err(io)?.is_some() {
                return Ok(false);
            }

            let bytes = encode(user)?;
            users.insert(user.username.as_str(), bytes.as_slice()).map_err(io)?;

            let mut order = txn.open_table(SIGNUP_ORDER).map_err(io)?;
            let position = order.len().map_err(io)?;
            order.insert(position, user.username.as_str()).map_err(io)?;
        }

        txn.commit().map_err(io)?;

        Ok(true)
    }

    fn load_user(&self, username: &str) -> Result<Option<StoredUser>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let users = txn.open_table(USERS).map_err(io)?;

        load_user_in(&users, username)
    }

    fn list_users(&self) -> Result<Vec<StoredUser>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let order = txn.open_table(SIGNUP_ORDER).map_err(io)?;
        let users = txn.open_table(USERS).map_err(io)?;

        let mut listed = Vec::new();
        for entry in order.iter().map_err(io)? {
            let (_, name) = entry.map_err(io)?;
            let name = name.value();
            let Some(value) = users.get(name).map_err(io)? else {
                return Err(StorageError::Corrupt(format!("signup order names missing user {name}")));
            };
            listed.push(decode(value.value())?);
        }

        Ok(listed)
    }

    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        timestamp: &str,
    ) -> Result<TransferOutcome, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let outcome = {
            let mut users = txn.open_table(USERS).map_err(io)?;

            let Some(mut sender) = load_user_in(&users, from)? else {
                // Nothing written; dropping the transaction aborts it
                return Ok(TransferOutcome::UnknownSender);
            };
            let Some(mut receiver) = load_user_in(&users, to)? else {
                return Ok(TransferOutcome::UnknownReceiver);
            };

            let (sender_balance, receiver_balance) = match settle(&sender, &receiver, amount) {
                Ok(balances) => balances,
                Err(outcome) => return Ok(outcome),
            };
            sender.balance = sender_balance;
            receiver.balance = receiver_balance;

            users.insert(from, encode(&sender)?.as_slice()).map_err(io)?;
            users.insert(to, encode(&receiver)?.as_slice()).map_err(io)?;

            let mut ledger = txn.open_table(LEDGER).map_err(io)?;
            let sequence = ledger.len().map_err(io)?;
            let entry = StoredTransaction {
                sequence,
                from: from.to_string(),
                to: to.to_string(),
                amount,
                timestamp: timestamp.to_string(),
            };
            ledger.insert(sequence, encode(&entry)?.as_slice()).map_err(io)?;

            TransferOutcome::Completed { sender_balance, sequence }
        };

        txn.commit().map_err(io)?;

        Ok(outcome)
    }

    fn ledger(&self) -> Result<Vec<StoredTransaction>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let ledger = txn.open_table(LEDGER).map_err(io)?;

        let mut entries = Vec::new();
        for entry in ledger.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            entries.push(decode(value.value())?);
        }

        Ok(entries)
    }
}
