//! Fault-injecting storage wrapper.
//!
//! Delegates to another [`Storage`] but fails a seeded, reproducible fraction
//! of calls with `StorageError::Io`. Used to check that the driver answers
//! storage faults with an error reply and never leaves half-applied state.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use super::{Storage, StorageError, StoredTransaction, StoredUser, TransferOutcome};

/// Storage wrapper that randomly injects failures.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    state: Arc<Mutex<ChaosState>>,
}

struct ChaosState {
    rng: u64,
    operations: usize,
    injected: usize,
}

impl ChaosState {
    /// Next value in [0.0, 1.0) from a 32-bit LCG (Numerical Recipes constants).
    fn next(&mut self) -> f64 {
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1 << 32;

        self.rng = A.wrapping_mul(self.rng).wrapping_add(C) % M;
        #[allow(clippy::cast_precision_loss, reason = "both values fit in 32 bits")]
        let value = self.rng as f64 / M as f64;
        value
    }
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner` with a fixed seed. `failure_rate` is clamped to [0, 1].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            state: Arc::new(Mutex::new(ChaosState { rng: seed, operations: 0, injected: 0 })),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Calls attempted so far.
    pub fn operation_count(&self) -> usize {
        self.state.lock().map_or(0, |state| state.operations)
    }

    /// Calls failed on purpose so far.
    pub fn injected_count(&self) -> usize {
        self.state.lock().map_or(0, |state| state.injected)
    }

    fn maybe_fail(&self) -> Result<(), StorageError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StorageError::Io("chaos state lock poisoned".to_string()))?;

        state.operations += 1;
        if state.next() < self.failure_rate {
            state.injected += 1;
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn create_user(&self, user: &StoredUser) -> Result<bool, StorageError> {
        self.maybe_fail()?;
        self.inner.create_user(user)
    }

    fn load_user(&self, username: &str) -> Result<Option<StoredUser>, StorageError> {
        self.maybe_fail()?;
        self.inner.load_user(username)
    }

    fn list_users(&self) -> Result<Vec<StoredUser>, StorageError> {
        self.maybe_fail()?;
        self.inner.list_users()
    }

    fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        timestamp: &str,
    ) -> Result<TransferOutcome, StorageError> {
        self.maybe_fail()?;
        self.inner.transfer(from, to, amount, timestamp)
    }

    fn ledger(&self) -> Result<Vec<StoredTransaction>, StorageError> {
        self.maybe_fail()?;
        self.inner.ledger()
    }
}
