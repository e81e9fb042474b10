//! Per-transaction lock registry.
//!
//! Buyer requests, admin overrides, and webhook ingestion can all race on
//! the same transaction. Every state-mutating operation serializes on the
//! transaction's lock before evaluating guards. Acquisition has a bounded
//! wait; on timeout the caller gets a retryable error.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::EscrowError;
use crate::transaction::TransactionId;

pub struct LockRegistry {
    locks: DashMap<TransactionId, Arc<Mutex<()>>>,
    max_wait: Duration,
}

impl LockRegistry {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            max_wait,
        }
    }

    /// Acquire the exclusive lock for a transaction.
    ///
    /// Returns [`EscrowError::ConcurrencyConflict`] if the lock cannot be
    /// taken within the bounded wait. The guard releases on drop, including
    /// error paths.
    pub async fn acquire(
        &self,
        transaction_id: TransactionId,
    ) -> Result<OwnedMutexGuard<()>, EscrowError> {
        let lock = self
            .locks
            .entry(transaction_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::time::timeout(self.max_wait, lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(transaction_id = %transaction_id, "lock wait exceeded");
                EscrowError::ConcurrencyConflict
            })
    }

    /// Drop the lock entry for a terminal transaction.
    pub fn remove(&self, transaction_id: TransactionId) {
        self.locks.remove(&transaction_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
