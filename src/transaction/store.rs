//! In-memory transaction store.
//!
//! Persistence mechanics are a collaborator concern; this store is the
//! interface the core needs: keyed lookup, provider-reference lookup, and
//! closure-based read-modify-write applied under the map's entry lock.
//! Cross-entity atomicity comes from the per-transaction [`LockRegistry`]
//! held by the service around every mutation.
//!
//! [`LockRegistry`]: crate::locks::LockRegistry

use dashmap::DashMap;

use crate::error::EscrowError;

use super::types::{Transaction, TransactionId};

#[derive(Default)]
pub struct TransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
    /// listing id -> transactions ever created for it.
    by_listing: DashMap<u64, Vec<TransactionId>>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new transaction.
    ///
    /// Enforces the cross-entity invariant: a listing has at most one
    /// non-terminal transaction at any time.
    pub fn create(&self, txn: Transaction) -> Result<(), EscrowError> {
        // Entry lock on the listing index serializes concurrent creates
        // for the same listing.
        let mut ids = self.by_listing.entry(txn.listing_id).or_default();

        let has_active = ids.iter().any(|id| {
            self.transactions
                .get(id)
                .map(|t| !t.state.is_terminal())
                .unwrap_or(false)
        });
        if has_active {
            return Err(EscrowError::Validation(format!(
                "listing {} already has an active transaction",
                txn.listing_id
            )));
        }

        ids.push(txn.id);
        self.transactions.insert(txn.id, txn);
        Ok(())
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.transactions.get(&id).map(|t| t.clone())
    }

    /// Look up by the payment provider's charge reference.
    pub fn find_by_reference(&self, reference: &str) -> Option<Transaction> {
        self.transactions
            .iter()
            .find(|t| t.provider_reference.as_deref() == Some(reference))
            .map(|t| t.clone())
    }

    /// Read-modify-write under the entry lock.
    ///
    /// The closure's error aborts the mutation: the stored transaction is
    /// only replaced when the closure succeeds, so a failed multi-step
    /// update leaves no partial write behind.
    pub fn update<R>(
        &self,
        id: TransactionId,
        mutate: impl FnOnce(&mut Transaction) -> Result<R, EscrowError>,
    ) -> Result<R, EscrowError> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| EscrowError::TransactionNotFound(id.to_string()))?;

        let mut working = entry.clone();
        let result = mutate(&mut working)?;
        *entry = working;
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionState;
    use chrono::Utc;

    fn txn_for_listing(listing_id: u64) -> Transaction {
        Transaction::new(
            TransactionId::new(),
            listing_id,
            1,
            2,
            10_000,
            "KES".into(),
            Utc::now(),
        )
    }

    #[test]
    fn test_one_active_transaction_per_listing() {
        let store = TransactionStore::new();
        store.create(txn_for_listing(7)).unwrap();

        let err = store.create(txn_for_listing(7)).unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));

        // Different listing is fine.
        store.create(txn_for_listing(8)).unwrap();
    }

    #[test]
    fn test_terminal_transaction_frees_listing() {
        let store = TransactionStore::new();
        let mut txn = txn_for_listing(7);
        txn.state = TransactionState::Cancelled;
        let id = txn.id;
        store.create(txn).unwrap();
        assert!(store.get(id).is_some());

        store.create(txn_for_listing(7)).unwrap();
    }

    #[test]
    fn test_update_rolls_back_on_error() {
        let store = TransactionStore::new();
        let txn = txn_for_listing(7);
        let id = txn.id;
        store.create(txn).unwrap();

        let result: Result<(), _> = store.update(id, |t| {
            t.account_verified = true;
            Err(EscrowError::Validation("boom".into()))
        });
        assert!(result.is_err());
        assert!(!store.get(id).unwrap().account_verified);
    }

    #[test]
    fn test_find_by_reference() {
        let store = TransactionStore::new();
        let txn = txn_for_listing(7);
        let id = txn.id;
        store.create(txn).unwrap();

        store
            .update(id, |t| {
                t.provider_reference = Some("PSK_REF_1".into());
                Ok(())
            })
            .unwrap();

        assert_eq!(store.find_by_reference("PSK_REF_1").map(|t| t.id), Some(id));
        assert!(store.find_by_reference("PSK_REF_2").is_none());
    }

    #[test]
    fn test_update_unknown_transaction() {
        let store = TransactionStore::new();
        let err = store
            .update(TransactionId::new(), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, EscrowError::TransactionNotFound(_)));
    }
}
