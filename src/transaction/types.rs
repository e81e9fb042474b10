//! Transaction core types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::state::TransactionState;

/// Transaction ID - ULID-based unique identifier.
///
/// Monotonic, sortable, no coordination needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// One escrow transaction. Owned exclusively by the state machine: mutated
/// only through guarded transitions, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub listing_id: u64,
    pub buyer_id: u64,
    pub seller_id: u64,
    /// Amount in minor units (cents).
    pub amount_minor: u64,
    /// ISO-4217 code, e.g. "KES".
    pub currency: String,
    pub state: TransactionState,

    /// Provider reference for the escrow charge.
    pub provider_reference: Option<String>,
    pub provider_authorization_code: Option<String>,

    /// One ISO-8601 timestamp per state entered, immutable once set.
    entered_at: BTreeMap<TransactionState, String>,

    pub buyer_confirmed_access: bool,
    pub account_verified: bool,

    /// Payout bookkeeping, filled at release.
    pub payout_reference: Option<String>,
    pub commission_minor: Option<u64>,
    pub payout_minor: Option<u64>,

    /// Audit notes (dispute reasons, admin overrides).
    pub notes: Vec<String>,
}

impl Transaction {
    pub fn new(
        id: TransactionId,
        listing_id: u64,
        buyer_id: u64,
        seller_id: u64,
        amount_minor: u64,
        currency: String,
        now: DateTime<Utc>,
    ) -> Self {
        let mut txn = Self {
            id,
            listing_id,
            buyer_id,
            seller_id,
            amount_minor,
            currency,
            state: TransactionState::PurchaseInitiated,
            provider_reference: None,
            provider_authorization_code: None,
            entered_at: BTreeMap::new(),
            buyer_confirmed_access: false,
            account_verified: false,
            payout_reference: None,
            commission_minor: None,
            payout_minor: None,
            notes: Vec::new(),
        };
        txn.mark_entered(TransactionState::PurchaseInitiated, now);
        txn
    }

    /// When the transaction first entered `state`, if ever.
    pub fn entered_at(&self, state: TransactionState) -> Option<&str> {
        self.entered_at.get(&state).map(|s| s.as_str())
    }

    /// Record the entry timestamp for a state. Write-once: a second entry
    /// into the same state (not expressible in the graph anyway) keeps the
    /// original timestamp.
    pub(crate) fn mark_entered(&mut self, state: TransactionState, now: DateTime<Utc>) {
        self.entered_at
            .entry(state)
            .or_insert_with(|| now.to_rfc3339());
    }

    pub fn append_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] listing={} buyer={} seller={} amount={} {} state={}",
            self.id,
            self.listing_id,
            self.buyer_id,
            self.seller_id,
            self.amount_minor,
            self.currency,
            self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulid_uniqueness() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn test_id_string_roundtrip() {
        let id = TransactionId::new();
        assert_eq!(id.to_string().parse::<TransactionId>(), Ok(id));
    }

    #[test]
    fn test_new_transaction_starts_initiated() {
        let now = Utc::now();
        let txn = Transaction::new(TransactionId::new(), 7, 1, 2, 10_000, "KES".into(), now);
        assert_eq!(txn.state, TransactionState::PurchaseInitiated);
        assert_eq!(
            txn.entered_at(TransactionState::PurchaseInitiated),
            Some(now.to_rfc3339().as_str())
        );
        assert!(txn.entered_at(TransactionState::FundsHeld).is_none());
    }

    #[test]
    fn test_entered_at_is_write_once() {
        let now = Utc::now();
        let mut txn = Transaction::new(TransactionId::new(), 7, 1, 2, 10_000, "KES".into(), now);
        let first = txn
            .entered_at(TransactionState::PurchaseInitiated)
            .unwrap()
            .to_string();
        txn.mark_entered(
            TransactionState::PurchaseInitiated,
            now + chrono::Duration::hours(1),
        );
        assert_eq!(
            txn.entered_at(TransactionState::PurchaseInitiated),
            Some(first.as_str())
        );
    }
}
