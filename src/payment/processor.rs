//! Idempotent payment-event ingestion.
//!
//! Verify signature over the raw body, parse, dedup by provider event id,
//! then drive the transaction state machine under the per-transaction lock.
//! Webhook delivery is at-least-once and out-of-order: a stale event whose
//! guard state no longer matches is stored `processed=false` and logged,
//! never raised to the caller.

use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::sync::Arc;

use crate::error::EscrowError;
use crate::locks::LockRegistry;
use crate::payout::calculate_commission;
use crate::transaction::{
    GuardContext, Transaction, TransactionState, TransactionStore, attempt_transition,
};

use super::types::{
    PaymentEvent, ProcessingResult, ProcessingStatus, ProviderEventType, WebhookPayload,
};

type HmacSha512 = Hmac<Sha512>;

pub struct PaymentEventProcessor {
    webhook_secret: String,
    commission_percent: u8,
    events: DashMap<String, PaymentEvent>,
    transactions: Arc<TransactionStore>,
    locks: Arc<LockRegistry>,
}

impl PaymentEventProcessor {
    pub fn new(
        webhook_secret: String,
        commission_percent: u8,
        transactions: Arc<TransactionStore>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            webhook_secret,
            commission_percent,
            events: DashMap::new(),
            transactions,
            locks,
        }
    }

    /// Verify the hex-encoded HMAC-SHA512 signature over the raw body.
    ///
    /// Runs before any parsing. Comparison is constant-time via
    /// `Mac::verify_slice`.
    pub fn verify_signature(&self, raw_body: &[u8], signature_hex: &str) -> Result<(), EscrowError> {
        let signature = hex::decode(signature_hex.trim()).map_err(|_| EscrowError::Signature)?;
        let mut mac = HmacSha512::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("webhook secret rejected by HMAC: {}", e))?;
        mac.update(raw_body);
        mac.verify_slice(&signature).map_err(|_| EscrowError::Signature)
    }

    /// Ingest one webhook delivery.
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<ProcessingResult, EscrowError> {
        self.verify_signature(raw_body, signature_header)?;

        let payload: WebhookPayload = serde_json::from_slice(raw_body)
            .map_err(|e| EscrowError::Validation(format!("malformed webhook body: {}", e)))?;
        let event_id = payload
            .event_id()
            .ok_or_else(|| EscrowError::Validation("webhook body missing event id".to_string()))?;
        let event_type = ProviderEventType::parse(&payload.event);

        // Idempotency: same provider event id replays the recorded outcome.
        // The entry call also claims the id, so a concurrent duplicate sees
        // the in-flight record and stops here.
        match self.events.entry(event_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let dup = EscrowError::DuplicateEvent(event_id.clone());
                tracing::info!(error = %dup, "replaying recorded outcome");
                return Ok(existing.get().outcome.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PaymentEvent {
                    provider_event_id: event_id.clone(),
                    event_type: event_type.clone(),
                    reference: payload.data.reference.clone(),
                    payload: String::from_utf8_lossy(raw_body).into_owned(),
                    signature_verified: true,
                    processed: false,
                    processed_at: None,
                    error: None,
                    transaction_id: None,
                    outcome: ProcessingResult::new(
                        ProcessingStatus::Recorded,
                        "event accepted",
                        None,
                    ),
                });
            }
        }

        // The claim is committed only on a definitive outcome. A retryable
        // failure (lock timeout, internal error) releases it so the
        // provider's redelivery re-processes instead of replaying the
        // in-flight placeholder.
        let outcome = match self.apply(&event_id, &event_type, &payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.events.remove(&event_id);
                return Err(e);
            }
        };
        self.record_outcome(&event_id, &outcome);
        Ok(outcome)
    }

    /// Number of persisted payment events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn get_event(&self, event_id: &str) -> Option<PaymentEvent> {
        self.events.get(event_id).map(|e| e.clone())
    }

    async fn apply(
        &self,
        event_id: &str,
        event_type: &ProviderEventType,
        payload: &WebhookPayload,
    ) -> Result<ProcessingResult, EscrowError> {
        let Some(reference) = payload.data.reference.as_deref() else {
            return Ok(ProcessingResult::new(
                ProcessingStatus::Recorded,
                "event has no transaction reference",
                None,
            ));
        };

        let Some(txn) = self.transactions.find_by_reference(reference) else {
            tracing::warn!(event_id, reference, "no transaction matches webhook reference");
            return Ok(ProcessingResult::new(
                ProcessingStatus::Unmatched,
                "no matching transaction",
                None,
            ));
        };

        let authorization_code = payload
            .data
            .authorization
            .as_ref()
            .and_then(|a| a.authorization_code.clone());

        // Serialize with buyer/admin operations on the same transaction.
        let _guard = self.locks.acquire(txn.id).await?;

        let result = match event_type {
            ProviderEventType::ChargeSuccess => {
                self.transactions.update(txn.id, |t| {
                    attempt_transition(t, TransactionState::FundsHeld, &GuardContext::default(), Utc::now())?;
                    if let Some(code) = authorization_code {
                        t.provider_authorization_code = Some(code);
                    }
                    Ok(())
                })
            }
            ProviderEventType::ChargeFailed => self.transactions.update(txn.id, |t| {
                attempt_transition(t, TransactionState::Cancelled, &GuardContext::default(), Utc::now())
            }),
            ProviderEventType::Refund => self.transactions.update(txn.id, |t| {
                attempt_transition(t, TransactionState::Refunded, &GuardContext::default(), Utc::now())
            }),
            ProviderEventType::TransferSuccess => {
                let commission_percent = self.commission_percent;
                let event_ref = reference.to_string();
                self.transactions.update(txn.id, |t| {
                    attempt_transition(
                        t,
                        TransactionState::FundsReleased,
                        &GuardContext::default(),
                        Utc::now(),
                    )?;
                    fill_payout_fields(t, commission_percent, &event_ref);
                    // Provider transfer confirmed: the escrow is done.
                    attempt_transition(
                        t,
                        TransactionState::Completed,
                        &GuardContext::default(),
                        Utc::now(),
                    )
                })
            }
            ProviderEventType::TransferFailed => {
                // Payout failed at the provider; stay in FundsReleasePending
                // for retry. Record only.
                let _ = self.transactions.update(txn.id, |t| {
                    t.append_note(format!("provider transfer failed (event {})", event_id));
                    Ok(())
                });
                return Ok(ProcessingResult::new(
                    ProcessingStatus::Recorded,
                    "transfer failure recorded",
                    Some(txn.id),
                ));
            }
            ProviderEventType::Other(kind) => {
                tracing::info!(event_id, kind = kind.as_str(), "unhandled provider event type");
                return Ok(ProcessingResult::new(
                    ProcessingStatus::Recorded,
                    "event type recorded, no transition",
                    Some(txn.id),
                ));
            }
        };

        match result {
            Ok(()) => Ok(ProcessingResult::new(
                ProcessingStatus::Processed,
                format!("{} applied", event_type),
                Some(txn.id),
            )),
            Err(EscrowError::InvalidTransition { from, to }) => {
                // Expected under at-least-once / out-of-order delivery:
                // store for audit, do not fail the webhook.
                tracing::warn!(
                    event_id,
                    transaction_id = %txn.id,
                    %from,
                    %to,
                    "stale or out-of-order payment event ignored"
                );
                self.mark_error(event_id, &format!("guard failed: {} -> {}", from, to));
                Ok(ProcessingResult::new(
                    ProcessingStatus::Ignored,
                    "event ignored: transaction state does not accept it",
                    Some(txn.id),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn record_outcome(&self, event_id: &str, outcome: &ProcessingResult) {
        if let Some(mut event) = self.events.get_mut(event_id) {
            event.outcome = outcome.clone();
            event.transaction_id = outcome.transaction_id;
            if matches!(
                outcome.status,
                ProcessingStatus::Processed | ProcessingStatus::Recorded
            ) {
                event.processed = outcome.status == ProcessingStatus::Processed;
                event.processed_at = Some(Utc::now());
            }
        }
    }

    fn mark_error(&self, event_id: &str, error: &str) {
        if let Some(mut event) = self.events.get_mut(event_id) {
            event.processed = false;
            event.error = Some(error.to_string());
        }
    }
}

fn fill_payout_fields(txn: &mut Transaction, commission_percent: u8, payout_reference: &str) {
    if txn.commission_minor.is_none() {
        let (commission, payout) = calculate_commission(txn.amount_minor, commission_percent);
        txn.commission_minor = Some(commission);
        txn.payout_minor = Some(payout);
    }
    if txn.payout_reference.is_none() {
        txn.payout_reference = Some(payout_reference.to_string());
    }
}
