//! Escrow service - the collaborator-facing surface.
//!
//! Owns the stores, the vault, the payment processor and the lock
//! registry, and is the only place that assembles [`GuardContext`]s.
//! Every state-mutating operation acquires the per-transaction lock before
//! evaluating guards; the lock releases on drop, including error paths.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::access::TemporaryAccess;
use crate::agreement::{Acknowledgments, OwnershipAgreement, SignatureContext};
use crate::cache::TtlCache;
use crate::config::EscrowConfig;
use crate::error::EscrowError;
use crate::locks::LockRegistry;
use crate::payment::{PaymentEventProcessor, ProcessingResult};
use crate::payout::calculate_commission;
use crate::transaction::{
    GuardContext, Transaction, TransactionId, TransactionState, TransactionStore,
    attempt_transition, force_transition,
};
use crate::vault::{CredentialInput, CryptoEngine, PlaintextBundle, VaultStore};

/// Listing facts the escrow core needs from the marketplace.
#[derive(Debug, Clone)]
pub struct ListingPrice {
    pub amount_minor: u64,
    pub currency: String,
    pub seller_id: u64,
}

/// Marketplace collaborator. Listings, users and their lifecycle live
/// outside the core; the escrow consumes this narrow interface.
#[async_trait]
pub trait ListingDirectory: Send + Sync {
    async fn get_listing_price(&self, listing_id: u64) -> Result<ListingPrice, EscrowError>;
    async fn get_registered_legal_name(&self, user_id: u64) -> Result<String, EscrowError>;
    async fn lock_listing(&self, listing_id: u64) -> Result<(), EscrowError>;
    async fn unlock_listing(&self, listing_id: u64) -> Result<(), EscrowError>;
}

pub struct EscrowService {
    config: EscrowConfig,
    directory: Arc<dyn ListingDirectory>,
    transactions: Arc<TransactionStore>,
    vaults: VaultStore,
    processor: PaymentEventProcessor,
    locks: Arc<LockRegistry>,
    agreements: DashMap<TransactionId, OwnershipAgreement>,
    accesses: DashMap<TransactionId, TemporaryAccess>,
    price_cache: TtlCache<u64, ListingPrice>,
}

impl std::fmt::Debug for EscrowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EscrowService { .. }")
    }
}

impl EscrowService {
    pub fn new(
        config: EscrowConfig,
        directory: Arc<dyn ListingDirectory>,
    ) -> Result<Self, EscrowError> {
        if config.commission_percent > 100 {
            return Err(EscrowError::Validation(format!(
                "commission percent {} exceeds 100",
                config.commission_percent
            )));
        }
        let transactions = Arc::new(TransactionStore::new());
        let locks = Arc::new(LockRegistry::new(Duration::from_millis(config.lock_wait_ms)));
        let engine = CryptoEngine::new(config.crypto.clone(), config.encryption_pepper.clone());
        let processor = PaymentEventProcessor::new(
            config.provider_webhook_secret.clone(),
            config.commission_percent,
            Arc::clone(&transactions),
            Arc::clone(&locks),
        );

        Ok(Self {
            directory,
            transactions,
            vaults: VaultStore::new(engine),
            processor,
            locks,
            agreements: DashMap::new(),
            accesses: DashMap::new(),
            price_cache: TtlCache::new(Duration::from_secs(30), 1024),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Buyer purchase flow (step-locked)
    // ------------------------------------------------------------------

    /// Step 1: reserve the listing and open the transaction.
    pub async fn initiate_purchase(
        &self,
        listing_id: u64,
        buyer_id: u64,
    ) -> Result<Transaction, EscrowError> {
        let price = self.listing_price(listing_id).await?;
        if price.seller_id == buyer_id {
            return Err(EscrowError::Validation(
                "buyer cannot purchase their own listing".to_string(),
            ));
        }

        self.directory.lock_listing(listing_id).await?;

        let txn = Transaction::new(
            TransactionId::new(),
            listing_id,
            buyer_id,
            price.seller_id,
            price.amount_minor,
            price.currency,
            Utc::now(),
        );
        if let Err(e) = self.transactions.create(txn.clone()) {
            // Listing stays available for whoever holds the active transaction.
            self.directory.unlock_listing(listing_id).await?;
            return Err(e);
        }

        tracing::info!(transaction_id = %txn.id, listing_id, buyer_id, "purchase initiated");
        Ok(txn)
    }

    /// Step 2: the buyer was sent to the provider; remember the charge
    /// reference the webhook will come back with.
    pub async fn begin_payment(
        &self,
        transaction_id: TransactionId,
        provider_reference: String,
    ) -> Result<Transaction, EscrowError> {
        if provider_reference.trim().is_empty() {
            return Err(EscrowError::Validation(
                "provider reference must not be empty".to_string(),
            ));
        }
        let _guard = self.locks.acquire(transaction_id).await?;
        self.transactions.update(transaction_id, |txn| {
            attempt_transition(
                txn,
                TransactionState::PaymentPending,
                &GuardContext::default(),
                Utc::now(),
            )?;
            txn.provider_reference = Some(provider_reference.clone());
            Ok(txn.clone())
        })
    }

    /// Seller side: deliver credentials into the vault. Must happen before
    /// temporary access can be granted.
    pub async fn deliver_credentials(
        &self,
        listing_id: u64,
        input: CredentialInput,
        passphrase: &str,
    ) -> Result<(), EscrowError> {
        self.vaults.store(listing_id, input, passphrase).await
    }

    /// Step 3: grant the buyer the time-boxed access window. Requires the
    /// vault to exist for the listing.
    pub async fn grant_temporary_access(
        &self,
        transaction_id: TransactionId,
    ) -> Result<TemporaryAccess, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let now = Utc::now();

        let txn = self.get_transaction(transaction_id)?;
        let ctx = GuardContext {
            vault_stored: self.vaults.exists(txn.listing_id),
            ..Default::default()
        };
        self.transactions.update(transaction_id, |txn| {
            attempt_transition(txn, TransactionState::TemporaryAccessGranted, &ctx, now)
        })?;

        let access = self
            .accesses
            .entry(transaction_id)
            .or_insert_with(|| {
                TemporaryAccess::grant(
                    transaction_id,
                    now,
                    self.config.access_window_hours,
                    self.config.max_login_attempts,
                )
            })
            .clone();
        Ok(access)
    }

    /// Buyer acknowledges the access terms (no account-detail changes
    /// during the window).
    pub async fn acknowledge_access_terms(
        &self,
        transaction_id: TransactionId,
    ) -> Result<TemporaryAccess, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let mut access = self.accesses.get_mut(&transaction_id).ok_or_else(|| {
            EscrowError::Validation("no temporary access granted".to_string())
        })?;
        access.acknowledge_terms(Utc::now());
        Ok(access.clone())
    }

    /// Step 4a: open the verification window while access is active.
    pub async fn start_verification_window(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Transaction, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let now = Utc::now();
        let access = self.accesses.get(&transaction_id).map(|a| a.clone());
        let ctx = GuardContext {
            access: access.as_ref(),
            ..Default::default()
        };
        self.transactions.update(transaction_id, |txn| {
            attempt_transition(txn, TransactionState::VerificationWindow, &ctx, now)?;
            Ok(txn.clone())
        })
    }

    /// Step 4b: buyer reports the verification outcome.
    ///
    /// Bounded by the verification window: once it elapses the outcome can
    /// no longer be reported and the transaction must branch to refund or
    /// dispute.
    pub async fn verify_account(
        &self,
        transaction_id: TransactionId,
        verified: bool,
    ) -> Result<Transaction, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let window_hours = self.config.verification_window_hours;
        self.transactions.update(transaction_id, |txn| {
            if txn.state != TransactionState::VerificationWindow {
                return Err(EscrowError::InvalidTransition {
                    from: txn.state,
                    to: TransactionState::OwnershipAgreementPending,
                });
            }
            if verification_window_elapsed(txn, window_hours, Utc::now()) {
                return Err(EscrowError::Validation(
                    "verification window has expired".to_string(),
                ));
            }
            txn.account_verified = verified;
            if verified {
                attempt_transition(
                    txn,
                    TransactionState::OwnershipAgreementPending,
                    &GuardContext::default(),
                    Utc::now(),
                )?;
            }
            Ok(txn.clone())
        })
    }

    /// Step 5a: create the agreement document. Idempotent.
    pub async fn create_agreement(
        &self,
        transaction_id: TransactionId,
        content: String,
        version: String,
    ) -> Result<OwnershipAgreement, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let txn = self.get_transaction(transaction_id)?;
        if txn.state != TransactionState::OwnershipAgreementPending {
            return Err(EscrowError::InvalidTransition {
                from: txn.state,
                to: TransactionState::OwnershipAgreementSigned,
            });
        }
        let agreement = self
            .agreements
            .entry(transaction_id)
            .or_insert_with(|| OwnershipAgreement::new(transaction_id, content, version))
            .clone();
        Ok(agreement)
    }

    /// Step 5b: sign. All four acknowledgments plus a legal-name match.
    pub async fn sign_agreement(
        &self,
        transaction_id: TransactionId,
        signer_name: &str,
        acknowledgments: Acknowledgments,
        context: SignatureContext,
    ) -> Result<OwnershipAgreement, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let now = Utc::now();

        let txn = self.get_transaction(transaction_id)?;
        let mut agreement = self
            .agreements
            .get(&transaction_id)
            .map(|a| a.clone())
            .ok_or_else(|| {
                EscrowError::Validation("ownership agreement has not been created".to_string())
            })?;

        agreement.sign(signer_name, acknowledgments, context, now)?;
        let legal_name = self.directory.get_registered_legal_name(txn.buyer_id).await?;

        let ctx = GuardContext {
            agreement: Some(&agreement),
            buyer_legal_name: Some(&legal_name),
            ..Default::default()
        };
        self.transactions.update(transaction_id, |txn| {
            attempt_transition(txn, TransactionState::OwnershipAgreementSigned, &ctx, now)
        })?;

        // Persist the signature only after the transition was accepted.
        self.agreements.insert(transaction_id, agreement.clone());
        Ok(agreement)
    }

    /// Step 6a: buyer confirms access and asks for the funds to move.
    pub async fn request_funds_release(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Transaction, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let agreement = self.agreements.get(&transaction_id).map(|a| a.clone());
        let ctx = GuardContext {
            agreement: agreement.as_ref(),
            ..Default::default()
        };
        self.transactions.update(transaction_id, |txn| {
            attempt_transition(txn, TransactionState::FundsReleasePending, &ctx, Utc::now())?;
            txn.buyer_confirmed_access = true;
            Ok(txn.clone())
        })
    }

    /// Step 6b: payout confirmed; split commission and close out.
    ///
    /// Normally driven by the provider's transfer.success webhook; this is
    /// the direct path for a synchronous payout confirmation.
    pub async fn release_funds(
        &self,
        transaction_id: TransactionId,
        payout_reference: String,
    ) -> Result<Transaction, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let commission_percent = self.config.commission_percent;
        let released = self.transactions.update(transaction_id, |txn| {
            attempt_transition(
                txn,
                TransactionState::FundsReleased,
                &GuardContext::default(),
                Utc::now(),
            )?;
            let (commission, payout) = calculate_commission(txn.amount_minor, commission_percent);
            txn.commission_minor = Some(commission);
            txn.payout_minor = Some(payout);
            txn.payout_reference = Some(payout_reference.clone());
            attempt_transition(
                txn,
                TransactionState::Completed,
                &GuardContext::default(),
                Utc::now(),
            )?;
            Ok(txn.clone())
        })?;

        // Listing leaves escrow for good.
        self.directory.unlock_listing(released.listing_id).await?;
        self.locks.remove(transaction_id);
        tracing::info!(
            transaction_id = %transaction_id,
            commission = released.commission_minor,
            payout = released.payout_minor,
            "funds released, escrow completed"
        );
        Ok(released)
    }

    // ------------------------------------------------------------------
    // Side branches
    // ------------------------------------------------------------------

    pub async fn cancel(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> Result<Transaction, EscrowError> {
        self.branch_to(transaction_id, TransactionState::Cancelled, reason).await
    }

    pub async fn refund(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> Result<Transaction, EscrowError> {
        self.branch_to(transaction_id, TransactionState::Refunded, reason).await
    }

    pub async fn open_dispute(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> Result<Transaction, EscrowError> {
        if reason.trim().is_empty() {
            return Err(EscrowError::Validation(
                "dispute reason must not be empty".to_string(),
            ));
        }
        let _guard = self.locks.acquire(transaction_id).await?;
        self.transactions.update(transaction_id, |txn| {
            attempt_transition(txn, TransactionState::Disputed, &GuardContext::default(), Utc::now())?;
            txn.append_note(format!("dispute opened: {}", reason));
            Ok(txn.clone())
        })
    }

    /// Administrative resolution of a dispute. Bypasses buyer guards;
    /// the audit reason is mandatory and recorded.
    ///
    /// Resolving to FundsReleased runs the same payout bookkeeping and
    /// auto-completion as the normal release path.
    pub async fn resolve_dispute(
        &self,
        transaction_id: TransactionId,
        target: TransactionState,
        audit_reason: &str,
    ) -> Result<Transaction, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let commission_percent = self.config.commission_percent;
        let resolved = self.transactions.update(transaction_id, |txn| {
            force_transition(txn, target, audit_reason, Utc::now())?;
            if txn.state == TransactionState::FundsReleased {
                if txn.commission_minor.is_none() {
                    let (commission, payout) =
                        calculate_commission(txn.amount_minor, commission_percent);
                    txn.commission_minor = Some(commission);
                    txn.payout_minor = Some(payout);
                }
                attempt_transition(
                    txn,
                    TransactionState::Completed,
                    &GuardContext::default(),
                    Utc::now(),
                )?;
            }
            Ok(txn.clone())
        })?;

        if resolved.state.is_terminal() {
            self.directory.unlock_listing(resolved.listing_id).await?;
            self.locks.remove(transaction_id);
        }
        Ok(resolved)
    }

    async fn branch_to(
        &self,
        transaction_id: TransactionId,
        target: TransactionState,
        reason: &str,
    ) -> Result<Transaction, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let txn = self.transactions.update(transaction_id, |txn| {
            attempt_transition(txn, target, &GuardContext::default(), Utc::now())?;
            if !reason.trim().is_empty() {
                txn.append_note(format!("{}: {}", target, reason));
            }
            Ok(txn.clone())
        })?;
        self.directory.unlock_listing(txn.listing_id).await?;
        self.locks.remove(transaction_id);
        Ok(txn)
    }

    // ------------------------------------------------------------------
    // Collaborator queries and pass-throughs
    // ------------------------------------------------------------------

    /// One-time credential reveal, buyer-only, inside the access window.
    pub async fn reveal_once(
        &self,
        transaction_id: TransactionId,
        passphrase: &str,
        requesting_user_id: u64,
    ) -> Result<PlaintextBundle, EscrowError> {
        let _guard = self.locks.acquire(transaction_id).await?;
        let now = Utc::now();

        let txn = self.get_transaction(transaction_id)?;
        if txn.buyer_id != requesting_user_id {
            return Err(EscrowError::Validation(
                "only the buyer may reveal credentials".to_string(),
            ));
        }
        if !matches!(
            txn.state,
            TransactionState::TemporaryAccessGranted | TransactionState::VerificationWindow
        ) {
            return Err(EscrowError::InvalidTransition {
                from: txn.state,
                to: TransactionState::TemporaryAccessGranted,
            });
        }
        if let Some(access) = self.accesses.get(&transaction_id) {
            if !access.is_active(now) {
                return Err(EscrowError::Validation(
                    "temporary access window is not active".to_string(),
                ));
            }
        }

        let bundle = self
            .vaults
            .reveal_once(txn.listing_id, passphrase, requesting_user_id)
            .await?;

        if let Some(mut access) = self.accesses.get_mut(&transaction_id) {
            access.record_login_attempt(now);
        }
        Ok(bundle)
    }

    pub async fn ingest_payment_event(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<ProcessingResult, EscrowError> {
        self.processor.ingest(raw_body, signature_header).await
    }

    /// Buyer-facing 1..=7 progress number.
    pub fn current_step(&self, transaction_id: TransactionId) -> Result<u8, EscrowError> {
        Ok(self.get_transaction(transaction_id)?.state.current_step())
    }

    /// Whether the buyer can advance along the main path from where the
    /// transaction currently stands, with all guards evaluated.
    pub fn can_proceed(&self, transaction_id: TransactionId) -> Result<bool, EscrowError> {
        let txn = self.get_transaction(transaction_id)?;
        let Some(next) = next_main_target(txn.state) else {
            return Ok(false);
        };

        let agreement = self.agreements.get(&transaction_id).map(|a| a.clone());
        let access = self.accesses.get(&transaction_id).map(|a| a.clone());
        let ctx = GuardContext {
            vault_stored: self.vaults.exists(txn.listing_id),
            agreement: agreement.as_ref(),
            access: access.as_ref(),
            // Name matching is checked at signing time with the live
            // directory; treat the stored signature as authoritative here.
            buyer_legal_name: agreement.as_ref().and_then(|a| a.signed_by_name.as_deref()),
        };

        let mut preview = txn.clone();
        Ok(attempt_transition(&mut preview, next, &ctx, Utc::now()).is_ok())
    }

    pub fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction, EscrowError> {
        self.transactions
            .get(transaction_id)
            .ok_or_else(|| EscrowError::TransactionNotFound(transaction_id.to_string()))
    }

    pub fn get_agreement(&self, transaction_id: TransactionId) -> Option<OwnershipAgreement> {
        self.agreements.get(&transaction_id).map(|a| a.clone())
    }

    pub fn get_access(&self, transaction_id: TransactionId) -> Option<TemporaryAccess> {
        self.accesses.get(&transaction_id).map(|a| a.clone())
    }

    async fn listing_price(&self, listing_id: u64) -> Result<ListingPrice, EscrowError> {
        if let Some(price) = self.price_cache.get(&listing_id) {
            return Ok(price);
        }
        let price = self.directory.get_listing_price(listing_id).await?;
        self.price_cache.put(listing_id, price.clone());
        Ok(price)
    }
}

/// Whether the verification window opened more than `window_hours` ago.
fn verification_window_elapsed(
    txn: &Transaction,
    window_hours: i64,
    now: chrono::DateTime<Utc>,
) -> bool {
    txn.entered_at(TransactionState::VerificationWindow)
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|started| now > started.with_timezone(&Utc) + chrono::Duration::hours(window_hours))
        .unwrap_or(false)
}

/// Next main-path state, if any. Side branches and terminals return None.
fn next_main_target(state: TransactionState) -> Option<TransactionState> {
    use TransactionState::*;
    match state {
        PurchaseInitiated => Some(PaymentPending),
        PaymentPending => Some(FundsHeld),
        FundsHeld => Some(TemporaryAccessGranted),
        TemporaryAccessGranted => Some(VerificationWindow),
        VerificationWindow => Some(OwnershipAgreementPending),
        OwnershipAgreementPending => Some(OwnershipAgreementSigned),
        OwnershipAgreementSigned => Some(FundsReleasePending),
        FundsReleasePending => Some(FundsReleased),
        FundsReleased => Some(Completed),
        Completed | Refunded | Cancelled | Disputed => None,
    }
}
