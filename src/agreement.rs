//! Ownership transfer agreement.
//!
//! The buyer's digitally signed acknowledgment of the account handover.
//! Signing requires all four acknowledgments plus a name that matches the
//! buyer's registered legal name; the state machine enforces the match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EscrowError;
use crate::transaction::TransactionId;

/// Signature metadata captured at signing time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The four explicit checkboxes the buyer must tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Acknowledgments {
    /// "I have verified the account"
    pub verified_account: bool,
    /// "I accept full ownership"
    pub accepts_ownership: bool,
    /// "I accept all risks after transfer"
    pub accepts_risks: bool,
    /// "Platform liability ends at release"
    pub platform_liability_ends: bool,
}

impl Acknowledgments {
    pub fn all_accepted(&self) -> bool {
        self.verified_account
            && self.accepts_ownership
            && self.accepts_risks
            && self.platform_liability_ends
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipAgreement {
    pub transaction_id: TransactionId,
    pub content: String,
    pub version: String,
    pub effective_date: DateTime<Utc>,
    pub acknowledgments: Acknowledgments,
    pub signed_by_name: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    /// SHA-256 over `name:timestamp:transaction_id:version`.
    pub signature_hash: Option<String>,
    pub signature_context: SignatureContext,
}

impl OwnershipAgreement {
    pub fn new(transaction_id: TransactionId, content: String, version: String) -> Self {
        Self {
            transaction_id,
            content,
            version,
            effective_date: Utc::now(),
            acknowledgments: Acknowledgments::default(),
            signed_by_name: None,
            signed_at: None,
            signature_hash: None,
            signature_context: SignatureContext::default(),
        }
    }

    /// Fully signed: all four acknowledgments plus name and timestamp.
    pub fn is_signed(&self) -> bool {
        self.signed_by_name.is_some()
            && self.signed_at.is_some()
            && self.acknowledgments.all_accepted()
    }

    /// Apply the buyer's signature.
    ///
    /// Rejects unless every acknowledgment is accepted. Name-vs-profile
    /// matching is the state machine's guard, not done here.
    pub fn sign(
        &mut self,
        signer_name: &str,
        acknowledgments: Acknowledgments,
        context: SignatureContext,
        now: DateTime<Utc>,
    ) -> Result<(), EscrowError> {
        if !acknowledgments.all_accepted() {
            return Err(EscrowError::Validation(
                "all agreement acknowledgments must be accepted".to_string(),
            ));
        }
        let signer_name = signer_name.trim();
        if signer_name.is_empty() {
            return Err(EscrowError::Validation(
                "signature name must not be empty".to_string(),
            ));
        }

        self.acknowledgments = acknowledgments;
        self.signed_by_name = Some(signer_name.to_string());
        self.signed_at = Some(now);
        self.signature_hash = Some(self.compute_signature_hash(signer_name, now));
        self.signature_context = context;
        Ok(())
    }

    fn compute_signature_hash(&self, signer_name: &str, signed_at: DateTime<Utc>) -> String {
        let material = format!(
            "{}:{}:{}:{}",
            signer_name,
            signed_at.to_rfc3339(),
            self.transaction_id,
            self.version
        );
        hex::encode(Sha256::digest(material.as_bytes()))
    }
}

/// Case-insensitive, trimmed legal name comparison used by the signing guard.
pub fn legal_names_match(signed: &str, registered: &str) -> bool {
    signed.trim().eq_ignore_ascii_case(registered.trim())
}
