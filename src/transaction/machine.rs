//! Guarded state transitions.
//!
//! Graph membership is checked first, then the target-specific guards.
//! Callers never branch on raw states; they ask the machine.

use chrono::{DateTime, Utc};

use crate::access::TemporaryAccess;
use crate::agreement::{OwnershipAgreement, legal_names_match};
use crate::error::EscrowError;

use super::state::TransactionState;
use super::types::Transaction;

/// Everything the transition guards may consult, assembled by the service
/// under the per-transaction lock.
#[derive(Debug, Default)]
pub struct GuardContext<'a> {
    /// Credentials stored in the vault for this listing.
    pub vault_stored: bool,
    pub agreement: Option<&'a OwnershipAgreement>,
    pub access: Option<&'a TemporaryAccess>,
    /// Buyer's registered legal name, for the signing guard.
    pub buyer_legal_name: Option<&'a str>,
}

/// Attempt a guarded transition and stamp the entry timestamp.
///
/// Fails with [`EscrowError::InvalidTransition`] when the edge is not in the
/// graph or a target-specific guard fails. On success the transaction state
/// and its entry timestamp are updated in place; the caller persists.
pub fn attempt_transition(
    txn: &mut Transaction,
    target: TransactionState,
    ctx: &GuardContext<'_>,
    now: DateTime<Utc>,
) -> Result<(), EscrowError> {
    if !txn.state.can_transition_to(target) {
        return Err(EscrowError::InvalidTransition {
            from: txn.state,
            to: target,
        });
    }
    // Leaving Disputed is reserved for force_transition.
    if txn.state == TransactionState::Disputed {
        return Err(EscrowError::InvalidTransition {
            from: txn.state,
            to: target,
        });
    }

    check_guards(txn, target, ctx, now)?;

    tracing::info!(
        transaction_id = %txn.id,
        from = %txn.state,
        to = %target,
        "transaction state transition"
    );
    txn.state = target;
    txn.mark_entered(target, now);
    Ok(())
}

fn check_guards(
    txn: &Transaction,
    target: TransactionState,
    ctx: &GuardContext<'_>,
    now: DateTime<Utc>,
) -> Result<(), EscrowError> {
    match target {
        TransactionState::TemporaryAccessGranted => {
            if !ctx.vault_stored {
                tracing::warn!(
                    transaction_id = %txn.id,
                    "access grant refused: credentials not yet delivered"
                );
                return Err(EscrowError::InvalidTransition {
                    from: txn.state,
                    to: target,
                });
            }
        }
        TransactionState::VerificationWindow => {
            let active = ctx.access.map(|a| a.is_active(now)).unwrap_or(false);
            if !active {
                return Err(EscrowError::InvalidTransition {
                    from: txn.state,
                    to: target,
                });
            }
        }
        TransactionState::OwnershipAgreementSigned => {
            let agreement = ctx.agreement.ok_or(EscrowError::InvalidTransition {
                from: txn.state,
                to: target,
            })?;
            if !agreement.is_signed() {
                return Err(EscrowError::InvalidTransition {
                    from: txn.state,
                    to: target,
                });
            }
            let name_matches = match (agreement.signed_by_name.as_deref(), ctx.buyer_legal_name) {
                (Some(signed), Some(registered)) => legal_names_match(signed, registered),
                _ => false,
            };
            if !name_matches {
                return Err(EscrowError::Validation(
                    "signature name must match the buyer's registered legal name".to_string(),
                ));
            }
        }
        TransactionState::FundsReleasePending => {
            let signed = ctx.agreement.map(|a| a.is_signed()).unwrap_or(false);
            if !signed {
                return Err(EscrowError::InvalidTransition {
                    from: txn.state,
                    to: target,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

/// Administrative resolution out of Disputed.
///
/// Bypasses the buyer-facing guards but still requires the edge to exist in
/// the graph and a non-empty audit reason, which is recorded on the
/// transaction.
pub fn force_transition(
    txn: &mut Transaction,
    target: TransactionState,
    audit_reason: &str,
    now: DateTime<Utc>,
) -> Result<(), EscrowError> {
    if txn.state != TransactionState::Disputed {
        return Err(EscrowError::InvalidTransition {
            from: txn.state,
            to: target,
        });
    }
    if !txn.state.can_transition_to(target) {
        return Err(EscrowError::InvalidTransition {
            from: txn.state,
            to: target,
        });
    }
    let audit_reason = audit_reason.trim();
    if audit_reason.is_empty() {
        return Err(EscrowError::Validation(
            "administrative override requires an audit reason".to_string(),
        ));
    }

    tracing::warn!(
        transaction_id = %txn.id,
        from = %txn.state,
        to = %target,
        reason = audit_reason,
        "administrative force transition"
    );
    txn.append_note(format!("admin override -> {}: {}", target, audit_reason));
    txn.state = target;
    txn.mark_entered(target, now);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{Acknowledgments, SignatureContext};
    use crate::transaction::TransactionId;

    fn txn_in(state: TransactionState) -> Transaction {
        let mut txn = Transaction::new(
            TransactionId::new(),
            7,
            1,
            2,
            10_000,
            "KES".into(),
            Utc::now(),
        );
        txn.state = state;
        txn
    }

    fn signed_agreement(txn: &Transaction, name: &str) -> OwnershipAgreement {
        let mut agreement =
            OwnershipAgreement::new(txn.id, "terms".to_string(), "1.0".to_string());
        agreement
            .sign(
                name,
                Acknowledgments {
                    verified_account: true,
                    accepts_ownership: true,
                    accepts_risks: true,
                    platform_liability_ends: true,
                },
                SignatureContext::default(),
                Utc::now(),
            )
            .unwrap();
        agreement
    }

    #[test]
    fn test_unlisted_edge_rejected() {
        // FUNDS_HELD -> COMPLETED is not an edge.
        let mut txn = txn_in(TransactionState::FundsHeld);
        let err = attempt_transition(
            &mut txn,
            TransactionState::Completed,
            &GuardContext::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EscrowError::InvalidTransition {
                from: TransactionState::FundsHeld,
                to: TransactionState::Completed,
            }
        ));
        assert_eq!(txn.state, TransactionState::FundsHeld);
    }

    #[test]
    fn test_every_listed_edge_without_guards_succeeds() {
        use TransactionState::*;
        let guardless: &[(TransactionState, TransactionState)] = &[
            (PurchaseInitiated, PaymentPending),
            (PurchaseInitiated, FundsHeld),
            (PaymentPending, FundsHeld),
            (PaymentPending, Cancelled),
            (FundsHeld, Refunded),
            (FundsHeld, Disputed),
            (VerificationWindow, OwnershipAgreementPending),
            (FundsReleasePending, FundsReleased),
            (FundsReleased, Completed),
        ];
        for &(from, to) in guardless {
            let mut txn = txn_in(from);
            attempt_transition(&mut txn, to, &GuardContext::default(), Utc::now())
                .unwrap_or_else(|e| panic!("{from} -> {to}: {e}"));
            assert_eq!(txn.state, to);
            assert!(txn.entered_at(to).is_some());
        }
    }

    #[test]
    fn test_access_grant_requires_stored_credentials() {
        let mut txn = txn_in(TransactionState::FundsHeld);
        let err = attempt_transition(
            &mut txn,
            TransactionState::TemporaryAccessGranted,
            &GuardContext::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidTransition { .. }));

        let ctx = GuardContext {
            vault_stored: true,
            ..Default::default()
        };
        attempt_transition(
            &mut txn,
            TransactionState::TemporaryAccessGranted,
            &ctx,
            Utc::now(),
        )
        .unwrap();
    }

    #[test]
    fn test_verification_window_requires_active_access() {
        let now = Utc::now();
        let mut txn = txn_in(TransactionState::TemporaryAccessGranted);

        let mut access = TemporaryAccess::grant(txn.id, now, 48, 10);
        access.revoke();
        let ctx = GuardContext {
            access: Some(&access),
            ..Default::default()
        };
        assert!(
            attempt_transition(&mut txn, TransactionState::VerificationWindow, &ctx, now).is_err()
        );

        let access = TemporaryAccess::grant(txn.id, now, 48, 10);
        let ctx = GuardContext {
            access: Some(&access),
            ..Default::default()
        };
        attempt_transition(&mut txn, TransactionState::VerificationWindow, &ctx, now).unwrap();
    }

    #[test]
    fn test_signing_guard_checks_name_match() {
        let mut txn = txn_in(TransactionState::OwnershipAgreementPending);
        let agreement = signed_agreement(&txn, "Jane Doe");

        let ctx = GuardContext {
            agreement: Some(&agreement),
            buyer_legal_name: Some("Janet Doe"),
            ..Default::default()
        };
        let err = attempt_transition(
            &mut txn,
            TransactionState::OwnershipAgreementSigned,
            &ctx,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));

        let ctx = GuardContext {
            agreement: Some(&agreement),
            buyer_legal_name: Some("  JANE doe "),
            ..Default::default()
        };
        attempt_transition(
            &mut txn,
            TransactionState::OwnershipAgreementSigned,
            &ctx,
            Utc::now(),
        )
        .unwrap();
    }

    #[test]
    fn test_release_pending_requires_signed_agreement() {
        let mut txn = txn_in(TransactionState::OwnershipAgreementSigned);
        assert!(
            attempt_transition(
                &mut txn,
                TransactionState::FundsReleasePending,
                &GuardContext::default(),
                Utc::now(),
            )
            .is_err()
        );

        let agreement = signed_agreement(&txn, "Jane Doe");
        let ctx = GuardContext {
            agreement: Some(&agreement),
            ..Default::default()
        };
        attempt_transition(&mut txn, TransactionState::FundsReleasePending, &ctx, Utc::now())
            .unwrap();
    }

    #[test]
    fn test_force_transition_needs_reason() {
        let mut txn = txn_in(TransactionState::Disputed);
        assert!(matches!(
            force_transition(&mut txn, TransactionState::Refunded, "  ", Utc::now()),
            Err(EscrowError::Validation(_))
        ));

        force_transition(&mut txn, TransactionState::Refunded, "chargeback upheld", Utc::now())
            .unwrap();
        assert_eq!(txn.state, TransactionState::Refunded);
        assert!(txn.notes.iter().any(|n| n.contains("chargeback upheld")));
    }

    #[test]
    fn test_disputed_cannot_be_left_without_override() {
        let mut txn = txn_in(TransactionState::Disputed);
        let err = attempt_transition(
            &mut txn,
            TransactionState::Refunded,
            &GuardContext::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidTransition { .. }));
    }

    #[test]
    fn test_force_transition_only_from_disputed() {
        let mut txn = txn_in(TransactionState::FundsHeld);
        assert!(
            force_transition(&mut txn, TransactionState::Refunded, "reason", Utc::now()).is_err()
        );
    }

    #[test]
    fn test_force_transition_skips_buyer_guards() {
        // FundsReleased out of Disputed with no agreement at all.
        let mut txn = txn_in(TransactionState::Disputed);
        force_transition(
            &mut txn,
            TransactionState::FundsReleased,
            "seller proven to have delivered",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(txn.state, TransactionState::FundsReleased);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in [
            TransactionState::Completed,
            TransactionState::Refunded,
            TransactionState::Cancelled,
        ] {
            for target in TransactionState::ALL {
                let mut txn = txn_in(terminal);
                assert!(
                    attempt_transition(&mut txn, target, &GuardContext::default(), Utc::now())
                        .is_err(),
                    "{terminal} -> {target} should be rejected"
                );
            }
        }
    }
}
