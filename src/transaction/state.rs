//! Transaction state graph.
//!
//! The transition table here is the single source of truth: every mutation
//! path goes through [`crate::transaction::machine`], nothing else assigns
//! states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Escrow transaction states.
///
/// Main path runs PurchaseInitiated through Completed; Refunded, Cancelled
/// and Disputed are side branches. Completed, Refunded and Cancelled are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    PurchaseInitiated,
    PaymentPending,
    FundsHeld,
    TemporaryAccessGranted,
    VerificationWindow,
    OwnershipAgreementPending,
    OwnershipAgreementSigned,
    FundsReleasePending,
    FundsReleased,
    Completed,
    Refunded,
    Cancelled,
    Disputed,
}

impl TransactionState {
    /// All states reachable from `self` by a single transition.
    ///
    /// Dispute resolution edges (Disputed -> Completed/Refunded/FundsReleased)
    /// are administrative overrides; `attempt_transition` rejects them unless
    /// forced.
    pub fn allowed_targets(&self) -> &'static [TransactionState] {
        use TransactionState::*;
        match self {
            // charge.success may arrive before the buyer's client ever
            // reported PaymentPending, so FundsHeld is reachable from both.
            PurchaseInitiated => &[PaymentPending, FundsHeld, Cancelled],
            PaymentPending => &[FundsHeld, Cancelled, Refunded],
            FundsHeld => &[TemporaryAccessGranted, Refunded, Disputed],
            TemporaryAccessGranted => &[VerificationWindow, Refunded, Disputed],
            VerificationWindow => &[OwnershipAgreementPending, Refunded, Disputed],
            OwnershipAgreementPending => &[OwnershipAgreementSigned, Refunded, Disputed],
            OwnershipAgreementSigned => &[FundsReleasePending, Refunded, Disputed],
            FundsReleasePending => &[FundsReleased, Disputed],
            FundsReleased => &[Completed],
            Disputed => &[Refunded, Completed, FundsReleased],
            Completed | Refunded | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Terminal states have no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Completed | TransactionState::Refunded | TransactionState::Cancelled
        )
    }

    /// Buyer-facing progress number (1..=7). Pure mapping for UI use.
    pub fn current_step(&self) -> u8 {
        use TransactionState::*;
        match self {
            PurchaseInitiated | PaymentPending => 1,
            FundsHeld => 2,
            TemporaryAccessGranted => 3,
            VerificationWindow => 4,
            OwnershipAgreementPending | OwnershipAgreementSigned => 5,
            FundsReleasePending | FundsReleased => 6,
            Completed | Refunded | Cancelled | Disputed => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use TransactionState::*;
        match self {
            PurchaseInitiated => "PURCHASE_INITIATED",
            PaymentPending => "PAYMENT_PENDING",
            FundsHeld => "FUNDS_HELD",
            TemporaryAccessGranted => "TEMPORARY_ACCESS_GRANTED",
            VerificationWindow => "VERIFICATION_WINDOW",
            OwnershipAgreementPending => "OWNERSHIP_AGREEMENT_PENDING",
            OwnershipAgreementSigned => "OWNERSHIP_AGREEMENT_SIGNED",
            FundsReleasePending => "FUNDS_RELEASE_PENDING",
            FundsReleased => "FUNDS_RELEASED",
            Completed => "COMPLETED",
            Refunded => "REFUNDED",
            Cancelled => "CANCELLED",
            Disputed => "DISPUTED",
        }
    }

    pub const ALL: [TransactionState; 13] = {
        use TransactionState::*;
        [
            PurchaseInitiated,
            PaymentPending,
            FundsHeld,
            TemporaryAccessGranted,
            VerificationWindow,
            OwnershipAgreementPending,
            OwnershipAgreementSigned,
            FundsReleasePending,
            FundsReleased,
            Completed,
            Refunded,
            Cancelled,
            Disputed,
        ]
    };
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown transaction state: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_edges() {
        for state in [
            TransactionState::Completed,
            TransactionState::Refunded,
            TransactionState::Cancelled,
        ] {
            assert!(state.is_terminal());
            assert!(state.allowed_targets().is_empty());
        }
    }

    #[test]
    fn test_main_path_edges() {
        use TransactionState::*;
        assert!(PurchaseInitiated.can_transition_to(PaymentPending));
        assert!(PaymentPending.can_transition_to(FundsHeld));
        assert!(FundsHeld.can_transition_to(TemporaryAccessGranted));
        assert!(TemporaryAccessGranted.can_transition_to(VerificationWindow));
        assert!(VerificationWindow.can_transition_to(OwnershipAgreementPending));
        assert!(OwnershipAgreementPending.can_transition_to(OwnershipAgreementSigned));
        assert!(OwnershipAgreementSigned.can_transition_to(FundsReleasePending));
        assert!(FundsReleasePending.can_transition_to(FundsReleased));
        assert!(FundsReleased.can_transition_to(Completed));
    }

    #[test]
    fn test_no_step_skipping() {
        use TransactionState::*;
        assert!(!FundsHeld.can_transition_to(Completed));
        assert!(!FundsHeld.can_transition_to(FundsReleased));
        assert!(!PurchaseInitiated.can_transition_to(TemporaryAccessGranted));
        assert!(!VerificationWindow.can_transition_to(OwnershipAgreementSigned));
    }

    #[test]
    fn test_dispute_resolution_edges() {
        use TransactionState::*;
        assert!(Disputed.can_transition_to(Refunded));
        assert!(Disputed.can_transition_to(Completed));
        assert!(Disputed.can_transition_to(FundsReleased));
        assert!(!Disputed.can_transition_to(FundsHeld));
    }

    #[test]
    fn test_current_step_range() {
        for state in TransactionState::ALL {
            let step = state.current_step();
            assert!((1..=7).contains(&step), "{state} -> {step}");
        }
        assert_eq!(TransactionState::PurchaseInitiated.current_step(), 1);
        assert_eq!(TransactionState::FundsHeld.current_step(), 2);
        assert_eq!(TransactionState::Completed.current_step(), 7);
    }

    #[test]
    fn test_str_roundtrip() {
        for state in TransactionState::ALL {
            assert_eq!(state.as_str().parse::<TransactionState>(), Ok(state));
        }
        assert!("NOT_A_STATE".parse::<TransactionState>().is_err());
    }
}
