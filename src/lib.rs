//! Escrow core for peer-to-peer sale of digital account credentials.
//!
//! The platform holds the buyer's funds while the seller hands over an
//! account, and only releases them once the buyer has verified the account
//! and signed the ownership agreement.
//!
//! # Modules
//!
//! - [`transaction`] - step-locked state machine, store and ids
//! - [`vault`] - encrypted credential vault with one-time reveal
//! - [`payment`] - provider webhook ingestion and payout dispatch
//! - [`payout`] - integer commission split
//! - [`agreement`] - ownership transfer agreement and signing
//! - [`access`] - temporary access window bookkeeping
//! - [`service`] - the collaborator-facing escrow service
//! - [`locks`] - per-transaction lock registry
//! - [`cache`] - injected TTL cache
//! - [`config`] / [`logging`] / [`error`] - ambient plumbing

pub mod access;
pub mod agreement;
pub mod cache;
pub mod config;
pub mod error;
pub mod locks;
pub mod logging;
pub mod payment;
pub mod payout;
pub mod service;
pub mod transaction;
pub mod vault;

// Convenient re-exports at crate root
pub use access::TemporaryAccess;
pub use agreement::{Acknowledgments, OwnershipAgreement, SignatureContext};
pub use config::{AppConfig, EscrowConfig};
pub use error::EscrowError;
pub use payment::{PaymentEvent, ProcessingResult, ProcessingStatus};
pub use payout::calculate_commission;
pub use service::{EscrowService, ListingDirectory, ListingPrice};
pub use transaction::{Transaction, TransactionId, TransactionState};
pub use vault::{CredentialInput, PlaintextBundle, VaultStore};
