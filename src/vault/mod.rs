//! Encrypted credential vault.
//!
//! - [`crypto`] - Argon2id + AES-256-GCM engine
//! - [`store`] - per-listing vault records and the one-time reveal

pub mod crypto;
pub mod store;

pub use crypto::{CryptoEngine, EncryptedField};
pub use store::{CredentialInput, CredentialVault, PlaintextBundle, VaultStore};
