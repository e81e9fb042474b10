//! Credential vault storage with one-time reveal.
//!
//! One vault per listing. The reveal is the safety-critical path: the
//! per-vault lock is held for the entire decrypt-then-mark unit, so two
//! concurrent callers can never both decrypt — the second observes
//! `revealed_at` set and fails without touching ciphertext.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EscrowError;

use super::crypto::{CryptoEngine, EncryptedField};

/// Plaintext credentials supplied by the seller. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CredentialInput {
    pub username: String,
    pub password: String,
    pub recovery_email: Option<String>,
    pub two_factor_secret: Option<String>,
}

/// Decrypted credentials returned to exactly one caller, exactly once.
/// Never logged, never persisted; zeroized on drop.
#[derive(Serialize, Zeroize, ZeroizeOnDrop)]
pub struct PlaintextBundle {
    pub username: String,
    pub password: String,
    pub recovery_email: Option<String>,
    pub two_factor_secret: Option<String>,
}

impl std::fmt::Debug for PlaintextBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlaintextBundle { .. }")
    }
}

/// Encrypted-at-rest credentials for one listing.
///
/// `revealed_at` is write-once; the record is never updated after the
/// reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialVault {
    pub listing_id: u64,
    pub username: EncryptedField,
    pub password: EncryptedField,
    pub recovery_email: Option<EncryptedField>,
    pub two_factor_secret: Option<EncryptedField>,
    pub encryption_key_id: String,
    pub created_at: DateTime<Utc>,
    pub revealed_at: Option<DateTime<Utc>>,
    pub revealed_to_user_id: Option<u64>,
}

pub struct VaultStore {
    engine: CryptoEngine,
    vaults: DashMap<u64, Arc<Mutex<CredentialVault>>>,
}

impl VaultStore {
    pub fn new(engine: CryptoEngine) -> Self {
        Self {
            engine,
            vaults: DashMap::new(),
        }
    }

    /// Encrypt and store the seller's credentials for a listing.
    ///
    /// Each field gets its own salt/IV/tag. Rejects overwrite: a vault is
    /// created once and never re-written.
    pub async fn store(
        &self,
        listing_id: u64,
        input: CredentialInput,
        passphrase: &str,
    ) -> Result<(), EscrowError> {
        if self.vaults.contains_key(&listing_id) {
            return Err(EscrowError::Validation(format!(
                "credentials already delivered for listing {}",
                listing_id
            )));
        }

        // KDF is CPU-bound: run off the async runtime.
        let engine = self.engine.clone();
        let passphrase = passphrase.to_string();
        let vault = tokio::task::spawn_blocking(move || -> Result<CredentialVault, EscrowError> {
            Ok(CredentialVault {
                listing_id,
                username: engine.encrypt(&input.username, &passphrase)?,
                password: engine.encrypt(&input.password, &passphrase)?,
                recovery_email: input
                    .recovery_email
                    .as_deref()
                    .map(|v| engine.encrypt(v, &passphrase))
                    .transpose()?,
                two_factor_secret: input
                    .two_factor_secret
                    .as_deref()
                    .map(|v| engine.encrypt(v, &passphrase))
                    .transpose()?,
                encryption_key_id: CryptoEngine::generate_key_id(),
                created_at: Utc::now(),
                revealed_at: None,
                revealed_to_user_id: None,
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("encryption task failed: {}", e))??;

        // A racing store for the same listing loses here.
        match self.vaults.entry(listing_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EscrowError::Validation(format!(
                "credentials already delivered for listing {}",
                listing_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(vault)));
                tracing::info!(listing_id, "credential vault created");
                Ok(())
            }
        }
    }

    /// One-time reveal: atomic check-and-set on `revealed_at`.
    ///
    /// The vault lock is held across decrypt-then-mark. If `revealed_at`
    /// is already set the call fails immediately without attempting any
    /// decryption. A decryption failure leaves the flag unset — the whole
    /// unit rolls back, never a partial reveal.
    pub async fn reveal_once(
        &self,
        listing_id: u64,
        passphrase: &str,
        requesting_user_id: u64,
    ) -> Result<PlaintextBundle, EscrowError> {
        let cell = self
            .vaults
            .get(&listing_id)
            .map(|v| v.clone())
            .ok_or(EscrowError::VaultNotFound(listing_id))?;

        let mut vault = cell.lock().await;

        if vault.revealed_at.is_some() {
            tracing::warn!(
                listing_id,
                requesting_user_id,
                "reveal refused: credentials already revealed"
            );
            return Err(EscrowError::AlreadyRevealed);
        }

        let engine = self.engine.clone();
        let passphrase = passphrase.to_string();
        let fields = (
            vault.username.clone(),
            vault.password.clone(),
            vault.recovery_email.clone(),
            vault.two_factor_secret.clone(),
        );
        // spawn_blocking runs to completion even if the caller goes away,
        // so the unit is never abandoned mid-decrypt.
        let bundle =
            tokio::task::spawn_blocking(move || -> Result<PlaintextBundle, EscrowError> {
                let (username, password, recovery_email, two_factor_secret) = fields;
                Ok(PlaintextBundle {
                    username: engine.decrypt(&username, &passphrase)?.to_string(),
                    password: engine.decrypt(&password, &passphrase)?.to_string(),
                    recovery_email: recovery_email
                        .map(|f| engine.decrypt(&f, &passphrase).map(|p| p.to_string()))
                        .transpose()?,
                    two_factor_secret: two_factor_secret
                        .map(|f| engine.decrypt(&f, &passphrase).map(|p| p.to_string()))
                        .transpose()?,
                })
            })
            .await
            .map_err(|e| anyhow::anyhow!("decryption task failed: {}", e))??;

        // Same atomic unit as the check above: the lock is still held.
        vault.revealed_at = Some(Utc::now());
        vault.revealed_to_user_id = Some(requesting_user_id);

        tracing::info!(listing_id, requesting_user_id, "credentials revealed (one-time)");
        Ok(bundle)
    }

    pub async fn is_revealed(&self, listing_id: u64) -> bool {
        match self.vaults.get(&listing_id).map(|v| v.clone()) {
            Some(cell) => cell.lock().await.revealed_at.is_some(),
            None => false,
        }
    }

    /// Whether the seller has delivered credentials for this listing.
    pub fn exists(&self, listing_id: u64) -> bool {
        self.vaults.contains_key(&listing_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;

    fn test_store() -> VaultStore {
        VaultStore::new(CryptoEngine::new(
            CryptoConfig {
                argon2_memory_kib: 16,
                argon2_iterations: 1,
                argon2_lanes: 1,
            },
            "pepper".to_string(),
        ))
    }

    fn input() -> CredentialInput {
        CredentialInput {
            username: "acct@example.com".to_string(),
            password: "p@ssw0rd".to_string(),
            recovery_email: Some("recovery@example.com".to_string()),
            two_factor_secret: None,
        }
    }

    #[tokio::test]
    async fn test_store_and_reveal() {
        let store = test_store();
        store.store(7, input(), "buyer-pass").await.unwrap();
        assert!(store.exists(7));
        assert!(!store.is_revealed(7).await);

        let bundle = store.reveal_once(7, "buyer-pass", 42).await.unwrap();
        assert_eq!(bundle.username, "acct@example.com");
        assert_eq!(bundle.password, "p@ssw0rd");
        assert_eq!(bundle.recovery_email.as_deref(), Some("recovery@example.com"));
        assert!(bundle.two_factor_secret.is_none());
        assert!(store.is_revealed(7).await);
    }

    #[tokio::test]
    async fn test_second_reveal_rejected() {
        let store = test_store();
        store.store(7, input(), "buyer-pass").await.unwrap();

        store.reveal_once(7, "buyer-pass", 42).await.unwrap();
        let err = store.reveal_once(7, "buyer-pass", 42).await.unwrap_err();
        assert!(matches!(err, EscrowError::AlreadyRevealed));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_does_not_consume_reveal() {
        let store = test_store();
        store.store(7, input(), "buyer-pass").await.unwrap();

        let err = store.reveal_once(7, "wrong", 42).await.unwrap_err();
        assert!(matches!(err, EscrowError::Authentication));
        // Flag rolled back: the reveal is still available.
        assert!(!store.is_revealed(7).await);
        store.reveal_once(7, "buyer-pass", 42).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_reveal_single_winner() {
        let store = Arc::new(test_store());
        store.store(7, input(), "buyer-pass").await.unwrap();

        let mut handles = Vec::new();
        for user in 0..8u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.reveal_once(7, "buyer-pass", user).await
            }));
        }

        let mut ok = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(EscrowError::AlreadyRevealed) => already += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(already, 7);
    }

    #[tokio::test]
    async fn test_vault_is_write_once() {
        let store = test_store();
        store.store(7, input(), "buyer-pass").await.unwrap();
        let err = store.store(7, input(), "buyer-pass").await.unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reveal_unknown_listing() {
        let store = test_store();
        let err = store.reveal_once(99, "pass", 1).await.unwrap_err();
        assert!(matches!(err, EscrowError::VaultNotFound(99)));
    }
}
