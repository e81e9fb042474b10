//! Vault encryption engine.
//!
//! AES-256-GCM with Argon2id key derivation. The key is derived from the
//! buyer-supplied passphrase combined with a server-side pepper, with a
//! fresh random salt per encryption. A fresh 96-bit IV is drawn per call;
//! IVs and salts are never shared between fields.
//!
//! Decryption failure is uniform: wrong passphrase and tampered ciphertext
//! are indistinguishable to the caller. Key material is zeroized after use.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::CryptoConfig;
use crate::error::EscrowError;

/// AES-256 key length.
const KEY_LENGTH: usize = 32;
/// 96-bit IV, the recommended GCM nonce size.
const IV_LENGTH: usize = 12;
/// 128-bit GCM authentication tag.
const TAG_LENGTH: usize = 16;
/// KDF salt length.
const SALT_LENGTH: usize = 16;

/// One encrypted field with its own metadata, base64-encoded for storage.
///
/// Each field carries an independent iv/salt/tag; metadata is never shared
/// across fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub tag: String,
}

/// Key derivation + AEAD engine. Cheap to clone; safe to move into a
/// blocking task for the CPU-bound KDF.
#[derive(Clone)]
pub struct CryptoEngine {
    config: CryptoConfig,
    pepper: String,
}

impl CryptoEngine {
    pub fn new(config: CryptoConfig, pepper: String) -> Self {
        Self { config, pepper }
    }

    fn kdf(&self) -> Result<Argon2<'static>, EscrowError> {
        let params = Params::new(
            self.config.argon2_memory_kib,
            self.config.argon2_iterations,
            self.config.argon2_lanes,
            Some(KEY_LENGTH),
        )
        .map_err(|e| anyhow::anyhow!("invalid argon2 params: {}", e))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Derive a 256-bit key from `passphrase + pepper` and the given salt.
    fn derive_key(
        &self,
        passphrase: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_LENGTH]>, EscrowError> {
        let combined = Zeroizing::new(format!("{}:{}", passphrase, self.pepper));
        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        self.kdf()?
            .hash_password_into(combined.as_bytes(), salt, key.as_mut())
            .map_err(|e| anyhow::anyhow!("key derivation failed: {}", e))?;
        Ok(key)
    }

    /// Encrypt one plaintext field. Fresh salt and IV every call.
    pub fn encrypt(&self, plaintext: &str, passphrase: &str) -> Result<EncryptedField, EscrowError> {
        let mut salt = [0u8; SALT_LENGTH];
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("AEAD encryption failed"))?;

        // The AEAD appends the tag; store it separately like the vault schema.
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);

        Ok(EncryptedField {
            ciphertext: BASE64.encode(&sealed),
            iv: BASE64.encode(iv),
            salt: BASE64.encode(salt),
            tag: BASE64.encode(&tag),
        })
    }

    /// Authenticate-then-decrypt one field.
    ///
    /// Any failure — bad encoding, wrong passphrase, tampered ciphertext or
    /// tag — surfaces as the same [`EscrowError::Authentication`], with no
    /// partial plaintext.
    pub fn decrypt(
        &self,
        field: &EncryptedField,
        passphrase: &str,
    ) -> Result<Zeroizing<String>, EscrowError> {
        let data = BASE64
            .decode(&field.ciphertext)
            .map_err(|_| EscrowError::Authentication)?;
        let iv = BASE64.decode(&field.iv).map_err(|_| EscrowError::Authentication)?;
        let salt = BASE64.decode(&field.salt).map_err(|_| EscrowError::Authentication)?;
        let tag = BASE64.decode(&field.tag).map_err(|_| EscrowError::Authentication)?;

        if iv.len() != IV_LENGTH || tag.len() != TAG_LENGTH {
            return Err(EscrowError::Authentication);
        }

        let key = self.derive_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

        let mut sealed = data;
        sealed.extend_from_slice(&tag);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| EscrowError::Authentication)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| EscrowError::Authentication)
    }

    /// Opaque key id for rotation tracking.
    pub fn generate_key_id() -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        BASE64_URL.encode(bytes)
    }
}
