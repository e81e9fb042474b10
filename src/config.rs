use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub escrow: EscrowConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Escrow domain configuration.
///
/// Injected explicitly at construction; nothing in the core reads
/// ambient/global settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EscrowConfig {
    /// Platform commission in whole percent (0..=100).
    pub commission_percent: u8,
    /// Temporary access window granted to the buyer, in hours.
    pub access_window_hours: i64,
    /// Verification window after access, in hours.
    pub verification_window_hours: i64,
    /// Maximum login attempts during temporary access.
    pub max_login_attempts: u32,
    /// Bounded wait for the per-transaction lock, in milliseconds.
    pub lock_wait_ms: u64,
    /// HMAC secret shared with the payment provider for webhook signatures.
    pub provider_webhook_secret: String,
    /// Server-side pepper mixed into the vault passphrase before KDF.
    pub encryption_pepper: String,
    #[serde(default)]
    pub crypto: CryptoConfig,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            commission_percent: 10,
            access_window_hours: 48,
            verification_window_hours: 48,
            max_login_attempts: 10,
            lock_wait_ms: 2_000,
            provider_webhook_secret: String::new(),
            encryption_pepper: String::new(),
            crypto: CryptoConfig::default(),
        }
    }
}

/// Argon2id parameters for vault key derivation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CryptoConfig {
    /// Memory cost in KiB (65536 = 64 MiB).
    pub argon2_memory_kib: u32,
    /// Iterations (time cost).
    pub argon2_iterations: u32,
    /// Lanes (parallelism).
    pub argon2_lanes: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_memory_kib: 65_536,
            argon2_iterations: 3,
            argon2_lanes: 4,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
