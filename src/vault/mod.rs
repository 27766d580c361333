//! Password-protected storage of seed material.
//!
//! Uses:
//! - Argon2id (memory-hard) to turn a password and salt into a 256-bit key
//! - AES-256-GCM for authenticated encryption, nonce prepended to the ciphertext

mod crypto;

pub use crypto::{decrypt, encrypt, KdfParams, KeyVault, VaultKey, KEY_LEN, NONCE_LEN, SALT_LEN};

use thiserror::Error;

/// Vault errors
#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrong key or tampered ciphertext. The only signal of a wrong password.
    #[error("Authentication failed - wrong password or corrupted data")]
    Authentication,

    #[error("Ciphertext too short")]
    Truncated,

    #[error("Invalid salt length: {0}")]
    InvalidSalt(usize),

    #[error("Key derivation failed: {0}")]
    Kdf(String),

    #[error("Key derivation task failed")]
    TaskFailed,
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;
