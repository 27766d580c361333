use nanowallet_types::{Address, TypesError};
use thiserror::Error;

use crate::vault::VaultError;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The vault rejected the ciphertext: wrong password or tampered data.
    #[error("Wrong password")]
    WrongPassword,

    #[error("Vault error: {0}")]
    Vault(String),

    /// A re-derived address disagrees with the recorded one.
    #[error("Address mismatch: recorded {expected}, derived {derived}")]
    AddressMismatch { expected: Address, derived: Address },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid token name: {0}")]
    InvalidTokenName(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Signing device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Token chain protocol error: {0}")]
    ChainProtocol(String),

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Wallet is locked")]
    WalletLocked,

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn rpc<S: Into<String>>(msg: S) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn chain_protocol<S: Into<String>>(msg: S) -> Self {
        Self::ChainProtocol(msg.into())
    }

    pub fn invalid_amount<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAmount(msg.into())
    }

    /// Failures that the next periodic trigger may well not see again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Rpc(_) | Self::Timeout => true,
            Self::Http(e) => !e.is_decode(),
            _ => false,
        }
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Authentication => Self::WrongPassword,
            other => Self::Vault(other.to_string()),
        }
    }
}

impl From<TypesError> for AppError {
    fn from(err: TypesError) -> Self {
        match err {
            TypesError::InvalidAddress(s) => Self::InvalidAddress(s),
            TypesError::InvalidAmount(s) => Self::InvalidAmount(s),
            other => Self::Rpc(other.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
