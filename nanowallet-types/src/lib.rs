//! Ledger value types shared across the NanoWallet crates.
//!
//! Everything here is a plain value: addresses, block hashes, state blocks
//! and the push messages delivered by the confirmation websocket. No I/O.

pub mod address;
pub mod block;
pub mod message;

pub use address::Address;
pub use block::{BlockHash, Signature, StateBlock, Subtype};
pub use message::{Confirmation, PushMessage};

/// Errors raised while parsing ledger values from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Malformed push message: {0}")]
    MalformedMessage(String),
}

/// Decode a fixed-size big-endian hex field.
pub(crate) fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], TypesError> {
    let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex(format!("{}: {}", s, e)))?;
    bytes
        .try_into()
        .map_err(|_| TypesError::InvalidHex(format!("expected {} bytes: {}", N, s)))
}
