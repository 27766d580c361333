//! Token operations encoded in a block's 32-byte representative field.
//!
//! Layout: `"TK"` magic, op byte, decimals byte, 16-byte big-endian amount,
//! 12 bytes of NUL-padded UTF-8 name (genesis only).

use crate::error::{AppError, AppResult};
use nanowallet_types::Address;

const MAGIC: [u8; 2] = *b"TK";
const OP_GENESIS: u8 = 1;
const OP_TRANSFER: u8 = 2;

pub const MAX_NAME_LEN: usize = 12;
/// 10^38 is the largest power of ten below u128::MAX.
pub const MAX_DECIMALS: u8 = 38;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOp {
    Genesis { name: String, decimals: u8, supply: u128 },
    Transfer { amount: u128 },
}

pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::InvalidTokenName("name is empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AppError::InvalidTokenName(format!(
            "{} is longer than {} bytes",
            name, MAX_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(AppError::InvalidTokenName("name contains NUL".into()));
    }
    Ok(())
}

impl TokenOp {
    pub fn encode(&self) -> Address {
        let mut out = [0u8; 32];
        out[..2].copy_from_slice(&MAGIC);
        match self {
            TokenOp::Genesis { name, decimals, supply } => {
                out[2] = OP_GENESIS;
                out[3] = *decimals;
                out[4..20].copy_from_slice(&supply.to_be_bytes());
                let name = name.as_bytes();
                let len = name.len().min(MAX_NAME_LEN);
                out[20..20 + len].copy_from_slice(&name[..len]);
            }
            TokenOp::Transfer { amount } => {
                out[2] = OP_TRANSFER;
                out[4..20].copy_from_slice(&amount.to_be_bytes());
            }
        }
        Address(out)
    }

    /// `None` for anything that is not a well-formed token header, which
    /// includes every ordinary representative key.
    pub fn decode(field: &Address) -> Option<Self> {
        let b = field.as_bytes();
        if b[..2] != MAGIC {
            return None;
        }
        let mut amount = [0u8; 16];
        amount.copy_from_slice(&b[4..20]);
        let amount = u128::from_be_bytes(amount);

        match b[2] {
            OP_GENESIS => {
                let decimals = b[3];
                let raw_name = &b[20..32];
                let end = raw_name.iter().position(|&c| c == 0).unwrap_or(MAX_NAME_LEN);
                if raw_name[end..].iter().any(|&c| c != 0) {
                    return None;
                }
                let name = std::str::from_utf8(&raw_name[..end]).ok()?.to_string();
                if validate_name(&name).is_err() || decimals > MAX_DECIMALS || amount == 0 {
                    return None;
                }
                Some(TokenOp::Genesis { name, decimals, supply: amount })
            }
            OP_TRANSFER if b[3] == 0 && b[20..].iter().all(|&c| c == 0) => {
                Some(TokenOp::Transfer { amount })
            }
            _ => None,
        }
    }
}
