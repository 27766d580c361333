use nanowallet_types::{Address, BlockHash, StateBlock, Subtype};
use serde::{Deserialize, Serialize};

/// Confirmed balance plus funds sent to the account but not yet received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub balance: u128,
    pub receivable: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCount {
    pub count: u64,
    pub unchecked: u64,
}

/// Head state of an opened account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub frontier: BlockHash,
    pub open_block: BlockHash,
    pub representative: Address,
    pub balance: u128,
    pub block_count: u64,
    pub confirmation_height: u64,
    pub confirmation_frontier: BlockHash,
}

/// A block as stored by the ledger, with its position in the account chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub account: Address,
    pub height: u64,
    pub subtype: Option<Subtype>,
    /// Value moved by this block (zero for change blocks).
    pub amount: u128,
    pub confirmed: bool,
    pub contents: StateBlock,
}

impl BlockInfo {
    pub fn hash(&self) -> BlockHash {
        self.contents.hash()
    }
}
