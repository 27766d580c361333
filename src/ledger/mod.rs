//! The ledger service as seen by the wallet: request/response capabilities
//! behind one trait, with a JSON-RPC implementation over HTTP.

pub mod rpc;
pub mod types;

pub use rpc::RpcClient;
pub use types::{AccountBalance, AccountInfo, BlockCount, BlockInfo};

use crate::error::AppResult;
use async_trait::async_trait;
use nanowallet_types::{Address, BlockHash, StateBlock, Subtype};
use std::collections::HashMap;

/// Request/response access to the ledger.
///
/// Implementations trust the service's answers; nothing here verifies
/// consensus or proof-of-work.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Node height and unchecked backlog, used to pick a healthy endpoint.
    async fn block_count(&self) -> AppResult<BlockCount>;

    async fn account_balance(&self, account: &Address) -> AppResult<AccountBalance>;

    /// One batched query. Accounts the node has never seen come back as zero.
    async fn accounts_balances(
        &self,
        accounts: &[Address],
    ) -> AppResult<HashMap<Address, AccountBalance>>;

    async fn account_representative(&self, account: &Address) -> AppResult<Address>;

    /// `None` when the account has no blocks yet.
    async fn account_info(&self, account: &Address) -> AppResult<Option<AccountInfo>>;

    async fn block_info(&self, hash: &BlockHash) -> AppResult<BlockInfo>;

    /// `hash` followed by up to `count - 1` later blocks of the same account.
    async fn successors(&self, hash: &BlockHash, count: u64) -> AppResult<Vec<BlockHash>>;

    /// Hashes of unreceived sends to `account`, sorted by hash. The ledger
    /// records no receive order.
    async fn receivable(&self, account: &Address, count: u64) -> AppResult<Vec<BlockHash>>;

    async fn work_generate(&self, root: &BlockHash) -> AppResult<u64>;

    /// Publish a signed block, returning its hash.
    async fn process(&self, block: &StateBlock, subtype: Subtype) -> AppResult<BlockHash>;
}
