use super::signer::Signer;
use crate::error::{AppError, AppResult};
use crate::ledger::{AccountBalance, AccountInfo, LedgerClient};
use nanowallet_types::{Address, BlockHash, StateBlock, Subtype};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// How many receivable sends `receive_pending` pockets per call.
const RECEIVE_BATCH: u64 = 100;

/// A verified signing view of one account.
///
/// Obtained from `AccountDirectory::account`, which checks that the
/// signer still derives the recorded address. Block production on one
/// account is serialized through a lock shared by every handle to it.
pub struct AccountHandle {
    address: Address,
    index: u32,
    signer: Arc<dyn Signer>,
    ledger: Arc<dyn LedgerClient>,
    write_lock: Arc<Mutex<()>>,
    default_representative: Address,
}

impl std::fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHandle")
            .field("address", &self.address)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl AccountHandle {
    pub(crate) fn new(
        address: Address,
        index: u32,
        signer: Arc<dyn Signer>,
        ledger: Arc<dyn LedgerClient>,
        write_lock: Arc<Mutex<()>>,
        default_representative: Address,
    ) -> Self {
        Self {
            address,
            index,
            signer,
            ledger,
            write_lock,
            default_representative,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub async fn balance(&self) -> AppResult<AccountBalance> {
        self.ledger.account_balance(&self.address).await
    }

    /// Current representative; the wallet default for an unopened account.
    pub async fn representative(&self) -> AppResult<Address> {
        Ok(self
            .ledger
            .account_info(&self.address)
            .await?
            .map(|info| info.representative)
            .unwrap_or(self.default_representative))
    }

    pub async fn send(&self, destination: &Address, amount: u128) -> AppResult<BlockHash> {
        self.send_with_representative(destination, amount, None).await
    }

    /// Send that also sets the representative field, in one block.
    pub async fn send_with_representative(
        &self,
        destination: &Address,
        amount: u128,
        representative: Option<Address>,
    ) -> AppResult<BlockHash> {
        let address = self.address;
        let destination = *destination;
        let hash = self
            .publish(Subtype::Send, move |info| {
                let info = info.ok_or(AppError::InsufficientBalance)?;
                let balance = info
                    .balance
                    .checked_sub(amount)
                    .ok_or(AppError::InsufficientBalance)?;
                Ok(StateBlock {
                    account: address,
                    previous: info.frontier,
                    representative: representative.unwrap_or(info.representative),
                    balance,
                    link: BlockHash::from(destination),
                    signature: None,
                    work: None,
                })
            })
            .await?;
        info!(from = %self.address, to = %destination, amount, hash = %hash, "Sent");
        Ok(hash)
    }

    pub async fn change_representative(&self, representative: &Address) -> AppResult<BlockHash> {
        let address = self.address;
        let representative = *representative;
        let hash = self
            .publish(Subtype::Change, move |info| {
                let info = info.ok_or_else(|| AppError::rpc("account is not open"))?;
                Ok(StateBlock {
                    account: address,
                    previous: info.frontier,
                    representative,
                    balance: info.balance,
                    link: BlockHash::ZERO,
                    signature: None,
                    work: None,
                })
            })
            .await?;
        debug!(account = %self.address, representative = %representative, hash = %hash, "Changed representative");
        Ok(hash)
    }

    /// Pocket one send addressed to this account.
    pub async fn receive(&self, source: &BlockHash) -> AppResult<BlockHash> {
        let send = self.ledger.block_info(source).await?;
        if send.subtype != Some(Subtype::Send) || send.contents.link_as_account() != self.address {
            return Err(AppError::rpc(format!("{} is not a send to {}", source, self.address)));
        }

        let address = self.address;
        let default_rep = self.default_representative;
        let source = *source;
        let amount = send.amount;

        let hash = self
            .publish_dynamic(move |info| {
                let (previous, representative, balance, subtype) = match info {
                    Some(info) => (
                        info.frontier,
                        info.representative,
                        info.balance
                            .checked_add(amount)
                            .ok_or_else(|| AppError::invalid_amount("balance overflow"))?,
                        Subtype::Receive,
                    ),
                    None => (BlockHash::ZERO, default_rep, amount, Subtype::Open),
                };
                Ok((
                    StateBlock {
                        account: address,
                        previous,
                        representative,
                        balance,
                        link: source,
                        signature: None,
                        work: None,
                    },
                    subtype,
                ))
            })
            .await?;
        debug!(account = %self.address, source = %source, amount, hash = %hash, "Received");
        Ok(hash)
    }

    /// Pocket every receivable send, in the order the ledger lists them.
    pub async fn receive_pending(&self) -> AppResult<Vec<BlockHash>> {
        let sources = self.ledger.receivable(&self.address, RECEIVE_BATCH).await?;
        let mut hashes = Vec::with_capacity(sources.len());
        for source in sources {
            hashes.push(self.receive(&source).await?);
        }
        Ok(hashes)
    }

    async fn publish<F>(&self, subtype: Subtype, build: F) -> AppResult<BlockHash>
    where
        F: FnOnce(Option<&AccountInfo>) -> AppResult<StateBlock> + Send,
    {
        self.publish_dynamic(move |info| Ok((build(info)?, subtype)))
            .await
    }

    /// Build against the current frontier, sign, attach work, publish.
    async fn publish_dynamic<F>(&self, build: F) -> AppResult<BlockHash>
    where
        F: FnOnce(Option<&AccountInfo>) -> AppResult<(StateBlock, Subtype)> + Send,
    {
        let _guard = self.write_lock.lock().await;

        let info = self.ledger.account_info(&self.address).await?;
        let (mut block, subtype) = build(info.as_ref())?;

        block.signature = Some(self.signer.sign(self.index, &block).await?);
        block.work = Some(self.ledger.work_generate(&block.work_root()).await?);
        self.ledger.process(&block, subtype).await
    }
}
